use crate::cache::CachedReader;
use crate::matching::{list_present, off_present, on_off_evidence, on_present, value_present};
use crate::model::{ElementKind, PolicyDefinition, PolicyState};
use polstate_types::PolicyReader;
use tracing::trace;

/// Evidence is counted in tenths so that the 0.1 boolean-off weight stays exact.
const FULL: u32 = 10;
const CORROBORATING: u32 = 1;

/// Infer the state of `def` from what `source` holds.
///
/// Explicit on/off descriptors decide first; only when they are absent or disagree does
/// the weighted evidence pass run.
pub fn evaluate<R: PolicyReader + ?Sized>(def: &PolicyDefinition, source: &R) -> PolicyState {
    let cached = CachedReader::new(source);

    let (positive, negative) = explicit_votes(def, &cached);
    if positive > 0 && negative == 0 {
        return PolicyState::Enabled;
    }
    if negative > 0 && positive == 0 {
        return PolicyState::Disabled;
    }

    let (enabled, disabled) = weighted_evidence(def, &cached);
    trace!(policy = %def.id, positive, negative, enabled, disabled, "policy evidence");
    decide(enabled, disabled)
}

fn decide(enabled: u32, disabled: u32) -> PolicyState {
    match enabled.cmp(&disabled) {
        std::cmp::Ordering::Greater => PolicyState::Enabled,
        std::cmp::Ordering::Less => PolicyState::Disabled,
        std::cmp::Ordering::Equal if enabled == 0 => PolicyState::NotConfigured,
        std::cmp::Ordering::Equal => PolicyState::Unknown,
    }
}

fn explicit_votes<R: PolicyReader + ?Sized>(def: &PolicyDefinition, source: &R) -> (u32, u32) {
    let mut positive = 0;
    let mut negative = 0;

    if on_present(source, &def.registry, &def.registry_key, &def.registry_value) {
        positive += 1;
    }
    if off_present(source, &def.registry, &def.registry_key, &def.registry_value) {
        negative += 1;
    }

    for element in &def.elements {
        let key = def.element_key(element);
        match &element.kind {
            ElementKind::Boolean { registry } => {
                if on_present(source, registry, key, &element.registry_value) {
                    positive += 1;
                }
                if off_present(source, registry, key, &element.registry_value) {
                    negative += 1;
                }
            }
            ElementKind::Enum { items, .. } => {
                let selected = items.iter().any(|item| {
                    value_present(source, key, &element.registry_value, &item.value)
                        && item.value_list.as_ref().is_none_or(|list| {
                            list.entries.is_empty() || list_present(source, list, key)
                        })
                });
                if selected {
                    positive += 1;
                }
            }
            _ => {}
        }
    }
    (positive, negative)
}

fn weighted_evidence<R: PolicyReader + ?Sized>(def: &PolicyDefinition, source: &R) -> (u32, u32) {
    let (on, off) = on_off_evidence(source, &def.registry, &def.registry_key, &def.registry_value);
    let mut enabled = on * FULL;
    let mut disabled = off * FULL;

    let mut present_elements = 0;
    let mut deleted_elements = 0;
    for element in &def.elements {
        let key = def.element_key(element);
        let value = element.registry_value.as_str();
        match &element.kind {
            ElementKind::List { .. } => {
                let has_values = !source.value_names(key).is_empty();
                // Values present now outweigh a stale key-level deletion.
                if source.will_delete_value(key, "") && !has_values {
                    deleted_elements += FULL;
                }
                if has_values {
                    present_elements += FULL;
                }
            }
            ElementKind::Boolean { registry } => {
                if source.will_delete_value(key, value) {
                    deleted_elements += FULL;
                } else {
                    let (on, off) = on_off_evidence(source, registry, key, value);
                    present_elements += on * FULL;
                    deleted_elements += off * CORROBORATING;
                }
            }
            _ if def.has_root_value() => {}
            _ => {
                if source.will_delete_value(key, value) {
                    deleted_elements += FULL;
                }
                if source.contains_value(key, value) {
                    present_elements += FULL;
                }
            }
        }
    }

    if present_elements > 0 {
        enabled += present_elements;
    } else if deleted_elements > 0 {
        disabled += deleted_elements;
    }
    (enabled, disabled)
}
