use crate::model::{
    ElementKind, PolicyDefinition, PolicyElement, PolicyRegistryList, PolicyRegistrySingleList,
    PolicyRegistryValue, PolicyState,
};
use crate::options::{ElementOption, ElementOptions, ListOption};
use crate::walker;
use polstate_types::{PolicySource, RegistryValue, RegistryValueType, SourceError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("option for element {element} is not a {expected} value")]
    OptionKind {
        element: String,
        expected: &'static str,
    },
}

/// Move `def` to `state` in `source`.
///
/// `NotConfigured` forgets every location the policy references. Options are applied
/// only for elements present in `options`; omitted elements are left untouched.
pub fn apply_state<S: PolicySource + ?Sized>(
    def: &PolicyDefinition,
    source: &mut S,
    state: PolicyState,
    options: &ElementOptions,
) -> Result<(), ApplyError> {
    debug!(policy = %def.id, %state, options = options.len(), "applying policy state");
    match state {
        PolicyState::Enabled => enable(def, source, options),
        PolicyState::Disabled => disable(def, source),
        PolicyState::NotConfigured => Ok(walker::forget(def, source)?),
        PolicyState::Unknown => {
            warn!(policy = %def.id, "unknown is not an applicable state; leaving policy untouched");
            Ok(())
        }
    }
}

fn write_value<S: PolicySource + ?Sized>(
    source: &mut S,
    key: &str,
    value: &str,
    desc: &PolicyRegistryValue,
) -> Result<(), SourceError> {
    match desc {
        PolicyRegistryValue::Delete => source.delete_value(key, value),
        PolicyRegistryValue::Numeric(n) => {
            source.set_value(key, value, RegistryValue::DWord(*n), RegistryValueType::DWord)
        }
        PolicyRegistryValue::Text(text) => source.set_value(
            key,
            value,
            RegistryValue::Text(text.clone()),
            RegistryValueType::String,
        ),
    }
}

fn write_list<S: PolicySource + ?Sized>(
    source: &mut S,
    list: &PolicyRegistrySingleList,
    key: &str,
) -> Result<(), SourceError> {
    let list_key = list.default_key.as_deref().unwrap_or(key);
    for entry in &list.entries {
        let entry_key = entry.key.as_deref().unwrap_or(list_key);
        write_value(source, entry_key, &entry.value, &entry.data)?;
    }
    Ok(())
}

fn write_on<S: PolicySource + ?Sized>(
    source: &mut S,
    registry: &PolicyRegistryList,
    key: &str,
    value: &str,
) -> Result<(), SourceError> {
    if let Some(desc) = &registry.on_value {
        write_value(source, key, value, desc)?;
    }
    if let Some(list) = &registry.on_list {
        write_list(source, list, key)?;
    }
    Ok(())
}

fn write_off<S: PolicySource + ?Sized>(
    source: &mut S,
    registry: &PolicyRegistryList,
    key: &str,
    value: &str,
) -> Result<(), SourceError> {
    if let Some(desc) = &registry.off_value {
        write_value(source, key, value, desc)?;
    }
    if let Some(list) = &registry.off_list {
        write_list(source, list, key)?;
    }
    Ok(())
}

fn enable<S: PolicySource + ?Sized>(
    def: &PolicyDefinition,
    source: &mut S,
    options: &ElementOptions,
) -> Result<(), ApplyError> {
    let key = def.registry_key.as_str();
    if def.registry.on_value.is_none() && def.has_root_value() && def.elements.is_empty() {
        source.set_value(
            key,
            &def.registry_value,
            RegistryValue::DWord(1),
            RegistryValueType::DWord,
        )?;
    }
    write_on(source, &def.registry, key, &def.registry_value)?;

    for (id, option) in options {
        let Some(element) = def.element(id) else {
            warn!(policy = %def.id, element = %id, "option for unknown element ignored");
            continue;
        };
        apply_option(def, element, option, source)?;
    }
    Ok(())
}

fn kind_mismatch(element: &PolicyElement) -> ApplyError {
    ApplyError::OptionKind {
        element: element.id.clone(),
        expected: element.kind.name(),
    }
}

fn text_type(expandable: bool) -> RegistryValueType {
    if expandable {
        RegistryValueType::ExpandString
    } else {
        RegistryValueType::String
    }
}

fn apply_option<S: PolicySource + ?Sized>(
    def: &PolicyDefinition,
    element: &PolicyElement,
    option: &ElementOption,
    source: &mut S,
) -> Result<(), ApplyError> {
    let key = def.element_key(element);
    let value = element.registry_value.as_str();
    match &element.kind {
        ElementKind::Decimal { store_as_text, .. } => {
            let n = option.as_decimal().ok_or_else(|| kind_mismatch(element))?;
            if *store_as_text {
                source.set_value(
                    key,
                    value,
                    RegistryValue::Text(n.to_string()),
                    RegistryValueType::String,
                )?;
            } else {
                source.set_value(key, value, RegistryValue::DWord(n), RegistryValueType::DWord)?;
            }
        }
        ElementKind::Boolean { registry } => {
            let checked = option.as_boolean().ok_or_else(|| kind_mismatch(element))?;
            if checked {
                if registry.on_value.is_none() {
                    source.set_value(
                        key,
                        value,
                        RegistryValue::DWord(1),
                        RegistryValueType::DWord,
                    )?;
                }
                write_on(source, registry, key, value)?;
            } else {
                if registry.off_value.is_none() {
                    source.delete_value(key, value)?;
                }
                write_off(source, registry, key, value)?;
            }
        }
        ElementKind::Text {
            max_length,
            expandable,
        } => {
            let text = option.as_text().ok_or_else(|| kind_mismatch(element))?;
            let truncated: String = text.chars().take(*max_length as usize).collect();
            source.set_value(
                key,
                value,
                RegistryValue::Text(truncated),
                text_type(*expandable),
            )?;
        }
        ElementKind::List {
            has_prefix,
            expandable,
            no_purge_others,
            ..
        } => {
            let list = option.as_list().ok_or_else(|| kind_mismatch(element))?;
            if !no_purge_others {
                source.clear_key(key)?;
            }
            let kind = text_type(*expandable);
            match list {
                ListOption::Named(pairs) => {
                    for (name, data) in pairs {
                        source.set_value(key, name, RegistryValue::Text(data.clone()), kind)?;
                    }
                }
                ListOption::Items(items) => {
                    for (idx, item) in items.iter().enumerate() {
                        let name = if *has_prefix {
                            format!("{value}{}", idx + 1)
                        } else {
                            item.clone()
                        };
                        source.set_value(key, &name, RegistryValue::Text(item.clone()), kind)?;
                    }
                }
            }
        }
        ElementKind::Enum { items, required } => {
            let idx = option.as_enum_index().ok_or_else(|| kind_mismatch(element))?;
            let item = match items.get(idx) {
                Some(item) => item,
                None if *required && !items.is_empty() => &items[0],
                None => {
                    warn!(policy = %def.id, element = %element.id, idx, "enum index out of range; skipped");
                    return Ok(());
                }
            };
            write_value(source, key, value, &item.value)?;
            if let Some(list) = &item.value_list {
                write_list(source, list, key)?;
            }
        }
        ElementKind::MultiText => {
            let lines = option.as_multi_text().ok_or_else(|| kind_mismatch(element))?;
            source.set_value(
                key,
                value,
                RegistryValue::MultiText(lines),
                RegistryValueType::MultiString,
            )?;
        }
    }
    Ok(())
}

fn disable<S: PolicySource + ?Sized>(
    def: &PolicyDefinition,
    source: &mut S,
) -> Result<(), ApplyError> {
    let key = def.registry_key.as_str();
    if def.registry.off_value.is_none() && def.has_root_value() {
        source.delete_value(key, &def.registry_value)?;
    }
    write_off(source, &def.registry, key, &def.registry_value)?;

    for element in &def.elements {
        let key = def.element_key(element);
        let value = element.registry_value.as_str();
        match &element.kind {
            ElementKind::List { .. } => source.clear_key(key)?,
            ElementKind::Boolean { registry }
                if registry.off_value.is_some() || registry.off_list.is_some() =>
            {
                write_off(source, registry, key, value)?
            }
            _ => source.delete_value(key, value)?,
        }
    }
    Ok(())
}
