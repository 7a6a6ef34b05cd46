//! Presence checks of value descriptors against a source.

use crate::model::{PolicyRegistryList, PolicyRegistrySingleList, PolicyRegistryValue};
use polstate_types::{PolicyReader, RegistryValue};

/// `true` if the location currently holds what `desc` describes.
///
/// Numbers also match decimal text; text compares exactly.
pub(crate) fn value_present<R: PolicyReader + ?Sized>(
    source: &R,
    key: &str,
    value: &str,
    desc: &PolicyRegistryValue,
) -> bool {
    match desc {
        PolicyRegistryValue::Delete => source.will_delete_value(key, value),
        PolicyRegistryValue::Numeric(expected) => match source.get_value(key, value) {
            Some(RegistryValue::Text(text)) => text.trim().parse::<u32>().ok() == Some(*expected),
            Some(other) => other.as_number() == Some(u64::from(*expected)),
            None => false,
        },
        PolicyRegistryValue::Text(expected) => source
            .get_value(key, value)
            .is_some_and(|v| v.as_text() == Some(expected.as_str())),
    }
}

/// All entries hold. An empty list never counts as present.
pub(crate) fn list_present<R: PolicyReader + ?Sized>(
    source: &R,
    list: &PolicyRegistrySingleList,
    key: &str,
) -> bool {
    let list_key = list.default_key.as_deref().unwrap_or(key);
    !list.entries.is_empty()
        && list.entries.iter().all(|entry| {
            let entry_key = entry.key.as_deref().unwrap_or(list_key);
            value_present(source, entry_key, &entry.value, &entry.data)
        })
}

/// Number of list entries that hold. Each one is a separate piece of evidence.
pub(crate) fn list_evidence<R: PolicyReader + ?Sized>(
    source: &R,
    list: &PolicyRegistrySingleList,
    key: &str,
) -> u32 {
    let list_key = list.default_key.as_deref().unwrap_or(key);
    let held = list
        .entries
        .iter()
        .filter(|entry| {
            let entry_key = entry.key.as_deref().unwrap_or(list_key);
            value_present(source, entry_key, &entry.value, &entry.data)
        })
        .count();
    u32::try_from(held).unwrap_or(u32::MAX)
}

/// The explicit on descriptors (value or list) of `registry` are present.
pub(crate) fn on_present<R: PolicyReader + ?Sized>(
    source: &R,
    registry: &PolicyRegistryList,
    key: &str,
    value: &str,
) -> bool {
    registry
        .on_value
        .as_ref()
        .is_some_and(|desc| value_present(source, key, value, desc))
        || registry
            .on_list
            .as_ref()
            .is_some_and(|list| list_present(source, list, key))
}

pub(crate) fn off_present<R: PolicyReader + ?Sized>(
    source: &R,
    registry: &PolicyRegistryList,
    key: &str,
    value: &str,
) -> bool {
    registry
        .off_value
        .as_ref()
        .is_some_and(|desc| value_present(source, key, value, desc))
        || registry
            .off_list
            .as_ref()
            .is_some_and(|list| list_present(source, list, key))
}

/// Evidence for on and off. Single values count once, lists once per entry held.
/// Absent single-value descriptors fall back to the implicit forms: numeric 1 means
/// on, a pending deletion means off.
pub(crate) fn on_off_evidence<R: PolicyReader + ?Sized>(
    source: &R,
    registry: &PolicyRegistryList,
    key: &str,
    value: &str,
) -> (u32, u32) {
    let has_value = !value.is_empty();
    let mut on = 0;
    let mut off = 0;

    match &registry.on_value {
        Some(desc) if value_present(source, key, value, desc) => on += 1,
        None if has_value
            && value_present(source, key, value, &PolicyRegistryValue::Numeric(1)) =>
        {
            on += 1
        }
        _ => {}
    }
    match &registry.off_value {
        Some(desc) if value_present(source, key, value, desc) => off += 1,
        None if has_value && source.will_delete_value(key, value) => off += 1,
        _ => {}
    }
    if let Some(list) = &registry.on_list {
        on += list_evidence(source, list, key);
    }
    if let Some(list) = &registry.off_list {
        off += list_evidence(source, list, key);
    }
    (on, off)
}
