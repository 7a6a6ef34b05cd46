use crate::model::{
    ElementKind, PolicyDefinition, PolicyRegistryList, PolicyRegistrySingleList,
};
use polstate_types::{PolicySource, RegistryKeyValuePair, SourceError};
use std::collections::HashSet;
use tracing::debug;

struct Locations {
    seen: HashSet<RegistryKeyValuePair>,
    pairs: Vec<RegistryKeyValuePair>,
}

impl Locations {
    fn push(&mut self, key: &str, value: &str) {
        let pair = RegistryKeyValuePair::new(key, value);
        if self.seen.insert(pair.clone()) {
            self.pairs.push(pair);
        }
    }

    fn list(&mut self, list: &PolicyRegistrySingleList, key: &str) {
        let list_key = list.default_key.as_deref().unwrap_or(key);
        for entry in &list.entries {
            self.push(entry.key.as_deref().unwrap_or(list_key), &entry.value);
        }
    }

    fn registry(&mut self, registry: &PolicyRegistryList, key: &str) {
        if let Some(list) = &registry.on_list {
            self.list(list, key);
        }
        if let Some(list) = &registry.off_list {
            self.list(list, key);
        }
    }
}

/// Every `(key, value)` the policy can write, in definition order without repeats.
///
/// List elements contribute `(key, "")` for the key they own.
pub fn referenced_locations(def: &PolicyDefinition) -> Vec<RegistryKeyValuePair> {
    let mut out = Locations {
        seen: HashSet::new(),
        pairs: Vec::new(),
    };
    if def.has_root_value() {
        out.push(&def.registry_key, &def.registry_value);
    }
    out.registry(&def.registry, &def.registry_key);

    for element in &def.elements {
        let key = def.element_key(element);
        match &element.kind {
            ElementKind::List { .. } => out.push(key, ""),
            ElementKind::Boolean { registry } => {
                out.push(key, &element.registry_value);
                out.registry(registry, key);
            }
            ElementKind::Enum { items, .. } => {
                out.push(key, &element.registry_value);
                for item in items {
                    if let Some(list) = &item.value_list {
                        out.list(list, key);
                    }
                }
            }
            _ => out.push(key, &element.registry_value),
        }
    }
    out.pairs
}

/// Remove every trace of `def` from `source`: values, pending deletions and the
/// clearance of keys owned by list elements.
pub fn forget<S: PolicySource + ?Sized>(
    def: &PolicyDefinition,
    source: &mut S,
) -> Result<(), SourceError> {
    for element in &def.elements {
        if matches!(element.kind, ElementKind::List { .. }) {
            let key = def.element_key(element);
            source.clear_key(key)?;
            source.forget_key_clearance(key)?;
        }
    }
    let locations = referenced_locations(def);
    debug!(policy = %def.id, locations = locations.len(), "forgetting policy");
    for pair in &locations {
        if !pair.value.is_empty() {
            source.forget_value(&pair.key, &pair.value)?;
        }
    }
    Ok(())
}
