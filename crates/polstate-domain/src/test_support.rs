use crate::model::{
    ElementKind, EnumItem, PolicyDefinition, PolicyElement, PolicyRegistryList,
    PolicyRegistryListEntry, PolicyRegistrySingleList, PolicyRegistryValue, PolicySection,
};
use polstate_polfile::PolFile;
use polstate_types::{PolicySource, RegistryValue, RegistryValueType};

pub const KEY: &str = "Software\\Policies\\Contoso";

/// A machine policy under [`KEY`] toggled by `value`, with no elements.
pub fn root_toggle(id: &str, value: &str) -> PolicyDefinition {
    PolicyDefinition {
        id: id.to_string(),
        display_name: id.to_string(),
        explain_text: String::new(),
        section: PolicySection::Machine,
        registry_key: KEY.to_string(),
        registry_value: value.to_string(),
        registry: PolicyRegistryList::default(),
        elements: Vec::new(),
    }
}

pub fn policy_without_root(id: &str) -> PolicyDefinition {
    root_toggle(id, "")
}

pub fn with_elements(mut def: PolicyDefinition, elements: Vec<PolicyElement>) -> PolicyDefinition {
    def.elements = elements;
    def
}

fn element(id: &str, value: &str, kind: ElementKind) -> PolicyElement {
    PolicyElement {
        id: id.to_string(),
        registry_key: None,
        registry_value: value.to_string(),
        kind,
    }
}

pub fn boolean(id: &str, value: &str) -> PolicyElement {
    element(id, value, ElementKind::Boolean {
        registry: PolicyRegistryList::default(),
    })
}

pub fn decimal(id: &str, value: &str) -> PolicyElement {
    element(id, value, ElementKind::Decimal {
        min: 0,
        max: 9999,
        store_as_text: false,
    })
}

pub fn decimal_as_text(id: &str, value: &str) -> PolicyElement {
    element(id, value, ElementKind::Decimal {
        min: 0,
        max: 9999,
        store_as_text: true,
    })
}

pub fn text(id: &str, value: &str) -> PolicyElement {
    text_max(id, value, 1023)
}

pub fn text_max(id: &str, value: &str, max_length: u32) -> PolicyElement {
    element(id, value, ElementKind::Text {
        max_length,
        expandable: false,
    })
}

pub fn multi_text(id: &str, value: &str) -> PolicyElement {
    element(id, value, ElementKind::MultiText)
}

/// A list owning `KEY\<subkey>`; prefixed entries are named `Item1..N`.
pub fn list(id: &str, subkey: &str, has_prefix: bool) -> PolicyElement {
    PolicyElement {
        registry_key: Some(format!("{KEY}\\{subkey}")),
        ..element(id, "Item", ElementKind::List {
            has_prefix,
            user_provides_names: false,
            expandable: false,
            no_purge_others: false,
        })
    }
}

pub fn enumeration(id: &str, value: &str, numbers: &[u32], required: bool) -> PolicyElement {
    let items = numbers
        .iter()
        .map(|n| EnumItem {
            display_name: format!("Option {n}"),
            value: PolicyRegistryValue::Numeric(*n),
            value_list: None,
        })
        .collect();
    element(id, value, ElementKind::Enum { items, required })
}

pub fn single_list(entries: &[(&str, PolicyRegistryValue)]) -> PolicyRegistrySingleList {
    PolicyRegistrySingleList {
        default_key: None,
        entries: entries
            .iter()
            .map(|(value, data)| PolicyRegistryListEntry {
                key: None,
                value: value.to_string(),
                data: data.clone(),
            })
            .collect(),
    }
}

pub fn set_dword(pol: &mut PolFile, key: &str, value: &str, data: u32) {
    pol.set_value(key, value, RegistryValue::DWord(data), RegistryValueType::DWord)
        .expect("set dword");
}
