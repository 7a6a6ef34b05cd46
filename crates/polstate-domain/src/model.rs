use polstate_types::PolicyScope;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySection {
    Machine,
    User,
    Both,
}

impl PolicySection {
    pub fn includes(self, scope: PolicyScope) -> bool {
        matches!(
            (self, scope),
            (PolicySection::Both, _)
                | (PolicySection::Machine, PolicyScope::Machine)
                | (PolicySection::User, PolicyScope::User)
        )
    }

    /// `Machine` + `User` make `Both`; anything else does not combine.
    pub fn complement_of(self, other: PolicySection) -> bool {
        matches!(
            (self, other),
            (PolicySection::Machine, PolicySection::User)
                | (PolicySection::User, PolicySection::Machine)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyState {
    NotConfigured,
    Enabled,
    Disabled,
    Unknown,
}

impl PolicyState {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "notconfigured" | "not-configured" | "not_configured" => {
                Some(PolicyState::NotConfigured)
            }
            "enabled" => Some(PolicyState::Enabled),
            "disabled" => Some(PolicyState::Disabled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyState::NotConfigured => "notconfigured",
            PolicyState::Enabled => "enabled",
            PolicyState::Disabled => "disabled",
            PolicyState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What must hold at one location for a state to be considered present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum PolicyRegistryValue {
    Delete,
    Numeric(u32),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRegistryListEntry {
    /// Overrides the list's key for this one entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
    pub data: PolicyRegistryValue,
}

/// Entries that must all hold for the list to count as present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRegistrySingleList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_key: Option<String>,
    #[serde(default)]
    pub entries: Vec<PolicyRegistryListEntry>,
}

/// The on/off descriptors of a policy or a boolean element.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRegistryList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_value: Option<PolicyRegistryValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_list: Option<PolicyRegistrySingleList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off_value: Option<PolicyRegistryValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off_list: Option<PolicyRegistrySingleList>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumItem {
    pub display_name: String,
    pub value: PolicyRegistryValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_list: Option<PolicyRegistrySingleList>,
}

fn default_max_length() -> u32 {
    1023
}

fn default_decimal_max() -> u32 {
    9999
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementKind {
    Boolean {
        #[serde(default)]
        registry: PolicyRegistryList,
    },
    Text {
        #[serde(default = "default_max_length")]
        max_length: u32,
        #[serde(default)]
        expandable: bool,
    },
    Decimal {
        #[serde(default)]
        min: u32,
        #[serde(default = "default_decimal_max")]
        max: u32,
        #[serde(default)]
        store_as_text: bool,
    },
    /// Owns a whole key. With `has_prefix`, entries are named `<registry_value>1..N`.
    List {
        #[serde(default)]
        has_prefix: bool,
        #[serde(default)]
        user_provides_names: bool,
        #[serde(default)]
        expandable: bool,
        #[serde(default)]
        no_purge_others: bool,
    },
    Enum {
        items: Vec<EnumItem>,
        #[serde(default)]
        required: bool,
    },
    MultiText,
}

impl ElementKind {
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Boolean { .. } => "boolean",
            ElementKind::Text { .. } => "text",
            ElementKind::Decimal { .. } => "decimal",
            ElementKind::List { .. } => "list",
            ElementKind::Enum { .. } => "enum",
            ElementKind::MultiText => "multitext",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyElement {
    pub id: String,
    /// Falls back to the policy's key when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_key: Option<String>,
    #[serde(default)]
    pub registry_value: String,
    #[serde(flatten)]
    pub kind: ElementKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub explain_text: String,
    pub section: PolicySection,
    pub registry_key: String,
    /// Empty when the policy has no root toggle of its own.
    #[serde(default)]
    pub registry_value: String,
    #[serde(default)]
    pub registry: PolicyRegistryList,
    #[serde(default)]
    pub elements: Vec<PolicyElement>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("policy {policy}: duplicate element id {element}")]
    DuplicateElementId { policy: String, element: String },

    #[error("duplicate policy id {0}")]
    DuplicatePolicyId(String),
}

impl PolicyDefinition {
    pub fn element_key<'a>(&'a self, element: &'a PolicyElement) -> &'a str {
        element.registry_key.as_deref().unwrap_or(&self.registry_key)
    }

    pub fn element(&self, id: &str) -> Option<&PolicyElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn has_root_value(&self) -> bool {
        !self.registry_value.is_empty()
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut seen = HashSet::new();
        for element in &self.elements {
            if !seen.insert(element.id.as_str()) {
                return Err(DefinitionError::DuplicateElementId {
                    policy: self.id.clone(),
                    element: element.id.clone(),
                });
            }
        }
        Ok(())
    }
}
