use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Key prefixes (relative to a hive root) that hold policy data.
///
/// Diff application only forgets stale locations under one of these, so registry
/// state unrelated to policy is never clobbered.
pub const POLICY_ROOT_KEYS: [&str; 3] = [
    "software\\policies",
    "software\\microsoft\\windows\\currentversion\\policies",
    "system\\currentcontrolset\\policies",
];

/// Case-insensitive comparison of registry key or value names.
pub fn key_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}

/// `true` if `key` sits below one of the [`POLICY_ROOT_KEYS`].
pub fn is_policy_key(key: &str) -> bool {
    let lower = key.trim_matches('\\').to_lowercase();
    POLICY_ROOT_KEYS.iter().any(|root| {
        lower == *root
            || lower
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('\\'))
    })
}

/// Join a parent key and a child segment with exactly one backslash.
pub fn join_key(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('\\');
    let child = child.trim_start_matches('\\');
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => parent.to_string(),
        _ => format!("{parent}\\{child}"),
    }
}

/// Split `a\b\c` into (`Some("a\b")`, `"c"`).
pub fn split_leaf(key: &str) -> (Option<&str>, &str) {
    match key.rfind('\\') {
        Some(idx) => (Some(&key[..idx]), &key[idx + 1..]),
        None => (None, key),
    }
}

/// Top-level registry hives a live source can be rooted in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegistryHive {
    LocalMachine,
    CurrentUser,
    Users,
    ClassesRoot,
}

impl RegistryHive {
    /// Accepts both the long (`HKEY_LOCAL_MACHINE`) and the short (`HKLM`) forms.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "HKLM" | "HKEY_LOCAL_MACHINE" => Some(RegistryHive::LocalMachine),
            "HKCU" | "HKEY_CURRENT_USER" => Some(RegistryHive::CurrentUser),
            "HKU" | "HKEY_USERS" => Some(RegistryHive::Users),
            "HKCR" | "HKEY_CLASSES_ROOT" => Some(RegistryHive::ClassesRoot),
            _ => None,
        }
    }

    pub fn canonical_name(self) -> &'static str {
        match self {
            RegistryHive::LocalMachine => "HKEY_LOCAL_MACHINE",
            RegistryHive::CurrentUser => "HKEY_CURRENT_USER",
            RegistryHive::Users => "HKEY_USERS",
            RegistryHive::ClassesRoot => "HKEY_CLASSES_ROOT",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            RegistryHive::LocalMachine => "HKLM",
            RegistryHive::CurrentUser => "HKCU",
            RegistryHive::Users => "HKU",
            RegistryHive::ClassesRoot => "HKCR",
        }
    }

    /// Split `HKLM\Software\Policies` into the hive and the remaining subkey path.
    pub fn split_path(path: &str) -> Option<(Self, &str)> {
        let path = path.trim_start_matches('\\');
        let (head, rest) = match path.find('\\') {
            Some(idx) => (&path[..idx], &path[idx + 1..]),
            None => (path, ""),
        };
        RegistryHive::parse(head).map(|hive| (hive, rest.trim_matches('\\')))
    }
}

/// A (key, value name) location. Equality and hashing ignore case on both fields.
#[derive(Clone, Debug, Eq, Serialize, Deserialize)]
pub struct RegistryKeyValuePair {
    pub key: String,
    pub value: String,
}

impl RegistryKeyValuePair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl PartialEq for RegistryKeyValuePair {
    fn eq(&self, other: &Self) -> bool {
        self.key.to_lowercase() == other.key.to_lowercase()
            && self.value.to_lowercase() == other.value.to_lowercase()
    }
}

impl Hash for RegistryKeyValuePair {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.to_lowercase().hash(state);
        self.value.to_lowercase().hash(state);
    }
}

/// The two halves of a policy store: computer settings and user settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyScope {
    Machine,
    User,
}

impl PolicyScope {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "machine" | "computer" => Some(PolicyScope::Machine),
            "user" => Some(PolicyScope::User),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyScope::Machine => "machine",
            PolicyScope::User => "user",
        }
    }

    /// The live hive this scope's policy data lands in.
    pub fn hive(self) -> RegistryHive {
        match self {
            PolicyScope::Machine => RegistryHive::LocalMachine,
            PolicyScope::User => RegistryHive::CurrentUser,
        }
    }
}

impl std::fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
