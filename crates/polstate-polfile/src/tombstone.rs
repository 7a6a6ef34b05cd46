//! Value-name grammar for deferred deletions.
//!
//! - `**del.<name>`: delete one value
//! - `**delvals[.suffix]`: delete every value under the key
//! - `**deletevalues`: payload is a `;`-separated list of value names to delete
//! - `**deletekeys`: payload is a `;`-separated list of subkeys to clear

pub const MARKER_PREFIX: &str = "**";
pub const DELETE_VALUE_PREFIX: &str = "**del.";
pub const DELVALS_PREFIX: &str = "**delvals";
/// The placeholder written by `clear_key`.
pub const DELVALS_MARKER: &str = "**delvals.";
pub const DELETE_VALUES: &str = "**deletevalues";
pub const DELETE_KEYS: &str = "**deletekeys";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tombstone<'a> {
    /// `**del.<name>`; carries the original-case target name.
    DeleteValue(&'a str),
    DeleteAllValues,
    DeleteValueList,
    DeleteKeyList,
    /// Any other `**`-prefixed name; carried through but never interpreted.
    Unknown,
}

impl<'a> Tombstone<'a> {
    /// Classify a value name. Plain values return `None`.
    pub fn parse(name: &'a str) -> Option<Self> {
        if !name.starts_with(MARKER_PREFIX) {
            return None;
        }
        let lower = name.to_ascii_lowercase();
        let marker = if lower.starts_with(DELETE_VALUE_PREFIX) {
            Tombstone::DeleteValue(&name[DELETE_VALUE_PREFIX.len()..])
        } else if lower.starts_with(DELVALS_PREFIX) {
            Tombstone::DeleteAllValues
        } else if lower == DELETE_VALUES {
            Tombstone::DeleteValueList
        } else if lower == DELETE_KEYS {
            Tombstone::DeleteKeyList
        } else {
            Tombstone::Unknown
        };
        Some(marker)
    }
}

/// Split a `**deletevalues` / `**deletekeys` payload into its names.
pub(crate) fn split_name_list(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(';')
        .map(|s| s.trim_matches('\0').trim())
        .filter(|s| !s.is_empty())
}
