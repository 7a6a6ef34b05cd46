//! Shared fixtures for polstate integration tests.
//!
//! Lives outside `#[cfg(test)]` so the app and CLI test suites can share it.

use polstate_polfile::PolFile;
use polstate_types::{PolicySource, RegistryValue, RegistryValueType};

/// Sample policy definitions: a machine policy with decimal and enum elements, a
/// user policy without a root value, a `both` policy owning a prefixed list, and a
/// machine/user pair that collapses into one `both` policy.
pub const CONTOSO_DEFINITIONS: &str =
    include_str!("../../../tests/fixtures/definitions/contoso.json");

/// Policy ids in [`CONTOSO_DEFINITIONS`] after the machine/user pair collapses.
pub const CONTOSO_POLICY_IDS: [&str; 4] = [
    "contoso.blocklist",
    "contoso.telemetry",
    "contoso.updates",
    "contoso.wallpaper",
];

pub const CONTOSO_KEY: &str = "Software\\Policies\\Contoso";

/// One entry for [`pol_with`].
pub enum Entry<'a> {
    DWord(&'a str, &'a str, u32),
    Text(&'a str, &'a str, &'a str),
    Delete(&'a str, &'a str),
    Clear(&'a str),
}

/// Build a policy file from `entries`, applied in order.
pub fn pol_with(entries: &[Entry<'_>]) -> PolFile {
    let mut pol = PolFile::new();
    for entry in entries {
        let result = match entry {
            Entry::DWord(key, value, n) => pol.set_value(
                key,
                value,
                RegistryValue::DWord(*n),
                RegistryValueType::DWord,
            ),
            Entry::Text(key, value, text) => pol.set_value(
                key,
                value,
                RegistryValue::Text((*text).to_string()),
                RegistryValueType::String,
            ),
            Entry::Delete(key, value) => pol.delete_value(key, value),
            Entry::Clear(key) => pol.clear_key(key),
        };
        if let Err(err) = result {
            panic!("building fixture policy file: {err}");
        }
    }
    pol
}
