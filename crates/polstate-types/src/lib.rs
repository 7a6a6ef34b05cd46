//! Stable types shared across the polstate workspace.
//!
//! This crate is intentionally boring:
//! - the registry value model and value-type taxonomy
//! - case-insensitive registry key/value identities and key path helpers
//! - the capability contract every policy source backend implements

#![forbid(unsafe_code)]

pub mod codec;
pub mod key;
pub mod source;
pub mod value;

pub use key::{
    POLICY_ROOT_KEYS, PolicyScope, RegistryHive, RegistryKeyValuePair, is_policy_key, join_key,
    key_eq, split_leaf,
};
pub use source::{PolicyReader, PolicySource, SourceError};
pub use value::{RegistryValue, RegistryValueType};
