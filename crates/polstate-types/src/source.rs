//! The capability contract shared by every policy storage backend.
//!
//! Reads never fail: an unreadable location is simply absent. Writes return
//! [`SourceError`] because some backends (live registry views) can refuse them.

use crate::value::{RegistryValue, RegistryValueType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("policy source is read-only")]
    ReadOnly,

    #[error("registry write failed at {key}: {message}")]
    Registry { key: String, message: String },
}

/// Read side of a policy source. Evaluation only needs this half.
pub trait PolicyReader {
    /// `false` whenever the location is pending deletion, even if data still exists.
    fn contains_value(&self, key: &str, value: &str) -> bool;

    /// `None` if absent or pending deletion.
    fn get_value(&self, key: &str, value: &str) -> Option<RegistryValue>;

    /// `true` if this source records an intent to remove the location when applied.
    fn will_delete_value(&self, key: &str, value: &str) -> bool;

    /// Value names under `key`, deletion markers excluded.
    fn value_names(&self, key: &str) -> Vec<String>;
}

/// Mutable side of a policy source.
pub trait PolicySource: PolicyReader {
    /// Overwrite the location, clearing any deletion marker recorded for it.
    fn set_value(
        &mut self,
        key: &str,
        value: &str,
        data: RegistryValue,
        kind: RegistryValueType,
    ) -> Result<(), SourceError>;

    /// Stop tracking the location: drop both data and any deletion marker.
    fn forget_value(&mut self, key: &str, value: &str) -> Result<(), SourceError>;

    /// Idempotent: forget, then record a deletion marker unless one already covers it.
    fn delete_value(&mut self, key: &str, value: &str) -> Result<(), SourceError>;

    /// Mark every value under `key` for deletion.
    fn clear_key(&mut self, key: &str) -> Result<(), SourceError>;

    /// Undo a previous [`PolicySource::clear_key`].
    fn forget_key_clearance(&mut self, key: &str) -> Result<(), SourceError>;
}

impl<T: PolicyReader + ?Sized> PolicyReader for &T {
    fn contains_value(&self, key: &str, value: &str) -> bool {
        (**self).contains_value(key, value)
    }

    fn get_value(&self, key: &str, value: &str) -> Option<RegistryValue> {
        (**self).get_value(key, value)
    }

    fn will_delete_value(&self, key: &str, value: &str) -> bool {
        (**self).will_delete_value(key, value)
    }

    fn value_names(&self, key: &str) -> Vec<String> {
        (**self).value_names(key)
    }
}

impl<T: PolicyReader + ?Sized> PolicyReader for &mut T {
    fn contains_value(&self, key: &str, value: &str) -> bool {
        (**self).contains_value(key, value)
    }

    fn get_value(&self, key: &str, value: &str) -> Option<RegistryValue> {
        (**self).get_value(key, value)
    }

    fn will_delete_value(&self, key: &str, value: &str) -> bool {
        (**self).will_delete_value(key, value)
    }

    fn value_names(&self, key: &str) -> Vec<String> {
        (**self).value_names(key)
    }
}

impl<T: PolicySource + ?Sized> PolicySource for &mut T {
    fn set_value(
        &mut self,
        key: &str,
        value: &str,
        data: RegistryValue,
        kind: RegistryValueType,
    ) -> Result<(), SourceError> {
        (**self).set_value(key, value, data, kind)
    }

    fn forget_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
        (**self).forget_value(key, value)
    }

    fn delete_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
        (**self).delete_value(key, value)
    }

    fn clear_key(&mut self, key: &str) -> Result<(), SourceError> {
        (**self).clear_key(key)
    }

    fn forget_key_clearance(&mut self, key: &str) -> Result<(), SourceError> {
        (**self).forget_key_clearance(key)
    }
}

impl<T: PolicyReader + ?Sized> PolicyReader for Box<T> {
    fn contains_value(&self, key: &str, value: &str) -> bool {
        (**self).contains_value(key, value)
    }

    fn get_value(&self, key: &str, value: &str) -> Option<RegistryValue> {
        (**self).get_value(key, value)
    }

    fn will_delete_value(&self, key: &str, value: &str) -> bool {
        (**self).will_delete_value(key, value)
    }

    fn value_names(&self, key: &str) -> Vec<String> {
        (**self).value_names(key)
    }
}

impl<T: PolicySource + ?Sized> PolicySource for Box<T> {
    fn set_value(
        &mut self,
        key: &str,
        value: &str,
        data: RegistryValue,
        kind: RegistryValueType,
    ) -> Result<(), SourceError> {
        (**self).set_value(key, value, data, kind)
    }

    fn forget_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
        (**self).forget_value(key, value)
    }

    fn delete_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
        (**self).delete_value(key, value)
    }

    fn clear_key(&mut self, key: &str) -> Result<(), SourceError> {
        (**self).clear_key(key)
    }

    fn forget_key_clearance(&mut self, key: &str) -> Result<(), SourceError> {
        (**self).forget_key_clearance(key)
    }
}
