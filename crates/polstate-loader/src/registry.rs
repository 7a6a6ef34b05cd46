//! Registry views: the handle-level surface a live registry backend needs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// A value in the registry's own storage representation. Numbers are signed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NativeValue {
    DWord(i32),
    QWord(i64),
    String(String),
    ExpandString(String),
    MultiString(Vec<String>),
    /// Anything else, with its raw `REG_*` code.
    Binary { kind: u32, data: Vec<u8> },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("invalid registry path: {0}")]
    InvalidPath(String),

    #[error("registry error {code} at {path}")]
    Os { path: String, code: u32 },
}

/// One hive (or subtree) of a registry. Keys are paths relative to the view's root,
/// compared case-insensitively.
///
/// Handles are shared, so writes take `&self`.
pub trait RegistryView: Send + Sync {
    fn get(&self, key: &str, value: &str) -> Result<Option<NativeValue>, RegistryError>;

    /// Creates `key` and any missing parents.
    fn set(&self, key: &str, value: &str, data: NativeValue) -> Result<(), RegistryError>;

    /// Removing a value that does not exist is not an error.
    fn delete_value(&self, key: &str, value: &str) -> Result<(), RegistryError>;

    fn value_names(&self, key: &str) -> Result<Vec<String>, RegistryError>;

    fn subkey_names(&self, key: &str) -> Result<Vec<String>, RegistryError>;

    /// Removes an empty key. Keys with values or subkeys are left alone.
    fn delete_empty_key(&self, key: &str) -> Result<(), RegistryError>;

    fn key_exists(&self, key: &str) -> bool;
}

impl<T: RegistryView + ?Sized> RegistryView for Arc<T> {
    fn get(&self, key: &str, value: &str) -> Result<Option<NativeValue>, RegistryError> {
        (**self).get(key, value)
    }
    fn set(&self, key: &str, value: &str, data: NativeValue) -> Result<(), RegistryError> {
        (**self).set(key, value, data)
    }
    fn delete_value(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        (**self).delete_value(key, value)
    }
    fn value_names(&self, key: &str) -> Result<Vec<String>, RegistryError> {
        (**self).value_names(key)
    }
    fn subkey_names(&self, key: &str) -> Result<Vec<String>, RegistryError> {
        (**self).subkey_names(key)
    }
    fn delete_empty_key(&self, key: &str) -> Result<(), RegistryError> {
        (**self).delete_empty_key(key)
    }
    fn key_exists(&self, key: &str) -> bool {
        (**self).key_exists(key)
    }
}

#[derive(Debug, Default)]
struct MemKey {
    name: String,
    /// lowercase name -> (cased name, data)
    values: BTreeMap<String, (String, NativeValue)>,
}

#[derive(Debug, Default)]
struct MemTree {
    /// lowercase path -> key
    keys: BTreeMap<String, MemKey>,
    read_only: bool,
}

fn normalize(key: &str) -> String {
    key.trim_matches('\\').to_lowercase()
}

impl MemTree {
    fn ensure(&mut self, key: &str) {
        let trimmed = key.trim_matches('\\');
        if trimmed.is_empty() {
            self.keys.entry(String::new()).or_default();
            return;
        }
        let mut path = String::new();
        for segment in trimmed.split('\\') {
            if !path.is_empty() {
                path.push('\\');
            }
            path.push_str(segment);
            self.keys.entry(path.to_lowercase()).or_insert_with(|| MemKey {
                name: path.clone(),
                values: BTreeMap::new(),
            });
        }
    }

    fn children(&self, key: &str) -> Vec<String> {
        let lower = normalize(key);
        let prefix = if lower.is_empty() {
            String::new()
        } else {
            format!("{lower}\\")
        };
        self.keys
            .iter()
            .filter_map(|(k, v)| {
                let rest = k.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('\\'))
                    .then(|| v.name.rsplit('\\').next().unwrap_or(&v.name).to_string())
            })
            .collect()
    }
}

/// An in-memory registry view. Clones share the same tree.
#[derive(Clone, Debug, Default)]
pub struct MemoryRegistry {
    tree: Arc<Mutex<MemTree>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write fails with [`RegistryError::AccessDenied`] while set.
    pub fn set_read_only(&self, read_only: bool) {
        self.lock().read_only = read_only;
    }

    fn lock(&self) -> MutexGuard<'_, MemTree> {
        // A poisoned tree is still structurally valid.
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn writable(&self, key: &str) -> Result<MutexGuard<'_, MemTree>, RegistryError> {
        let tree = self.lock();
        if tree.read_only {
            return Err(RegistryError::AccessDenied(key.to_string()));
        }
        Ok(tree)
    }
}

impl RegistryView for MemoryRegistry {
    fn get(&self, key: &str, value: &str) -> Result<Option<NativeValue>, RegistryError> {
        Ok(self
            .lock()
            .keys
            .get(&normalize(key))
            .and_then(|k| k.values.get(&value.to_lowercase()))
            .map(|(_, data)| data.clone()))
    }

    fn set(&self, key: &str, value: &str, data: NativeValue) -> Result<(), RegistryError> {
        if key.trim_matches('\\').contains("\\\\") {
            return Err(RegistryError::InvalidPath(key.to_string()));
        }
        let mut tree = self.writable(key)?;
        tree.ensure(key);
        if let Some(k) = tree.keys.get_mut(&normalize(key)) {
            k.values
                .insert(value.to_lowercase(), (value.to_string(), data));
        }
        Ok(())
    }

    fn delete_value(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        let mut tree = self.writable(key)?;
        if let Some(k) = tree.keys.get_mut(&normalize(key)) {
            k.values.remove(&value.to_lowercase());
        }
        Ok(())
    }

    fn value_names(&self, key: &str) -> Result<Vec<String>, RegistryError> {
        let tree = self.lock();
        let k = tree
            .keys
            .get(&normalize(key))
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
        Ok(k.values.values().map(|(name, _)| name.clone()).collect())
    }

    fn subkey_names(&self, key: &str) -> Result<Vec<String>, RegistryError> {
        let tree = self.lock();
        if !normalize(key).is_empty() && !tree.keys.contains_key(&normalize(key)) {
            return Err(RegistryError::NotFound(key.to_string()));
        }
        Ok(tree.children(key))
    }

    fn delete_empty_key(&self, key: &str) -> Result<(), RegistryError> {
        let mut tree = self.writable(key)?;
        let lower = normalize(key);
        let empty = tree
            .keys
            .get(&lower)
            .is_some_and(|k| k.values.is_empty())
            && tree.children(key).is_empty();
        if empty {
            tree.keys.remove(&lower);
        }
        Ok(())
    }

    fn key_exists(&self, key: &str) -> bool {
        let lower = normalize(key);
        lower.is_empty() || self.lock().keys.contains_key(&lower)
    }
}
