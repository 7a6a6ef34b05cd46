use crate::registry::{NativeValue, RegistryError, RegistryView};
use polstate_types::{
    PolicyReader, PolicySource, RegistryValue, RegistryValueType, SourceError, join_key,
    split_leaf,
};
use std::sync::Arc;
use tracing::debug;

/// A policy source backed by a live registry view.
///
/// Deletions happen immediately, so nothing is ever pending deletion. Keys passed in
/// are relative to `base`.
pub struct LiveRegistrySource {
    view: Arc<dyn RegistryView>,
    base: String,
}

fn to_native(data: RegistryValue, kind: RegistryValueType) -> NativeValue {
    match (data, kind) {
        (RegistryValue::DWord(n), _) => NativeValue::DWord(n.cast_signed()),
        (RegistryValue::QWord(n), _) => NativeValue::QWord(n.cast_signed()),
        (RegistryValue::Text(text), RegistryValueType::ExpandString) => {
            NativeValue::ExpandString(text)
        }
        (RegistryValue::Text(text), _) => NativeValue::String(text),
        (RegistryValue::MultiText(lines), _) => NativeValue::MultiString(lines),
        (RegistryValue::Bytes(data), kind) => NativeValue::Binary {
            kind: kind.code(),
            data,
        },
        (RegistryValue::None, kind) => NativeValue::Binary {
            kind: kind.code(),
            data: Vec::new(),
        },
    }
}

fn from_native(data: NativeValue) -> RegistryValue {
    match data {
        NativeValue::DWord(n) => RegistryValue::DWord(n.cast_unsigned()),
        NativeValue::QWord(n) => RegistryValue::QWord(n.cast_unsigned()),
        NativeValue::String(text) | NativeValue::ExpandString(text) => RegistryValue::Text(text),
        NativeValue::MultiString(lines) => RegistryValue::MultiText(lines),
        NativeValue::Binary { kind: 0, data } if data.is_empty() => RegistryValue::None,
        NativeValue::Binary { data, .. } => RegistryValue::Bytes(data),
    }
}

fn write_error(key: &str, err: RegistryError) -> SourceError {
    match err {
        RegistryError::AccessDenied(_) => SourceError::ReadOnly,
        other => SourceError::Registry {
            key: key.to_string(),
            message: other.to_string(),
        },
    }
}

impl LiveRegistrySource {
    pub fn new(view: Arc<dyn RegistryView>, base: impl Into<String>) -> Self {
        Self {
            view,
            base: base.into().trim_matches('\\').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn path(&self, key: &str) -> String {
        join_key(&self.base, key)
    }

    /// Write then remove a scratch value under `key`, removing any keys the write
    /// created. Any failure reads as not writable.
    pub fn probe_writable(&self, key: &str) -> bool {
        const PROBE: &str = "polstate-write-probe";
        let path = self.path(key);
        let mut created = Vec::new();
        let mut cursor = Some(path.as_str());
        while let Some(current) = cursor.filter(|k| !k.is_empty() && !self.view.key_exists(k)) {
            created.push(current.to_string());
            cursor = split_leaf(current).0;
        }
        let result = self
            .view
            .set(&path, PROBE, NativeValue::DWord(0))
            .and_then(|()| self.view.delete_value(&path, PROBE))
            .and_then(|()| {
                created
                    .iter()
                    .try_for_each(|k| self.view.delete_empty_key(k))
            });
        debug!(key = %path, writable = result.is_ok(), "probed registry view");
        result.is_ok()
    }
}

impl PolicyReader for LiveRegistrySource {
    fn contains_value(&self, key: &str, value: &str) -> bool {
        matches!(self.view.get(&self.path(key), value), Ok(Some(_)))
    }

    fn get_value(&self, key: &str, value: &str) -> Option<RegistryValue> {
        self.view
            .get(&self.path(key), value)
            .ok()
            .flatten()
            .map(from_native)
    }

    fn will_delete_value(&self, _key: &str, _value: &str) -> bool {
        false
    }

    fn value_names(&self, key: &str) -> Vec<String> {
        self.view.value_names(&self.path(key)).unwrap_or_default()
    }
}

impl PolicySource for LiveRegistrySource {
    fn set_value(
        &mut self,
        key: &str,
        value: &str,
        data: RegistryValue,
        kind: RegistryValueType,
    ) -> Result<(), SourceError> {
        let path = self.path(key);
        debug!(key = %path, value, "registry set");
        self.view
            .set(&path, value, to_native(data, kind))
            .map_err(|err| write_error(&path, err))
    }

    fn forget_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
        self.delete_value(key, value)
    }

    fn delete_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
        let path = self.path(key);
        if !self.view.key_exists(&path) {
            return Ok(());
        }
        debug!(key = %path, value, "registry delete");
        self.view
            .delete_value(&path, value)
            .and_then(|()| self.view.delete_empty_key(&path))
            .map_err(|err| write_error(&path, err))
    }

    fn clear_key(&mut self, key: &str) -> Result<(), SourceError> {
        let path = self.path(key);
        let Ok(names) = self.view.value_names(&path) else {
            return Ok(());
        };
        debug!(key = %path, values = names.len(), "registry clear");
        for name in names {
            self.view
                .delete_value(&path, &name)
                .map_err(|err| write_error(&path, err))?;
        }
        self.view
            .delete_empty_key(&path)
            .map_err(|err| write_error(&path, err))
    }

    fn forget_key_clearance(&mut self, _key: &str) -> Result<(), SourceError> {
        Ok(())
    }
}
