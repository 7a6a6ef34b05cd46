use crate::canonical::expand_hive;
use crate::error::RegTextError;
use crate::text;
use polstate_types::{
    PolicyReader, PolicySource, RegistryValue, RegistryValueType, SourceError, key_eq,
};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegValue {
    /// Empty for the default (`@`) value.
    pub name: String,
    pub kind: RegistryValueType,
    pub data: RegistryValue,
    /// `"name"=-`
    pub is_deleter: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegKey {
    /// Path relative to the file's prefix.
    pub name: String,
    /// `[-Key]`
    pub is_deleter: bool,
    pub values: Vec<RegValue>,
}

impl RegKey {
    fn new(name: &str, is_deleter: bool) -> Self {
        Self {
            name: name.trim_matches('\\').to_string(),
            is_deleter,
            values: Vec::new(),
        }
    }
}

/// An ordered collection of key sections, scoped to a prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegFile {
    prefix: String,
    keys: Vec<RegKey>,
}

fn covers(deleter: &str, key: &str) -> bool {
    if key_eq(deleter, key) {
        return true;
    }
    key.len() > deleter.len()
        && key.as_bytes()[deleter.len()] == b'\\'
        && key_eq(&key[..deleter.len()], deleter)
}

impl RegFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty file whose keys are written below `prefix` (for example `HKEY_LOCAL_MACHINE`).
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: expand_hive(prefix),
            keys: Vec::new(),
        }
    }

    /// Parse the whole text without scoping; keys keep their full path.
    pub fn parse(input: &str) -> Result<Self, RegTextError> {
        Self::parse_scoped(input, "")
    }

    /// Parse, keeping only sections at or below `prefix` and storing them relative to it.
    pub fn parse_scoped(input: &str, prefix: &str) -> Result<Self, RegTextError> {
        let mut file = RegFile::with_prefix(prefix);
        let mut skipping = false;
        for item in text::parse(input)? {
            match item {
                text::Item::Key { path, is_deleter } => {
                    let path = expand_hive(&path);
                    match file.strip_prefix(&path) {
                        Some(relative) => {
                            skipping = false;
                            file.keys.push(RegKey::new(relative, is_deleter));
                        }
                        None => {
                            debug!(key = %path, prefix = %file.prefix, "skipping key outside prefix");
                            skipping = true;
                        }
                    }
                }
                text::Item::Value { line, value } => {
                    if skipping {
                        continue;
                    }
                    let Some(section) = file.keys.last_mut() else {
                        return Err(RegTextError::syntax(line, "value before any key"));
                    };
                    section.values.push(value);
                }
            }
        }
        Ok(file)
    }

    /// Render as registry editor text.
    pub fn to_text(&self) -> String {
        text::write(self)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn keys(&self) -> &[RegKey] {
        &self.keys
    }

    /// Full path of a stored key, prefix included.
    pub fn full_path(&self, relative: &str) -> String {
        match (self.prefix.is_empty(), relative.is_empty()) {
            (true, _) => relative.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}\\{}", self.prefix, relative),
        }
    }

    fn strip_prefix<'p>(&self, path: &'p str) -> Option<&'p str> {
        let path = path.trim_matches('\\');
        if self.prefix.is_empty() {
            return Some(path);
        }
        if key_eq(path, &self.prefix) {
            return Some("");
        }
        if covers(&self.prefix, path) {
            return Some(&path[self.prefix.len() + 1..]);
        }
        None
    }

    /// Forward every section onto `target`: deleter keys clear, deleter values delete,
    /// everything else is set.
    pub fn apply<T>(&self, target: &mut T) -> Result<(), SourceError>
    where
        T: PolicySource + ?Sized,
    {
        for key in &self.keys {
            if key.is_deleter {
                target.clear_key(&key.name)?;
                continue;
            }
            for value in &key.values {
                if value.is_deleter {
                    target.delete_value(&key.name, &value.name)?;
                } else {
                    target.set_value(&key.name, &value.name, value.data.clone(), value.kind)?;
                }
            }
        }
        Ok(())
    }

    fn sections<'a, 'k>(&'a self, key: &'k str) -> impl Iterator<Item = &'a RegKey> + use<'a, 'k> {
        self.keys.iter().filter(move |k| key_eq(&k.name, key))
    }

    fn find_value(&self, key: &str, value: &str) -> Option<&RegValue> {
        self.sections(key)
            .filter(|k| !k.is_deleter)
            .flat_map(|k| k.values.iter())
            .filter(|v| !v.is_deleter && key_eq(&v.name, value))
            .last()
    }

    fn writable_section(&mut self, key: &str) -> &mut RegKey {
        let key = key.trim_matches('\\');
        let idx = match self
            .keys
            .iter()
            .rposition(|k| !k.is_deleter && key_eq(&k.name, key))
        {
            Some(idx) => idx,
            None => {
                self.keys.push(RegKey::new(key, false));
                self.keys.len() - 1
            }
        };
        &mut self.keys[idx]
    }
}

impl PolicyReader for RegFile {
    fn contains_value(&self, key: &str, value: &str) -> bool {
        !self.will_delete_value(key, value) && self.find_value(key, value).is_some()
    }

    fn get_value(&self, key: &str, value: &str) -> Option<RegistryValue> {
        if self.will_delete_value(key, value) {
            return None;
        }
        self.find_value(key, value).map(|v| v.data.clone())
    }

    // Sections are read top to bottom; a later literal cancels an earlier deleter.
    fn will_delete_value(&self, key: &str, value: &str) -> bool {
        let key = key.trim_matches('\\');
        let mut will_delete = false;
        for section in &self.keys {
            if section.is_deleter {
                if covers(&section.name, key) {
                    will_delete = true;
                }
                continue;
            }
            if !key_eq(&section.name, key) {
                continue;
            }
            for v in section.values.iter().filter(|v| key_eq(&v.name, value)) {
                will_delete = v.is_deleter;
            }
        }
        will_delete
    }

    fn value_names(&self, key: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for section in self.sections(key).filter(|k| !k.is_deleter) {
            for v in section.values.iter().filter(|v| !v.is_deleter) {
                if !names.iter().any(|n| key_eq(n, &v.name)) {
                    names.push(v.name.clone());
                }
            }
        }
        names
    }
}

impl PolicySource for RegFile {
    fn set_value(
        &mut self,
        key: &str,
        value: &str,
        data: RegistryValue,
        kind: RegistryValueType,
    ) -> Result<(), SourceError> {
        self.forget_value(key, value)?;
        self.writable_section(key).values.push(RegValue {
            name: value.to_string(),
            kind,
            data,
            is_deleter: false,
        });
        Ok(())
    }

    fn forget_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
        let key = key.trim_matches('\\');
        for section in self.keys.iter_mut().filter(|k| key_eq(&k.name, key)) {
            section.values.retain(|v| !key_eq(&v.name, value));
        }
        Ok(())
    }

    fn delete_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
        self.forget_value(key, value)?;
        if !self.will_delete_value(key, value) {
            self.writable_section(key).values.push(RegValue {
                name: value.to_string(),
                kind: RegistryValueType::None,
                data: RegistryValue::None,
                is_deleter: true,
            });
        }
        Ok(())
    }

    fn clear_key(&mut self, key: &str) -> Result<(), SourceError> {
        let key = key.trim_matches('\\');
        self.keys.retain(|k| !covers(key, &k.name));
        self.keys.push(RegKey::new(key, true));
        Ok(())
    }

    fn forget_key_clearance(&mut self, key: &str) -> Result<(), SourceError> {
        let key = key.trim_matches('\\');
        self.keys.retain(|k| !(k.is_deleter && key_eq(&k.name, key)));
        Ok(())
    }
}
