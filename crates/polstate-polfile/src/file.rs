use crate::error::PolFileError;
use crate::format;
use crate::tombstone::{
    DELETE_VALUE_PREFIX, DELETE_VALUES, DELVALS_MARKER, DELVALS_PREFIX, MARKER_PREFIX, Tombstone,
    split_name_list,
};
use polstate_types::codec::{decode_utf16z, decode_value, encode_utf16z, encode_value};
use polstate_types::{
    PolicyReader, PolicySource, RegistryValue, RegistryValueType, SourceError, is_policy_key,
    join_key,
};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const COMPOSITE_SEP: &str = "\\\\";

/// Raw stored form of one entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolEntry {
    pub kind: u32,
    pub data: Vec<u8>,
}

impl PolEntry {
    pub fn typed(&self) -> RegistryValue {
        decode_value(self.kind, &self.data)
    }
}

/// Borrowed view of an entry with its original casing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolEntryRef<'a> {
    pub key: &'a str,
    pub value: &'a str,
    pub entry: &'a PolEntry,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct CasedName {
    key: String,
    value: String,
}

/// In-memory registry policy file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolFile {
    entries: BTreeMap<String, PolEntry>,
    casing: HashMap<String, CasedName>,
}

fn normalize_key(key: &str) -> &str {
    key.trim_matches('\\')
}

fn composite(key: &str, value: &str) -> String {
    format!("{}{}{}", normalize_key(key), COMPOSITE_SEP, value).to_lowercase()
}

fn composite_prefix(key: &str) -> String {
    composite(key, "")
}

fn marker_entry() -> PolEntry {
    PolEntry {
        kind: RegistryValueType::String.code(),
        data: encode_utf16z(" "),
    }
}

impl PolFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a complete policy file. Bad signatures and versions fail fast.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PolFileError> {
        let mut pol = PolFile::new();
        for raw in format::parse(bytes)? {
            pol.insert(&raw.key, &raw.value, PolEntry {
                kind: raw.kind,
                data: raw.data,
            });
        }
        debug!(entries = pol.len(), "parsed policy file");
        Ok(pol)
    }

    /// Serialize in the map's sorted order with original casing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        format::write_header(&mut out);
        for item in self.iter() {
            format::write_entry(&mut out, item.key, item.value, item.entry.kind, &item.entry.data);
        }
        out
    }

    /// A structurally identical copy made by a full serialize and reparse.
    pub fn duplicate(&self) -> Result<Self, PolFileError> {
        PolFile::from_bytes(&self.to_bytes())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, tombstones included, in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = PolEntryRef<'_>> {
        self.entries.iter().filter_map(|(k, entry)| {
            let cased = self.casing.get(k)?;
            Some(PolEntryRef {
                key: &cased.key,
                value: &cased.value,
                entry,
            })
        })
    }

    /// Value names under `key` including deletion markers.
    pub fn value_names_with_markers(&self, key: &str) -> Vec<String> {
        self.under(key)
            .filter_map(|(k, _)| self.casing.get(k).map(|c| c.value.clone()))
            .collect()
    }

    fn under<'s>(&'s self, key: &str) -> impl Iterator<Item = (&'s String, &'s PolEntry)> + use<'s> {
        let prefix = composite_prefix(key);
        self.entries
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&prefix))
    }

    fn insert(&mut self, key: &str, value: &str, entry: PolEntry) {
        let dict_key = composite(key, value);
        self.casing.entry(dict_key.clone()).or_insert_with(|| CasedName {
            key: normalize_key(key).to_string(),
            value: value.to_string(),
        });
        self.entries.insert(dict_key, entry);
    }

    fn remove(&mut self, key: &str, value: &str) -> bool {
        let dict_key = composite(key, value);
        self.casing.remove(&dict_key);
        self.entries.remove(&dict_key).is_some()
    }

    /// Forward this snapshot onto `target`, then forget policy locations that were
    /// present in `old` but are gone now.
    ///
    /// Tombstones become delete/clear calls; list payloads are expanded. Locations
    /// outside the recognized policy roots are never forgotten.
    pub fn apply_difference<T>(&self, old: Option<&PolFile>, target: &mut T) -> Result<(), SourceError>
    where
        T: PolicySource + ?Sized,
    {
        let mut forwarded = 0usize;
        for item in self.iter() {
            let (key, value) = (item.key, item.value);
            match Tombstone::parse(value) {
                Some(Tombstone::DeleteValue(name)) => target.delete_value(key, name)?,
                Some(Tombstone::DeleteAllValues) => target.clear_key(key)?,
                Some(Tombstone::DeleteValueList) => {
                    let payload = decode_utf16z(&item.entry.data);
                    for name in split_name_list(&payload) {
                        target.delete_value(key, name)?;
                    }
                }
                Some(Tombstone::DeleteKeyList) => {
                    let payload = decode_utf16z(&item.entry.data);
                    for sub in split_name_list(&payload) {
                        target.clear_key(&join_key(key, sub))?;
                    }
                }
                Some(Tombstone::Unknown) => {
                    debug!(key, value, "skipping unrecognized marker");
                    continue;
                }
                None => {
                    let kind = match RegistryValueType::from_code(item.entry.kind) {
                        Some(kind) => kind,
                        None => {
                            debug!(
                                key,
                                value,
                                code = item.entry.kind,
                                "forwarding unsupported value type as binary"
                            );
                            RegistryValueType::Binary
                        }
                    };
                    target.set_value(key, value, item.entry.typed(), kind)?;
                }
            }
            forwarded += 1;
        }

        let mut forgotten = 0usize;
        if let Some(old) = old {
            for (dict_key, _) in old.entries.iter() {
                if self.entries.contains_key(dict_key) {
                    continue;
                }
                let Some(cased) = old.casing.get(dict_key) else {
                    continue;
                };
                if cased.value.starts_with(MARKER_PREFIX) || !is_policy_key(&cased.key) {
                    continue;
                }
                target.forget_value(&cased.key, &cased.value)?;
                forgotten += 1;
            }
        }
        debug!(forwarded, forgotten, "applied policy file difference");
        Ok(())
    }

    /// Forward every entry onto `target` with nothing to forget.
    pub fn apply<T>(&self, target: &mut T) -> Result<(), SourceError>
    where
        T: PolicySource + ?Sized,
    {
        self.apply_difference(None, target)
    }
}

impl PolicyReader for PolFile {
    fn contains_value(&self, key: &str, value: &str) -> bool {
        self.entries.contains_key(&composite(key, value)) && !self.will_delete_value(key, value)
    }

    fn get_value(&self, key: &str, value: &str) -> Option<RegistryValue> {
        if !self.contains_value(key, value) {
            return None;
        }
        self.entries.get(&composite(key, value)).map(PolEntry::typed)
    }

    // Entries are visited in sorted order and the last applicable one wins: a
    // literal value sorting after a marker cancels that marker.
    fn will_delete_value(&self, key: &str, value: &str) -> bool {
        let prefix = composite_prefix(key);
        let literal = composite(key, value);
        let single = composite(key, &format!("{DELETE_VALUE_PREFIX}{value}"));
        let lower_value = value.to_lowercase();

        let mut will_delete = false;
        for (dict_key, entry) in self.under(key) {
            let name = &dict_key[prefix.len()..];
            if name.starts_with(DELVALS_PREFIX) {
                will_delete = true;
            } else if *dict_key == single {
                will_delete = true;
            } else if name.starts_with(DELETE_VALUES) {
                let payload = decode_utf16z(&entry.data).to_lowercase();
                if split_name_list(&payload).any(|n| n == lower_value) {
                    will_delete = true;
                }
            } else if *dict_key == literal {
                will_delete = false;
            }
        }
        will_delete
    }

    fn value_names(&self, key: &str) -> Vec<String> {
        self.value_names_with_markers(key)
            .into_iter()
            .filter(|name| !name.starts_with(MARKER_PREFIX))
            .collect()
    }
}

impl PolicySource for PolFile {
    fn set_value(
        &mut self,
        key: &str,
        value: &str,
        data: RegistryValue,
        kind: RegistryValueType,
    ) -> Result<(), SourceError> {
        self.remove(key, &format!("{DELETE_VALUE_PREFIX}{value}"));
        self.remove(key, value);
        self.insert(key, value, PolEntry {
            kind: kind.code(),
            data: encode_value(&data, kind),
        });
        Ok(())
    }

    fn forget_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
        self.remove(key, value);
        self.remove(key, &format!("{DELETE_VALUE_PREFIX}{value}"));
        Ok(())
    }

    fn delete_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
        self.forget_value(key, value)?;
        if !self.will_delete_value(key, value) {
            self.insert(key, &format!("{DELETE_VALUE_PREFIX}{value}"), marker_entry());
        }
        Ok(())
    }

    fn clear_key(&mut self, key: &str) -> Result<(), SourceError> {
        let doomed: Vec<String> = self.under(key).map(|(k, _)| k.clone()).collect();
        for dict_key in doomed {
            self.casing.remove(&dict_key);
            self.entries.remove(&dict_key);
        }
        self.insert(key, DELVALS_MARKER, marker_entry());
        Ok(())
    }

    fn forget_key_clearance(&mut self, key: &str) -> Result<(), SourceError> {
        let prefix = composite_prefix(key);
        let markers: Vec<String> = self
            .under(key)
            .filter(|(k, _)| k[prefix.len()..].starts_with(DELVALS_PREFIX))
            .map(|(k, _)| k.clone())
            .collect();
        for dict_key in markers {
            self.casing.remove(&dict_key);
            self.entries.remove(&dict_key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tombstone::DELETE_KEYS;

    const KEY: &str = "Software\\Policies\\Contoso";

    fn dword(pol: &mut PolFile, key: &str, value: &str, v: u32) {
        pol.set_value(key, value, RegistryValue::DWord(v), RegistryValueType::DWord)
            .expect("set");
    }

    fn raw_marker(pol: &mut PolFile, key: &str, name: &str, payload: &str) {
        pol.insert(key, name, PolEntry {
            kind: RegistryValueType::String.code(),
            data: encode_utf16z(payload),
        });
    }

    /// Records every call so diff application can be asserted on.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl PolicyReader for Recorder {
        fn contains_value(&self, _: &str, _: &str) -> bool {
            false
        }
        fn get_value(&self, _: &str, _: &str) -> Option<RegistryValue> {
            None
        }
        fn will_delete_value(&self, _: &str, _: &str) -> bool {
            false
        }
        fn value_names(&self, _: &str) -> Vec<String> {
            Vec::new()
        }
    }

    impl PolicySource for Recorder {
        fn set_value(
            &mut self,
            key: &str,
            value: &str,
            data: RegistryValue,
            _: RegistryValueType,
        ) -> Result<(), SourceError> {
            self.calls.push(format!("set {key}|{value}={data:?}"));
            Ok(())
        }
        fn forget_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
            self.calls.push(format!("forget {key}|{value}"));
            Ok(())
        }
        fn delete_value(&mut self, key: &str, value: &str) -> Result<(), SourceError> {
            self.calls.push(format!("delete {key}|{value}"));
            Ok(())
        }
        fn clear_key(&mut self, key: &str) -> Result<(), SourceError> {
            self.calls.push(format!("clear {key}"));
            Ok(())
        }
        fn forget_key_clearance(&mut self, key: &str) -> Result<(), SourceError> {
            self.calls.push(format!("unclear {key}"));
            Ok(())
        }
    }

    #[test]
    fn unsupported_type_codes_forward_their_bytes_as_binary() {
        let mut pol = PolFile::new();
        pol.insert(KEY, "Resource", PolEntry {
            kind: 9,
            data: vec![1, 2, 3],
        });
        let mut target = PolFile::new();
        pol.apply(&mut target).expect("apply");

        let forwarded = target.iter().next().expect("entry");
        assert_eq!(forwarded.entry.kind, RegistryValueType::Binary.code());
        assert_eq!(forwarded.entry.data, vec![1, 2, 3]);
    }
    #[test]
    fn set_then_read_back_ignores_case() {
        let mut pol = PolFile::new();
        dword(&mut pol, KEY, "Enabled", 1);
        assert!(pol.contains_value("software\\policies\\CONTOSO", "ENABLED"));
        assert_eq!(
            pol.get_value(KEY, "enabled"),
            Some(RegistryValue::DWord(1))
        );
        assert_eq!(pol.value_names(KEY), vec!["Enabled".to_string()]);
    }

    #[test]
    fn delete_records_a_marker_and_hides_the_value() {
        let mut pol = PolFile::new();
        dword(&mut pol, KEY, "Enabled", 1);
        pol.delete_value(KEY, "Enabled").expect("delete");

        assert!(!pol.contains_value(KEY, "Enabled"));
        assert_eq!(pol.get_value(KEY, "Enabled"), None);
        assert!(pol.will_delete_value(KEY, "Enabled"));
        assert!(pol.value_names(KEY).is_empty());
        assert_eq!(
            pol.value_names_with_markers(KEY),
            vec!["**del.Enabled".to_string()]
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let mut once = PolFile::new();
        dword(&mut once, KEY, "Enabled", 1);
        once.delete_value(KEY, "Enabled").expect("delete");

        let mut twice = once.clone();
        twice.delete_value(KEY, "Enabled").expect("delete again");

        assert_eq!(once.to_bytes(), twice.to_bytes());
    }

    #[test]
    fn set_clears_a_previous_deletion_marker() {
        let mut pol = PolFile::new();
        pol.delete_value(KEY, "Enabled").expect("delete");
        dword(&mut pol, KEY, "Enabled", 0);
        assert!(!pol.will_delete_value(KEY, "Enabled"));
        assert_eq!(pol.len(), 1);
    }

    #[test]
    fn forget_drops_data_and_marker() {
        let mut pol = PolFile::new();
        pol.delete_value(KEY, "A").expect("delete");
        dword(&mut pol, KEY, "B", 2);
        pol.forget_value(KEY, "A").expect("forget");
        pol.forget_value(KEY, "B").expect("forget");
        assert!(pol.is_empty());
        assert!(!pol.will_delete_value(KEY, "A"));
    }

    #[test]
    fn clear_key_marks_every_value_and_later_literals_win() {
        let mut pol = PolFile::new();
        dword(&mut pol, KEY, "Old", 1);
        pol.clear_key(KEY).expect("clear");

        assert!(pol.will_delete_value(KEY, "Old"));
        assert!(pol.will_delete_value(KEY, "Anything"));
        assert!(pol.will_delete_value(KEY, ""));
        assert_eq!(
            pol.value_names_with_markers(KEY),
            vec!["**delvals.".to_string()]
        );

        // "new" sorts after "**delvals." so the literal cancels the key-level marker.
        dword(&mut pol, KEY, "New", 5);
        assert!(!pol.will_delete_value(KEY, "New"));
        assert!(pol.contains_value(KEY, "New"));
        assert!(pol.will_delete_value(KEY, "Other"));
    }

    #[test]
    fn literal_sorting_before_a_marker_does_not_cancel_it() {
        let mut pol = PolFile::new();
        // '!' (0x21) sorts before '*' (0x2a), so the marker is visited last.
        dword(&mut pol, KEY, "!early", 1);
        pol.clear_key(KEY).expect("clear");
        dword(&mut pol, KEY, "!early", 1);
        assert!(pol.will_delete_value(KEY, "!early"));
        assert!(!pol.contains_value(KEY, "!early"));
    }

    #[test]
    fn forget_key_clearance_removes_only_the_key_marker() {
        let mut pol = PolFile::new();
        pol.clear_key(KEY).expect("clear");
        dword(&mut pol, KEY, "Kept", 1);
        pol.forget_key_clearance(KEY).expect("unclear");
        assert!(!pol.will_delete_value(KEY, "Other"));
        assert_eq!(pol.value_names(KEY), vec!["Kept".to_string()]);
    }

    #[test]
    fn delete_values_payload_marks_listed_names() {
        let mut pol = PolFile::new();
        raw_marker(&mut pol, KEY, "**deletevalues", "Alpha;beta");
        assert!(pol.will_delete_value(KEY, "alpha"));
        assert!(pol.will_delete_value(KEY, "Beta"));
        assert!(!pol.will_delete_value(KEY, "Gamma"));
    }

    #[test]
    fn subkeys_do_not_leak_into_parent_queries() {
        let mut pol = PolFile::new();
        pol.clear_key(&format!("{KEY}\\Sub")).expect("clear");
        dword(&mut pol, &format!("{KEY}\\Sub"), "X", 1);
        assert!(!pol.will_delete_value(KEY, "X"));
        assert!(pol.value_names(KEY).is_empty());
    }

    #[test]
    fn casing_is_preserved_on_serialization() {
        let mut pol = PolFile::new();
        pol.set_value(
            KEY,
            "DisplayName",
            RegistryValue::from("Hello"),
            RegistryValueType::String,
        )
        .expect("set");
        let reparsed = PolFile::from_bytes(&pol.to_bytes()).expect("parse");
        let item = reparsed.iter().next().expect("one entry");
        assert_eq!(item.key, KEY);
        assert_eq!(item.value, "DisplayName");
        assert_eq!(item.entry.typed(), RegistryValue::from("Hello"));
    }

    #[test]
    fn duplicate_is_structurally_identical() {
        let mut pol = PolFile::new();
        dword(&mut pol, KEY, "A", 1);
        pol.delete_value(KEY, "B").expect("delete");
        pol.clear_key(&format!("{KEY}\\List")).expect("clear");
        let copy = pol.duplicate().expect("duplicate");
        assert_eq!(copy, pol);
    }

    #[test]
    fn apply_forwards_each_entry_kind() {
        let mut pol = PolFile::new();
        dword(&mut pol, KEY, "Enabled", 1);
        pol.delete_value(KEY, "Gone").expect("delete");
        pol.clear_key(&format!("{KEY}\\List")).expect("clear");
        raw_marker(&mut pol, KEY, DELETE_VALUES, "x;y");
        raw_marker(&mut pol, KEY, DELETE_KEYS, "Child");

        let mut rec = Recorder::default();
        pol.apply(&mut rec).expect("apply");

        assert_eq!(
            rec.calls,
            vec![
                format!("delete {KEY}|Gone"),
                format!("clear {KEY}\\Child"),
                format!("delete {KEY}|x"),
                format!("delete {KEY}|y"),
                format!("set {KEY}|Enabled=DWord(1)"),
                format!("clear {KEY}\\List"),
            ]
        );
    }

    #[test]
    fn apply_difference_forgets_only_stale_policy_locations() {
        let mut old = PolFile::new();
        dword(&mut old, KEY, "Stale", 1);
        dword(&mut old, KEY, "Kept", 1);
        dword(&mut old, "Software\\Contoso\\App", "Unrelated", 1);
        old.delete_value(KEY, "Marker").expect("delete");

        let mut new = PolFile::new();
        dword(&mut new, KEY, "Kept", 2);

        let mut rec = Recorder::default();
        new.apply_difference(Some(&old), &mut rec).expect("apply");

        assert_eq!(
            rec.calls,
            vec![
                format!("set {KEY}|Kept=DWord(2)"),
                format!("forget {KEY}|Stale"),
            ]
        );
    }

    #[test]
    fn apply_difference_onto_another_pol_file() {
        let mut old = PolFile::new();
        dword(&mut old, KEY, "Stale", 1);
        let mut live = old.duplicate().expect("duplicate");

        let mut new = PolFile::new();
        dword(&mut new, KEY, "Fresh", 3);
        new.apply_difference(Some(&old), &mut live).expect("apply");

        assert!(!live.contains_value(KEY, "Stale"));
        assert_eq!(live.get_value(KEY, "Fresh"), Some(RegistryValue::DWord(3)));
    }
}
