use serde::{Deserialize, Serialize};

/// Registry value types understood by the engine.
///
/// The numeric codes match the on-disk `REG_*` constants used by policy files and
/// registry text exports (`hex(<code>)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryValueType {
    None,
    String,
    ExpandString,
    MultiString,
    DWord,
    QWord,
    Binary,
}

impl RegistryValueType {
    pub fn code(self) -> u32 {
        match self {
            RegistryValueType::None => 0,
            RegistryValueType::String => 1,
            RegistryValueType::ExpandString => 2,
            RegistryValueType::Binary => 3,
            RegistryValueType::DWord => 4,
            RegistryValueType::MultiString => 7,
            RegistryValueType::QWord => 11,
        }
    }

    /// Map a raw `REG_*` code. Codes outside the taxonomy return `None`; callers
    /// treat those payloads as opaque bytes.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(RegistryValueType::None),
            1 => Some(RegistryValueType::String),
            2 => Some(RegistryValueType::ExpandString),
            3 => Some(RegistryValueType::Binary),
            4 => Some(RegistryValueType::DWord),
            7 => Some(RegistryValueType::MultiString),
            11 => Some(RegistryValueType::QWord),
            _ => None,
        }
    }

    pub fn is_text(self) -> bool {
        matches!(
            self,
            RegistryValueType::String | RegistryValueType::ExpandString
        )
    }
}

/// A typed registry value as seen by the engine.
///
/// Numbers are always unsigned here; backends with signed native storage
/// reinterpret the bits on the way in and out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum RegistryValue {
    None,
    DWord(u32),
    QWord(u64),
    Text(String),
    MultiText(Vec<String>),
    Bytes(Vec<u8>),
}

impl RegistryValue {
    /// The registry type this value is written as when the caller has no preference.
    pub fn natural_type(&self) -> RegistryValueType {
        match self {
            RegistryValue::None => RegistryValueType::None,
            RegistryValue::DWord(_) => RegistryValueType::DWord,
            RegistryValue::QWord(_) => RegistryValueType::QWord,
            RegistryValue::Text(_) => RegistryValueType::String,
            RegistryValue::MultiText(_) => RegistryValueType::MultiString,
            RegistryValue::Bytes(_) => RegistryValueType::Binary,
        }
    }

    /// Numeric view used by descriptor matching: DWord and QWord both qualify.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            RegistryValue::DWord(v) => Some(u64::from(*v)),
            RegistryValue::QWord(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RegistryValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_multi_text(&self) -> Option<&[String]> {
        match self {
            RegistryValue::MultiText(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

impl From<u32> for RegistryValue {
    fn from(value: u32) -> Self {
        RegistryValue::DWord(value)
    }
}

impl From<u64> for RegistryValue {
    fn from(value: u64) -> Self {
        RegistryValue::QWord(value)
    }
}

impl From<&str> for RegistryValue {
    fn from(value: &str) -> Self {
        RegistryValue::Text(value.to_string())
    }
}

impl From<String> for RegistryValue {
    fn from(value: String) -> Self {
        RegistryValue::Text(value)
    }
}

impl From<Vec<String>> for RegistryValue {
    fn from(value: Vec<String>) -> Self {
        RegistryValue::MultiText(value)
    }
}
