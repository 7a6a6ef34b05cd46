//! Raw byte encodings of typed registry values.
//!
//! Layouts follow the registry's native storage:
//! - DWord/QWord: fixed-width little-endian
//! - String/ExpandString: UTF-16LE with a trailing NUL
//! - MultiString: each string NUL-terminated, then one extra NUL
//! - everything else: the bytes as-is

use crate::value::{RegistryValue, RegistryValueType};

pub fn encode_utf16z(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity((text.len() + 1) * 2);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn encode_multi_utf16(items: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        out.extend(encode_utf16z(item));
    }
    out.extend_from_slice(&[0, 0]);
    out
}

/// Decode UTF-16LE, dropping a dangling odd byte.
pub fn decode_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

pub fn decode_utf16z(bytes: &[u8]) -> String {
    decode_utf16(bytes).trim_end_matches('\0').to_string()
}

pub fn decode_multi_utf16(bytes: &[u8]) -> Vec<String> {
    let text = decode_utf16(bytes);
    let mut items: Vec<String> = text.split('\0').map(str::to_string).collect();
    while items.last().is_some_and(|s| s.is_empty()) {
        items.pop();
    }
    items
}

/// Encode `data` as the declared registry `kind`, converting loosely when the
/// value's own shape differs (numbers rendered as text, text parsed as numbers).
pub fn encode_value(data: &RegistryValue, kind: RegistryValueType) -> Vec<u8> {
    match kind {
        RegistryValueType::DWord => {
            // Numbers too wide for a DWord saturate rather than wrap.
            let n = u32::try_from(coerce_number(data)).unwrap_or(u32::MAX);
            n.to_le_bytes().to_vec()
        }
        RegistryValueType::QWord => coerce_number(data).to_le_bytes().to_vec(),
        RegistryValueType::String | RegistryValueType::ExpandString => match data {
            RegistryValue::MultiText(items) => encode_utf16z(&items.join("\n")),
            RegistryValue::Bytes(bytes) => bytes.clone(),
            other => encode_utf16z(&coerce_text(other)),
        },
        RegistryValueType::MultiString => match data {
            RegistryValue::MultiText(items) => encode_multi_utf16(items),
            RegistryValue::Bytes(bytes) => bytes.clone(),
            RegistryValue::None => encode_multi_utf16(&[]),
            other => encode_multi_utf16(&[coerce_text(other)]),
        },
        RegistryValueType::Binary | RegistryValueType::None => match data {
            RegistryValue::Bytes(bytes) => bytes.clone(),
            RegistryValue::None => Vec::new(),
            RegistryValue::DWord(v) => v.to_le_bytes().to_vec(),
            RegistryValue::QWord(v) => v.to_le_bytes().to_vec(),
            RegistryValue::Text(s) => encode_utf16z(s),
            RegistryValue::MultiText(items) => encode_multi_utf16(items),
        },
    }
}

/// Decode raw bytes stored under a `REG_*` code. Unknown codes come back as bytes.
pub fn decode_value(code: u32, bytes: &[u8]) -> RegistryValue {
    match RegistryValueType::from_code(code) {
        Some(RegistryValueType::String | RegistryValueType::ExpandString) => {
            RegistryValue::Text(decode_utf16z(bytes))
        }
        Some(RegistryValueType::DWord) => {
            let mut buf = [0u8; 4];
            let n = bytes.len().min(4);
            buf[..n].copy_from_slice(&bytes[..n]);
            RegistryValue::DWord(u32::from_le_bytes(buf))
        }
        Some(RegistryValueType::QWord) => {
            let mut buf = [0u8; 8];
            let n = bytes.len().min(8);
            buf[..n].copy_from_slice(&bytes[..n]);
            RegistryValue::QWord(u64::from_le_bytes(buf))
        }
        Some(RegistryValueType::MultiString) => {
            RegistryValue::MultiText(decode_multi_utf16(bytes))
        }
        Some(RegistryValueType::None) if bytes.is_empty() => RegistryValue::None,
        _ => RegistryValue::Bytes(bytes.to_vec()),
    }
}

fn coerce_number(data: &RegistryValue) -> u64 {
    match data {
        RegistryValue::DWord(v) => u64::from(*v),
        RegistryValue::QWord(v) => *v,
        RegistryValue::Text(s) => s.trim().parse().unwrap_or(0),
        RegistryValue::Bytes(bytes) => {
            let mut buf = [0u8; 8];
            let n = bytes.len().min(8);
            buf[..n].copy_from_slice(&bytes[..n]);
            u64::from_le_bytes(buf)
        }
        RegistryValue::None | RegistryValue::MultiText(_) => 0,
    }
}

fn coerce_text(data: &RegistryValue) -> String {
    match data {
        RegistryValue::Text(s) => s.clone(),
        RegistryValue::DWord(v) => v.to_string(),
        RegistryValue::QWord(v) => v.to_string(),
        RegistryValue::MultiText(items) => items.join("\n"),
        RegistryValue::Bytes(bytes) => decode_utf16z(bytes),
        RegistryValue::None => String::new(),
    }
}
