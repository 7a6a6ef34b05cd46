//! Line grammar of registry editor text.

use crate::canonical::canonicalize_key;
use crate::error::RegTextError;
use crate::file::{RegFile, RegValue};
use polstate_types::codec::{decode_value, encode_value};
use polstate_types::{RegistryValue, RegistryValueType};

pub const HEADER: &str = "Windows Registry Editor Version 5.00";
const LEGACY_HEADER: &str = "REGEDIT4";

/// Hex byte streams wrap before a line would pass this column.
pub const WRAP_COLUMN: usize = 78;

pub(crate) enum Item {
    Key { path: String, is_deleter: bool },
    Value { line: usize, value: RegValue },
}

/// Logical lines with continuations folded in, numbered by their first physical line.
fn logical_lines(input: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (idx, raw) in input.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        let (number, mut acc) = match pending.take() {
            Some((n, acc)) => (n, acc + line.trim_start()),
            None => (idx + 1, line.to_string()),
        };
        if acc.ends_with('\\') && !acc.trim_start().starts_with('[') {
            acc.pop();
            pending = Some((number, acc));
        } else {
            out.push((number, acc));
        }
    }
    if let Some(rest) = pending {
        out.push(rest);
    }
    out
}

pub(crate) fn parse(input: &str) -> Result<Vec<Item>, RegTextError> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut lines = logical_lines(input).into_iter();

    let header = lines
        .by_ref()
        .find(|(_, l)| !l.trim().is_empty())
        .ok_or(RegTextError::BadHeader)?;
    let header = header.1.trim();
    if header != HEADER && header != LEGACY_HEADER {
        return Err(RegTextError::BadHeader);
    }

    let mut items = Vec::new();
    for (number, line) in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[') {
            let section = section
                .strip_suffix(']')
                .ok_or_else(|| RegTextError::syntax(number, "unterminated key header"))?;
            let (path, is_deleter) = match section.strip_prefix('-') {
                Some(path) => (path, true),
                None => (section, false),
            };
            items.push(Item::Key {
                path: path.to_string(),
                is_deleter,
            });
            continue;
        }
        items.push(Item::Value {
            line: number,
            value: parse_value_line(number, line)?,
        });
    }
    Ok(items)
}

fn parse_value_line(number: usize, line: &str) -> Result<RegValue, RegTextError> {
    let (name, rest) = if let Some(rest) = line.strip_prefix('@') {
        (String::new(), rest)
    } else if let Some(rest) = line.strip_prefix('"') {
        read_quoted(rest).ok_or_else(|| RegTextError::syntax(number, "unterminated value name"))?
    } else {
        return Err(RegTextError::syntax(number, "expected a value name"));
    };

    let literal = rest
        .trim_start()
        .strip_prefix('=')
        .ok_or_else(|| RegTextError::syntax(number, "expected '=' after value name"))?
        .trim();

    if literal == "-" {
        return Ok(RegValue {
            name,
            kind: RegistryValueType::None,
            data: RegistryValue::None,
            is_deleter: true,
        });
    }

    let (kind, data) = parse_literal(literal)
        .map_err(|message| RegTextError::syntax(number, message))?;
    Ok(RegValue {
        name,
        kind,
        data,
        is_deleter: false,
    })
}

fn parse_literal(literal: &str) -> Result<(RegistryValueType, RegistryValue), String> {
    if let Some(rest) = literal.strip_prefix('"') {
        let (text, tail) = read_quoted(rest).ok_or("unterminated string")?;
        if !tail.trim().is_empty() {
            return Err(format!("unexpected text after string: {}", tail.trim()));
        }
        return Ok((RegistryValueType::String, RegistryValue::Text(text)));
    }

    let lower = literal.to_ascii_lowercase();
    if let Some(digits) = lower.strip_prefix("dword:") {
        let v = u32::from_str_radix(digits.trim(), 16)
            .map_err(|_| format!("invalid dword: {digits}"))?;
        return Ok((RegistryValueType::DWord, RegistryValue::DWord(v)));
    }

    let (code, stream) = if let Some(stream) = lower.strip_prefix("hex:") {
        (RegistryValueType::Binary.code(), stream)
    } else if let Some(rest) = lower.strip_prefix("hex(") {
        let (code, stream) = rest.split_once("):").ok_or("malformed hex(<type>) literal")?;
        let code =
            u32::from_str_radix(code, 16).map_err(|_| format!("invalid value type: {code}"))?;
        (code, stream)
    } else {
        return Err(format!("unrecognized value literal: {literal}"));
    };

    let bytes = parse_hex_stream(stream)?;
    let kind = RegistryValueType::from_code(code).unwrap_or(RegistryValueType::Binary);
    Ok((kind, decode_value(code, &bytes)))
}

fn parse_hex_stream(stream: &str) -> Result<Vec<u8>, String> {
    stream
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| u8::from_str_radix(t, 16).map_err(|_| format!("invalid hex byte: {t}")))
        .collect()
}

/// Read up to the closing quote, resolving `\"` and `\\`. Returns the text and the remainder.
fn read_quoted(input: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?.1),
            '"' => return Some((out, &input[idx + 1..])),
            other => out.push(other),
        }
    }
    None
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

pub(crate) fn write(file: &RegFile) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push_str("\n\n");
    for key in file.keys() {
        let path = canonicalize_key(&file.full_path(&key.name));
        if key.is_deleter {
            out.push_str(&format!("[-{path}]\n\n"));
            continue;
        }
        out.push_str(&format!("[{path}]\n"));
        for value in &key.values {
            write_value(&mut out, value);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

fn write_value(out: &mut String, value: &RegValue) {
    let head = if value.name.is_empty() {
        "@=".to_string()
    } else {
        format!("{}=", quote(&value.name))
    };
    out.push_str(&head);
    if value.is_deleter {
        out.push('-');
        return;
    }
    match (value.kind, &value.data) {
        (RegistryValueType::String, RegistryValue::Text(text)) => out.push_str(&quote(text)),
        (RegistryValueType::DWord, data) => {
            let v = match data {
                RegistryValue::DWord(v) => *v,
                other => u32::from_le_bytes(dword_bytes(other)),
            };
            out.push_str(&format!("dword:{v:08x}"));
        }
        (kind, data) => {
            let tag = match kind {
                RegistryValueType::Binary => "hex:".to_string(),
                other => format!("hex({:x}):", other.code()),
            };
            out.push_str(&tag);
            let bytes = encode_value(data, kind);
            write_hex_stream(out, head.len() + tag.len(), &bytes);
        }
    }
}

fn dword_bytes(data: &RegistryValue) -> [u8; 4] {
    let bytes = encode_value(data, RegistryValueType::DWord);
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    buf
}

fn write_hex_stream(out: &mut String, start_column: usize, bytes: &[u8]) {
    let mut column = start_column;
    for (idx, byte) in bytes.iter().enumerate() {
        let token = if idx + 1 < bytes.len() {
            format!("{byte:02x},")
        } else {
            format!("{byte:02x}")
        };
        if column + token.len() > WRAP_COLUMN {
            out.push_str("\\\n  ");
            column = 2;
        }
        out.push_str(&token);
        column += token.len();
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn parser_never_panics(input in "\\PC{0,200}") {
            let _ = RegFile::parse(&input);
            let with_header = format!("{HEADER}\n{input}");
            let _ = RegFile::parse(&with_header);
        }
    }
}
