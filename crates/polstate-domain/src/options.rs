//! Element option values, keyed by element id.
//!
//! Each element kind has its own variant; loose conversions let script text or a
//! neighbouring shape stand in (a decimal given as text, an enum index given as a number).

use crate::model::ElementKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListOption {
    /// `(value name, data)` pairs for lists whose names are user supplied.
    Named(Vec<(String, String)>),
    Items(Vec<String>),
}

impl ListOption {
    pub fn len(&self) -> usize {
        match self {
            ListOption::Named(pairs) => pairs.len(),
            ListOption::Items(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ElementOption {
    Decimal(u32),
    Boolean(bool),
    Text(String),
    List(ListOption),
    Enum(usize),
    MultiText(Vec<String>),
}

pub type ElementOptions = BTreeMap<String, ElementOption>;

impl ElementOption {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ElementOption::Decimal(_) => "decimal",
            ElementOption::Boolean(_) => "boolean",
            ElementOption::Text(_) => "text",
            ElementOption::List(_) => "list",
            ElementOption::Enum(_) => "enum",
            ElementOption::MultiText(_) => "multitext",
        }
    }

    pub fn as_decimal(&self) -> Option<u32> {
        match self {
            ElementOption::Decimal(v) => Some(*v),
            ElementOption::Text(s) => Some(parse_loose_u32(s)),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            ElementOption::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ElementOption::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListOption> {
        match self {
            ElementOption::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_enum_index(&self) -> Option<usize> {
        match self {
            ElementOption::Enum(idx) => Some(*idx),
            ElementOption::Decimal(v) => Some(*v as usize),
            _ => None,
        }
    }

    pub fn as_multi_text(&self) -> Option<Vec<String>> {
        match self {
            ElementOption::MultiText(lines) => Some(lines.clone()),
            ElementOption::List(ListOption::Items(items)) => Some(items.clone()),
            ElementOption::Text(s) => Some(s.lines().map(str::to_string).collect()),
            _ => None,
        }
    }
}

/// `0x1F`, `&H1F` or decimal. Anything unparseable is zero.
pub fn parse_loose_u32(text: &str) -> u32 {
    let text = text.trim();
    let hex = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .or_else(|| text.strip_prefix("&H"))
        .or_else(|| text.strip_prefix("&h"));
    match hex {
        Some(digits) => u32::from_str_radix(digits, 16).unwrap_or(0),
        None => text.parse().unwrap_or(0),
    }
}

pub fn parse_loose_bool(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// Interpret script text as an option for an element of `kind`.
///
/// Lists and multi-text are `;`-separated; user-named lists take `name=value` pairs
/// (a bare item uses itself as both).
pub fn parse_option(kind: &ElementKind, text: &str) -> ElementOption {
    match kind {
        ElementKind::Decimal { .. } => ElementOption::Decimal(parse_loose_u32(text)),
        ElementKind::Boolean { .. } => ElementOption::Boolean(parse_loose_bool(text)),
        ElementKind::Text { .. } => ElementOption::Text(text.to_string()),
        ElementKind::Enum { .. } => ElementOption::Enum(parse_loose_u32(text) as usize),
        ElementKind::MultiText => ElementOption::MultiText(split_items(text)),
        ElementKind::List {
            user_provides_names: true,
            ..
        } => ElementOption::List(ListOption::Named(
            split_items(text)
                .into_iter()
                .map(|item| match item.split_once('=') {
                    Some((name, value)) => (name.trim().to_string(), value.trim().to_string()),
                    None => (item.clone(), item),
                })
                .collect(),
        )),
        ElementKind::List { .. } => ElementOption::List(ListOption::Items(split_items(text))),
    }
}

fn split_items(text: &str) -> Vec<String> {
    text.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_numbers_accept_hex_forms_and_fall_back_to_zero() {
        assert_eq!(parse_loose_u32("42"), 42);
        assert_eq!(parse_loose_u32(" 0x1F "), 31);
        assert_eq!(parse_loose_u32("&H10"), 16);
        assert_eq!(parse_loose_u32("banana"), 0);
        assert_eq!(parse_loose_u32("0xZZ"), 0);
        assert_eq!(parse_loose_u32("-5"), 0);
    }

    #[test]
    fn loose_booleans() {
        for yes in ["1", "true", "Yes", "ON", "enabled"] {
            assert!(parse_loose_bool(yes), "{yes}");
        }
        for no in ["0", "false", "off", ""] {
            assert!(!parse_loose_bool(no), "{no}");
        }
    }

    #[test]
    fn named_lists_split_pairs() {
        let kind = ElementKind::List {
            has_prefix: false,
            user_provides_names: true,
            expandable: false,
            no_purge_others: false,
        };
        assert_eq!(
            parse_option(&kind, "a=1; b = 2 ;c"),
            ElementOption::List(ListOption::Named(vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "c".to_string()),
            ]))
        );
    }

    #[test]
    fn multi_text_accepts_neighbouring_shapes() {
        assert_eq!(
            ElementOption::Text("a\nb".to_string()).as_multi_text(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            ElementOption::List(ListOption::Items(vec!["x".to_string()])).as_multi_text(),
            Some(vec!["x".to_string()])
        );
        assert_eq!(ElementOption::Boolean(true).as_multi_text(), None);
        assert_eq!(ElementOption::Text("0x10".to_string()).as_decimal(), Some(16));
        assert_eq!(ElementOption::Decimal(2).as_enum_index(), Some(2));
    }
}
