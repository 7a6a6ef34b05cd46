use crate::cache::CachedReader;
use crate::matching::{list_present, on_off_evidence, value_present};
use crate::model::{ElementKind, PolicyDefinition, PolicyElement};
use crate::options::{ElementOption, ElementOptions, ListOption, parse_loose_u32};
use polstate_types::{PolicyReader, RegistryValue};

/// Read back the options `def`'s elements currently hold. Elements with no stored data
/// are left out.
pub fn read_options<R: PolicyReader + ?Sized>(def: &PolicyDefinition, source: &R) -> ElementOptions {
    let cached = CachedReader::new(source);
    let mut options = ElementOptions::new();
    for element in &def.elements {
        if let Some(option) = read_element(def, element, &cached) {
            options.insert(element.id.clone(), option);
        }
    }
    options
}

fn read_element<R: PolicyReader + ?Sized>(
    def: &PolicyDefinition,
    element: &PolicyElement,
    source: &R,
) -> Option<ElementOption> {
    let key = def.element_key(element);
    let value = element.registry_value.as_str();
    match &element.kind {
        ElementKind::Decimal { .. } => match source.get_value(key, value)? {
            RegistryValue::Text(text) => Some(ElementOption::Decimal(parse_loose_u32(&text))),
            other => other
                .as_number()
                .map(|n| ElementOption::Decimal(u32::try_from(n).unwrap_or(u32::MAX))),
        },
        ElementKind::Boolean { registry } => {
            let (on, off) = on_off_evidence(source, registry, key, value);
            if on > 0 {
                Some(ElementOption::Boolean(true))
            } else if off > 0 || source.contains_value(key, value) {
                Some(ElementOption::Boolean(false))
            } else {
                None
            }
        }
        ElementKind::Text { .. } => match source.get_value(key, value)? {
            RegistryValue::Text(text) => Some(ElementOption::Text(text)),
            RegistryValue::DWord(n) => Some(ElementOption::Text(n.to_string())),
            RegistryValue::QWord(n) => Some(ElementOption::Text(n.to_string())),
            _ => None,
        },
        ElementKind::MultiText => match source.get_value(key, value)? {
            RegistryValue::MultiText(lines) => Some(ElementOption::MultiText(lines)),
            RegistryValue::Text(text) => Some(ElementOption::MultiText(vec![text])),
            _ => None,
        },
        ElementKind::List {
            has_prefix,
            user_provides_names,
            ..
        } => {
            let list = if *user_provides_names {
                ListOption::Named(
                    source
                        .value_names(key)
                        .into_iter()
                        .map(|name| {
                            let data = source
                                .get_value(key, &name)
                                .and_then(|v| v.as_text().map(str::to_string))
                                .unwrap_or_default();
                            (name, data)
                        })
                        .collect(),
                )
            } else if *has_prefix {
                ListOption::Items(read_prefixed(source, key, value))
            } else {
                ListOption::Items(source.value_names(key))
            };
            (!list.is_empty()).then_some(ElementOption::List(list))
        }
        ElementKind::Enum { items, .. } => items
            .iter()
            .position(|item| {
                value_present(source, key, value, &item.value)
                    && item.value_list.as_ref().is_none_or(|list| {
                        list.entries.is_empty() || list_present(source, list, key)
                    })
            })
            .map(ElementOption::Enum),
    }
}

/// `prefix1`, `prefix2`, ... up to the first missing index.
fn read_prefixed<R: PolicyReader + ?Sized>(source: &R, key: &str, prefix: &str) -> Vec<String> {
    let mut items = Vec::new();
    for n in 1.. {
        let name = format!("{prefix}{n}");
        let Some(data) = source.get_value(key, &name) else {
            break;
        };
        items.push(match data {
            RegistryValue::Text(text) => text,
            RegistryValue::DWord(v) => v.to_string(),
            RegistryValue::QWord(v) => v.to_string(),
            _ => String::new(),
        });
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use polstate_polfile::PolFile;
    use polstate_types::{PolicySource, RegistryValueType};

    #[test]
    fn prefixed_list_stops_at_the_first_gap() {
        let def = with_elements(policy_without_root("p"), vec![list("items", "Items", true)]);
        let sub = format!("{KEY}\\Items");
        let mut pol = PolFile::new();
        for n in [1, 2, 3, 5] {
            pol.set_value(
                &sub,
                &format!("Item{n}"),
                RegistryValue::Text(format!("v{n}")),
                RegistryValueType::String,
            )
            .expect("set");
        }
        let options = read_options(&def, &pol);
        assert_eq!(
            options.get("items"),
            Some(&ElementOption::List(ListOption::Items(vec![
                "v1".to_string(),
                "v2".to_string(),
                "v3".to_string(),
            ])))
        );
    }

    #[test]
    fn scalar_elements_read_back() {
        let def = with_elements(
            policy_without_root("p"),
            vec![
                decimal("level", "Level"),
                text("name", "Name"),
                boolean("flag", "Flag"),
                enumeration("mode", "Mode", &[10, 20], false),
                decimal("missing", "Missing"),
            ],
        );
        let mut pol = PolFile::new();
        pol.set_value(KEY, "Level", RegistryValue::from("0x20"), RegistryValueType::String)
            .expect("set");
        pol.set_value(KEY, "Name", RegistryValue::from("hi"), RegistryValueType::String)
            .expect("set");
        pol.delete_value(KEY, "Flag").expect("delete");
        set_dword(&mut pol, KEY, "Mode", 20);

        let options = read_options(&def, &pol);
        assert_eq!(options.get("level"), Some(&ElementOption::Decimal(32)));
        assert_eq!(options.get("name"), Some(&ElementOption::Text("hi".to_string())));
        assert_eq!(options.get("flag"), Some(&ElementOption::Boolean(false)));
        assert_eq!(options.get("mode"), Some(&ElementOption::Enum(1)));
        assert!(!options.contains_key("missing"));
    }

    #[test]
    fn wide_decimals_saturate() {
        let def = with_elements(policy_without_root("p"), vec![decimal("level", "Level")]);
        let mut pol = PolFile::new();
        pol.set_value(
            KEY,
            "Level",
            RegistryValue::QWord(0x1_0000_0005),
            RegistryValueType::QWord,
        )
        .expect("set");
        assert_eq!(
            read_options(&def, &pol).get("level"),
            Some(&ElementOption::Decimal(u32::MAX))
        );
    }
}
