//! Scripted batch apply.
//!
//! One policy per line: `<policy-id> <enabled|disabled|notconfigured> [element=value ...]`.
//! Values containing spaces are double quoted. `#` starts a comment line.

use polstate_domain::catalog::PolicyCatalog;
use polstate_domain::model::PolicyState;
use polstate_domain::options::{ElementOptions, parse_option};
use polstate_types::{PolicyScope, PolicySource};
use tracing::{debug, info, warn};

fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if quoted {
        return Err("unterminated quote".to_string());
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn apply_line(
    catalog: &PolicyCatalog,
    source: &mut dyn PolicySource,
    scope: PolicyScope,
    line: &str,
) -> Result<(), String> {
    let tokens = tokenize(line)?;
    let [id, state, rest @ ..] = tokens.as_slice() else {
        return Err("expected `<policy-id> <state> [element=value ...]`".to_string());
    };
    let def = catalog
        .get(id)
        .ok_or_else(|| format!("unknown policy {id}"))?;
    if !def.section.includes(scope) {
        return Err(format!("policy {id} does not apply to {scope} scope"));
    }
    let state = PolicyState::parse(state)
        .ok_or_else(|| format!("unknown state {state} (expected enabled|disabled|notconfigured)"))?;

    let mut options = ElementOptions::new();
    for pair in rest {
        let (element_id, text) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected element=value, got {pair}"))?;
        let element = def
            .element(element_id)
            .ok_or_else(|| format!("policy {id} has no element {element_id}"))?;
        options.insert(element.id.clone(), parse_option(&element.kind, text));
    }

    polstate_domain::forget(def, source).map_err(|err| err.to_string())?;
    polstate_domain::apply_state(def, source, state, &options).map_err(|err| err.to_string())?;
    debug!(policy = %def.id, %state, "script line applied");
    Ok(())
}

/// Apply every line of `script` to `source`. Returns how many lines failed.
pub fn apply_script(
    catalog: &PolicyCatalog,
    source: &mut dyn PolicySource,
    scope: PolicyScope,
    script: &str,
) -> usize {
    let mut failures = 0;
    let mut applied = 0;
    for (index, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match apply_line(catalog, source, scope, line) {
            Ok(()) => applied += 1,
            Err(reason) => {
                warn!(line = index + 1, %reason, "script line failed");
                failures += 1;
            }
        }
    }
    info!(applied, failures, "script finished");
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_definitions;
    use polstate_polfile::PolFile;
    use polstate_test_util::{CONTOSO_DEFINITIONS, CONTOSO_KEY, Entry, pol_with};
    use polstate_types::{PolicyReader, RegistryValue};

    fn catalog() -> PolicyCatalog {
        let defs = parse_definitions(CONTOSO_DEFINITIONS).expect("parse");
        PolicyCatalog::from_definitions(defs).expect("catalog")
    }

    #[test]
    fn tokens_respect_quotes() {
        assert_eq!(
            tokenize(r#"contoso.wallpaper enabled path="C:\My Pictures\a.bmp"  tile=1"#)
                .expect("tokens"),
            vec![
                "contoso.wallpaper",
                "enabled",
                r"path=C:\My Pictures\a.bmp",
                "tile=1"
            ]
        );
        assert!(tokenize(r#"a "b"#).is_err());
    }

    #[test]
    fn lines_are_applied_with_options() {
        let catalog = catalog();
        let mut pol = PolFile::new();
        let script = "\
# telemetry on, basic mode
contoso.telemetry enabled level=0x2 mode=1

contoso.blocklist enabled addins=\"a.dll; b.dll\"
";
        let failures = apply_script(&catalog, &mut pol, PolicyScope::Machine, script);

        assert_eq!(failures, 0);
        let telemetry = catalog.get("contoso.telemetry").expect("telemetry");
        assert_eq!(
            polstate_domain::evaluate(telemetry, &pol),
            PolicyState::Enabled
        );
        // Elements carry the enabled state; no root value is written.
        assert!(!pol.contains_value(CONTOSO_KEY, "AllowTelemetry"));
        assert_eq!(pol.get_value(CONTOSO_KEY, "Level"), Some(RegistryValue::DWord(2)));
        assert_eq!(pol.get_value(CONTOSO_KEY, "Mode"), Some(RegistryValue::DWord(1)));
        assert_eq!(
            pol.get_value("Software\\Policies\\Contoso\\BlockList", "AddIn1"),
            Some(RegistryValue::Text("a.dll".into()))
        );
    }

    #[test]
    fn failures_are_counted_and_the_batch_continues() {
        let catalog = catalog();
        let mut pol = pol_with(&[Entry::DWord(CONTOSO_KEY, "BlockListEnabled", 1)]);
        let script = "\
contoso.missing enabled
contoso.updates sideways
contoso.wallpaper enabled
contoso.telemetry enabled colour=red
contoso.updates
contoso.blocklist notconfigured
contoso.updates disabled
";
        let failures = apply_script(&catalog, &mut pol, PolicyScope::Machine, script);

        assert_eq!(failures, 5);
        assert!(!pol.contains_value(CONTOSO_KEY, "BlockListEnabled"));
        assert!(pol.will_delete_value("Software\\Policies\\Contoso\\Updates", "AutoUpdate"));
    }
}
