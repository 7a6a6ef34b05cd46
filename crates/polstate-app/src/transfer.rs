//! Moving policy data between the binary and text forms, and reporting policy states.

use anyhow::Context;
use polstate_domain::catalog::PolicyCatalog;
use polstate_domain::model::PolicyState;
use polstate_domain::options::ElementOptions;
use polstate_polfile::PolFile;
use polstate_regtext::RegFile;
use polstate_types::{PolicyReader, PolicyScope, PolicySource};
use serde::Serialize;
use tracing::debug;

/// Render `pol` as registry text below the hive `scope` lands in.
pub fn export_reg(pol: &PolFile, scope: PolicyScope) -> anyhow::Result<String> {
    let mut reg = RegFile::with_prefix(scope.hive().canonical_name());
    pol.apply(&mut reg).context("convert policy file to registry text")?;
    debug!(entries = pol.len(), keys = reg.keys().len(), "exported registry text");
    Ok(reg.to_text())
}

/// Parse registry text and forward the sections at or below `prefix` onto `target`.
///
/// Returns the number of key sections imported.
pub fn import_reg<T>(text: &str, prefix: &str, target: &mut T) -> anyhow::Result<usize>
where
    T: PolicySource + ?Sized,
{
    let reg = RegFile::parse_scoped(text, prefix).context("parse registry text")?;
    reg.apply(target).context("import registry text")?;
    debug!(keys = reg.keys().len(), prefix, "imported registry text");
    Ok(reg.keys().len())
}

/// State of one catalog policy as read from a source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PolicyStatus {
    pub id: String,
    pub display_name: String,
    pub state: PolicyState,
    #[serde(skip_serializing_if = "ElementOptions::is_empty")]
    pub options: ElementOptions,
}

/// Evaluate every catalog policy that applies to `scope`, in id order.
///
/// Options are read only for enabled policies.
pub fn policy_states<R>(catalog: &PolicyCatalog, source: &R, scope: PolicyScope) -> Vec<PolicyStatus>
where
    R: PolicyReader + ?Sized,
{
    catalog
        .in_scope(scope)
        .map(|def| {
            let state = polstate_domain::evaluate(def, source);
            let options = if state == PolicyState::Enabled {
                polstate_domain::read_options(def, source)
            } else {
                ElementOptions::new()
            };
            PolicyStatus {
                id: def.id.clone(),
                display_name: def.display_name.clone(),
                state,
                options,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_definitions;
    use polstate_domain::options::{ElementOption, ListOption};
    use polstate_test_util::{CONTOSO_DEFINITIONS, CONTOSO_KEY, Entry, pol_with};
    use polstate_types::RegistryValue;

    fn catalog() -> PolicyCatalog {
        let defs = parse_definitions(CONTOSO_DEFINITIONS).expect("parse");
        PolicyCatalog::from_definitions(defs).expect("catalog")
    }

    #[test]
    fn export_renders_under_the_scope_hive() {
        let pol = pol_with(&[
            Entry::DWord(CONTOSO_KEY, "AllowTelemetry", 1),
            Entry::Delete(CONTOSO_KEY, "Level"),
        ]);
        let text = export_reg(&pol, PolicyScope::Machine).expect("export");
        assert!(text.starts_with("Windows Registry Editor Version 5.00"));
        assert!(text.contains("[HKEY_LOCAL_MACHINE\\Software\\Policies\\Contoso]"));
        assert!(text.contains("\"AllowTelemetry\"=dword:00000001"));
        assert!(text.contains("\"Level\"=-"));
    }

    #[test]
    fn import_keeps_only_the_requested_hive() {
        let text = "Windows Registry Editor Version 5.00\n\n\
[HKEY_CURRENT_USER\\Software\\Policies\\Contoso]\n\
\"BlockListEnabled\"=dword:00000001\n\
\"Stale\"=-\n\n\
[-HKEY_CURRENT_USER\\Software\\Policies\\Contoso\\BlockList]\n\n\
[HKEY_LOCAL_MACHINE\\Software\\Policies\\Contoso]\n\
\"AllowTelemetry\"=dword:00000001\n";
        let mut pol = PolFile::new();
        let keys = import_reg(text, "HKCU", &mut pol).expect("import");

        assert_eq!(keys, 2);
        assert_eq!(
            pol.get_value(CONTOSO_KEY, "BlockListEnabled"),
            Some(RegistryValue::DWord(1))
        );
        assert!(pol.will_delete_value(CONTOSO_KEY, "Stale"));
        assert!(pol.will_delete_value("Software\\Policies\\Contoso\\BlockList", "AddIn1"));
        assert!(!pol.contains_value(CONTOSO_KEY, "AllowTelemetry"));
    }

    #[test]
    fn states_cover_policies_in_scope() {
        let catalog = catalog();
        let pol = pol_with(&[
            Entry::DWord(CONTOSO_KEY, "BlockListEnabled", 1),
            Entry::Clear("Software\\Policies\\Contoso\\BlockList"),
            Entry::Text("Software\\Policies\\Contoso\\BlockList", "AddIn1", "a.dll"),
            Entry::Delete("Software\\Policies\\Contoso\\Updates", "AutoUpdate"),
        ]);

        let states = policy_states(&catalog, &pol, PolicyScope::User);
        let summary: Vec<(&str, PolicyState)> =
            states.iter().map(|s| (s.id.as_str(), s.state)).collect();
        assert_eq!(
            summary,
            vec![
                ("contoso.blocklist", PolicyState::Enabled),
                ("contoso.updates", PolicyState::Disabled),
                ("contoso.wallpaper", PolicyState::NotConfigured),
            ]
        );
        assert_eq!(
            states[0].options.get("addins"),
            Some(&ElementOption::List(ListOption::Items(vec!["a.dll".into()])))
        );
        assert!(states[1].options.is_empty());
    }
}
