//! Loading policy definitions from JSON.

use anyhow::Context;
use camino::Utf8Path;
use polstate_domain::catalog::PolicyCatalog;
use polstate_domain::model::PolicyDefinition;
use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Deserialize)]
#[serde(untagged)]
enum DefinitionFile {
    Many(Vec<PolicyDefinition>),
    One(Box<PolicyDefinition>),
}

/// Parse one JSON document holding a definition or an array of them.
pub fn parse_definitions(text: &str) -> anyhow::Result<Vec<PolicyDefinition>> {
    let file: DefinitionFile = serde_json::from_str(text)?;
    Ok(match file {
        DefinitionFile::Many(defs) => defs,
        DefinitionFile::One(def) => vec![*def],
    })
}

/// Load a catalog from a JSON file, or from every `*.json` below a directory (in
/// path order).
pub fn load_catalog(path: &Utf8Path) -> anyhow::Result<PolicyCatalog> {
    let mut files = Vec::new();
    if path.is_dir() {
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walk {path}"))?;
            let is_json = entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if entry.file_type().is_file() && is_json {
                files.push(entry.into_path());
            }
        }
    } else {
        files.push(path.as_std_path().to_path_buf());
    }

    let mut definitions = Vec::new();
    for file in &files {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("read {}", file.display()))?;
        let defs =
            parse_definitions(&text).with_context(|| format!("parse {}", file.display()))?;
        debug!(file = %file.display(), definitions = defs.len(), "loaded definitions");
        definitions.extend(defs);
    }
    PolicyCatalog::from_definitions(definitions).context("build policy catalog")
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use polstate_test_util::{CONTOSO_DEFINITIONS, CONTOSO_POLICY_IDS};
    use tempfile::TempDir;

    fn utf8_root(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path")
    }

    #[test]
    fn directories_are_walked_for_json_files() {
        let tmp = TempDir::new().expect("temp dir");
        let root = utf8_root(&tmp);
        std::fs::create_dir_all(root.join("nested")).expect("mkdir");
        std::fs::write(root.join("nested/contoso.json"), CONTOSO_DEFINITIONS).expect("write");
        std::fs::write(
            root.join("single.JSON"),
            r#"{ "id": "fabrikam.kiosk", "display_name": "Kiosk", "section": "user",
                 "registry_key": "Software\\Policies\\Fabrikam", "registry_value": "Kiosk" }"#,
        )
        .expect("write");
        std::fs::write(root.join("notes.txt"), "not json").expect("write");

        let catalog = load_catalog(&root).expect("load");
        let mut expected: Vec<&str> = CONTOSO_POLICY_IDS.to_vec();
        expected.push("fabrikam.kiosk");
        expected.sort();
        let ids: Vec<&str> = catalog.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn duplicate_ids_across_files_fail() {
        let tmp = TempDir::new().expect("temp dir");
        let root = utf8_root(&tmp);
        std::fs::write(root.join("a.json"), CONTOSO_DEFINITIONS).expect("write");
        std::fs::write(root.join("b.json"), CONTOSO_DEFINITIONS).expect("write");
        let err = load_catalog(&root).expect_err("duplicates");
        assert!(format!("{err:#}").contains("duplicate policy id"));
    }

    #[test]
    fn malformed_json_names_the_file() {
        let tmp = TempDir::new().expect("temp dir");
        let file = utf8_root(&tmp).join("broken.json");
        std::fs::write(&file, "[{").expect("write");
        let err = load_catalog(&file).expect_err("malformed");
        assert!(format!("{err:#}").contains("broken.json"));
    }
}
