//! The `gpt.ini` version counter that sits next to a GPO's policy files.
//!
//! Clients only re-read a GPO when its version changes, so every save bumps it:
//! by 1 for machine settings and by 0x10000 for user settings.

use anyhow::Context;
use camino::Utf8Path;
use polstate_types::PolicyScope;
use tracing::debug;

const REGISTRY_EXTENSIONS: &str = "[{35378EAC-683F-11D2-A89A-00C04FBBCFA2}";

pub fn version_step(scope: PolicyScope) -> u32 {
    match scope {
        PolicyScope::Machine => 1,
        PolicyScope::User => 0x10000,
    }
}

/// Name of the client-side extension line for `scope`.
pub fn extension_key(scope: PolicyScope) -> &'static str {
    match scope {
        PolicyScope::Machine => "gPCMachineExtensionNames",
        PolicyScope::User => "gPCUserExtensionNames",
    }
}

/// The full extension line (registry and administrative templates snap-in).
pub fn extension_line(scope: PolicyScope) -> String {
    let snap_in = match scope {
        PolicyScope::Machine => "{D02B1F72-3407-48AE-BA88-E8213C6761F1}",
        PolicyScope::User => "{D02B1F73-3407-48AE-BA88-E8213C6761F1}",
    };
    format!("{}={REGISTRY_EXTENSIONS}{snap_in}]", extension_key(scope))
}

/// Contents of a fresh `gpt.ini` after a first save in `scope`.
pub fn default_gpt_ini(scope: PolicyScope) -> String {
    format!(
        "[General]\r\n{}\r\nVersion={}\r\n",
        extension_line(scope),
        version_step(scope)
    )
}

fn key_of(line: &str) -> Option<&str> {
    line.split_once('=').map(|(key, _)| key.trim())
}

/// Index just past the last non-blank line of the `[General]` section, adding the
/// section header at the top when there is none.
fn general_section_end(lines: &mut Vec<String>) -> usize {
    let start = match lines
        .iter()
        .position(|l| l.trim().eq_ignore_ascii_case("[General]"))
    {
        Some(idx) => idx,
        None => {
            lines.insert(0, "[General]".to_string());
            0
        }
    };
    let mut end = lines[start + 1..]
        .iter()
        .position(|l| l.trim_start().starts_with('['))
        .map_or(lines.len(), |idx| start + 1 + idx);
    while end > start + 1 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    end
}

/// Bump the version in `text` for a save in `scope`.
///
/// Every other line is kept verbatim. Missing `Version` and extension lines go at the
/// end of the `[General]` section. Returns the new text and the new version.
pub fn bump_gpt_ini(text: &str, scope: PolicyScope) -> (String, u32) {
    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();

    let mut version = None;
    for line in &mut lines {
        if key_of(line).is_some_and(|k| k.eq_ignore_ascii_case("Version")) {
            let current = line
                .split_once('=')
                .and_then(|(_, v)| v.trim().parse::<u32>().ok())
                .unwrap_or(0);
            let next = current.wrapping_add(version_step(scope));
            *line = format!("Version={next}");
            version = Some(next);
        }
    }
    let version = match version {
        Some(v) => v,
        None => {
            let v = version_step(scope);
            let at = general_section_end(&mut lines);
            lines.insert(at, format!("Version={v}"));
            v
        }
    };

    let ext = extension_key(scope);
    if !lines
        .iter()
        .any(|l| key_of(l).is_some_and(|k| k.eq_ignore_ascii_case(ext)))
    {
        let at = general_section_end(&mut lines);
        lines.insert(at, extension_line(scope));
    }

    let mut out = lines.join(newline);
    out.push_str(newline);
    (out, version)
}

/// Create or bump the version file at `path`. Returns the new version.
pub fn bump_version_file(path: &Utf8Path, scope: PolicyScope) -> anyhow::Result<u32> {
    let (text, version) = if path.exists() {
        let current =
            std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
        bump_gpt_ini(&current, scope)
    } else {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {parent}"))?;
        }
        (default_gpt_ini(scope), version_step(scope))
    };
    std::fs::write(path, text).with_context(|| format!("write {path}"))?;
    debug!(%path, %scope, version, "bumped gpt.ini version");
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    #[test]
    fn fresh_files_get_the_default_lines() {
        let text = default_gpt_ini(PolicyScope::User);
        assert_eq!(
            text,
            "[General]\r\ngPCUserExtensionNames=[{35378EAC-683F-11D2-A89A-00C04FBBCFA2}\
             {D02B1F73-3407-48AE-BA88-E8213C6761F1}]\r\nVersion=65536\r\n"
        );
    }

    #[test]
    fn bumping_preserves_other_lines() {
        let text = "[General]\r\ndisplayName=Local\r\nVersion=3\r\n";
        let (out, version) = bump_gpt_ini(text, PolicyScope::Machine);
        assert_eq!(version, 4);
        assert_eq!(
            out,
            format!(
                "[General]\r\ndisplayName=Local\r\nVersion=4\r\n{}\r\n",
                extension_line(PolicyScope::Machine)
            )
        );

        let (out, version) = bump_gpt_ini(&out, PolicyScope::User);
        assert_eq!(version, 4 + 0x10000);
        assert!(out.contains("gPCMachineExtensionNames"));
        assert!(out.contains("gPCUserExtensionNames"));
    }

    #[test]
    fn missing_lines_land_in_the_general_section() {
        let text = "[General]\nVersion=7\n\n[Extra]\nkey=value\n";
        let (out, version) = bump_gpt_ini(text, PolicyScope::User);
        assert_eq!(version, 7 + 0x10000);
        assert_eq!(
            out,
            format!(
                "[General]\nVersion={version}\n{}\n\n[Extra]\nkey=value\n",
                extension_line(PolicyScope::User)
            )
        );

        let (out, version) = bump_gpt_ini("[Extra]\nkey=value\n", PolicyScope::Machine);
        assert_eq!(version, 1);
        assert_eq!(
            out,
            format!(
                "[General]\nVersion=1\n{}\n[Extra]\nkey=value\n",
                extension_line(PolicyScope::Machine)
            )
        );
    }

    #[test]
    fn unparseable_versions_restart_from_the_step() {
        let (out, version) = bump_gpt_ini("[General]\nversion=abc\n", PolicyScope::Machine);
        assert_eq!(version, 1);
        assert!(out.starts_with("[General]\nVersion=1\n"));
    }

    #[test]
    fn version_file_is_created_then_bumped() {
        let tmp = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("GroupPolicy/gpt.ini"))
            .expect("utf8");
        assert_eq!(bump_version_file(&path, PolicyScope::Machine).expect("create"), 1);
        assert_eq!(bump_version_file(&path, PolicyScope::Machine).expect("bump"), 2);
        assert_eq!(
            bump_version_file(&path, PolicyScope::User).expect("bump"),
            2 + 0x10000
        );
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text.matches("gPCMachineExtensionNames").count(), 1);
    }
}
