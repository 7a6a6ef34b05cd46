use polstate_types::RegistryHive;

const WELL_KNOWN_SEGMENTS: &[&str] = &[
    "Software",
    "Policies",
    "Microsoft",
    "Windows",
    "CurrentVersion",
    "System",
    "CurrentControlSet",
    "Classes",
];

/// Rewrite hive names to their long form and well-known segments to their usual casing.
///
/// Unknown segments are left alone.
pub fn canonicalize_key(path: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for (idx, segment) in path.split('\\').enumerate() {
        if idx == 0 {
            if let Some(hive) = RegistryHive::parse(segment) {
                out.push(hive.canonical_name().to_string());
                continue;
            }
        }
        let known = WELL_KNOWN_SEGMENTS
            .iter()
            .find(|k| k.eq_ignore_ascii_case(segment));
        out.push(known.map_or_else(|| segment.to_string(), |k| k.to_string()));
    }
    out.join("\\")
}

/// Expand a leading short hive name (`HKLM`) to its long form; the rest is untouched.
pub(crate) fn expand_hive(path: &str) -> String {
    let path = path.trim_matches('\\');
    match RegistryHive::split_path(path) {
        Some((hive, "")) => hive.canonical_name().to_string(),
        Some((hive, rest)) => format!("{}\\{}", hive.canonical_name(), rest),
        None => path.to_string(),
    }
}
