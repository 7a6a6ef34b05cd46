//! Config parsing and platform preset resolution.
//!
//! This crate is IO-free: it parses and resolves configuration provided as strings.

#![forbid(unsafe_code)]

mod model;
mod presets;
mod resolve;

pub use model::PolstateConfigV1;
pub use presets::PLATFORMS;
pub use resolve::Overrides;

use polstate_loader::LoaderSettings;

pub const SCHEMA_ID: &str = "polstate.config.v1";

/// Parse `polstate.toml` (or equivalent) into a typed model.
pub fn parse_config_toml(input: &str) -> anyhow::Result<PolstateConfigV1> {
    let cfg: PolstateConfigV1 = toml::from_str(input)?;
    Ok(cfg)
}

/// Resolve the loader settings (preset + config file + overrides).
pub fn resolve_config(
    cfg: PolstateConfigV1,
    overrides: Overrides,
) -> anyhow::Result<LoaderSettings> {
    resolve::resolve_config(cfg, overrides)
}

/// JSON schema of [`PolstateConfigV1`], pretty-printed with a trailing newline.
pub fn config_schema_json() -> anyhow::Result<String> {
    let schema = schemars::schema_for!(PolstateConfigV1);
    let mut json = serde_json::to_string_pretty(&schema)?;
    json.push('\n');
    Ok(json)
}
