use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `polstate.toml` schema v1.
///
/// Every field is optional; anything left out comes from the platform preset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PolstateConfigV1 {
    /// Optional schema string for tooling (`polstate.config.v1`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Platform preset: `workstation` (default), `home` or `offline`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Base directory holding `System32/GroupPolicy` and `System32/GroupPolicyUsers`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_root: Option<String>,

    /// How saved GPO files take effect: `native`, `registry-diff` or `none`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,

    /// Probe sources for writability when they are opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_writability: Option<bool>,
}
