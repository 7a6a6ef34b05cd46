use crate::model::PolstateConfigV1;
use crate::presets::{PLATFORMS, preset};
use camino::Utf8PathBuf;
use polstate_loader::{LoaderSettings, RefreshMode};

/// Command-line values that win over the config file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub platform: Option<String>,
    pub system_root: Option<String>,
    pub refresh: Option<String>,
}

pub fn resolve_config(
    cfg: PolstateConfigV1,
    overrides: Overrides,
) -> anyhow::Result<LoaderSettings> {
    if let Some(schema) = cfg.schema.as_deref()
        && schema != crate::SCHEMA_ID
    {
        anyhow::bail!("unsupported config schema: {schema} (expected {})", crate::SCHEMA_ID);
    }

    let platform = overrides
        .platform
        .or(cfg.platform)
        .unwrap_or_else(|| "workstation".to_string());
    let Some(mut settings) = preset(&platform) else {
        anyhow::bail!(
            "unknown platform: {platform} (expected {})",
            PLATFORMS.join("|")
        );
    };

    if let Some(root) = overrides.system_root.or(cfg.system_root) {
        settings.system_root = Utf8PathBuf::from(root);
    }
    if let Some(refresh) = overrides.refresh.or(cfg.refresh) {
        settings.refresh = parse_refresh(&refresh)?;
    }
    if let Some(probe) = cfg.probe_writability {
        settings.probe_writability = probe;
    }
    Ok(settings)
}

fn parse_refresh(v: &str) -> anyhow::Result<RefreshMode> {
    match v {
        "native" => Ok(RefreshMode::Native),
        "registry-diff" | "registry_diff" => Ok(RefreshMode::RegistryDiff),
        "none" => Ok(RefreshMode::None),
        other => anyhow::bail!("unknown refresh: {other} (expected native|registry-diff|none)"),
    }
}
