use camino::Utf8PathBuf;
use polstate_loader::{LoaderSettings, RefreshMode};

pub const PLATFORMS: [&str; 3] = ["workstation", "home", "offline"];

/// Defaults per platform. `None` for names outside [`PLATFORMS`].
pub fn preset(platform: &str) -> Option<LoaderSettings> {
    let refresh = match platform {
        "workstation" => RefreshMode::Native,
        // Home editions never pick up local GPO files on their own.
        "home" => RefreshMode::RegistryDiff,
        "offline" => RefreshMode::None,
        _ => return None,
    };
    Some(LoaderSettings {
        system_root: Utf8PathBuf::from("C:/Windows"),
        refresh,
        probe_writability: true,
    })
}
