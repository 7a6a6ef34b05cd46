use camino::Utf8PathBuf;

/// How a saved GPO file reaches the machine's effective policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshMode {
    /// Signal the platform to re-read policy; hosts without a refresh mechanism fall
    /// back to [`RefreshMode::RegistryDiff`].
    Native,
    /// Apply the difference between the old and new file to the live registry.
    RegistryDiff,
    /// Only write the file.
    None,
}

impl RefreshMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshMode::Native => "native",
            RefreshMode::RegistryDiff => "registry-diff",
            RefreshMode::None => "none",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderSettings {
    /// Base of the `System32\GroupPolicy` and `System32\GroupPolicyUsers` trees.
    pub system_root: Utf8PathBuf,
    pub refresh: RefreshMode,
    pub probe_writability: bool,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            system_root: Utf8PathBuf::from("C:/Windows"),
            refresh: RefreshMode::Native,
            probe_writability: true,
        }
    }
}
