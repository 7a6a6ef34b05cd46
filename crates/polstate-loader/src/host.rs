//! The machine a loader runs against: registry hives, offline hive mounting,
//! elevation and the policy refresh signal.

use crate::registry::{MemoryRegistry, RegistryError, RegistryView};
use crate::settings::LoaderSettings;
#[cfg(not(windows))]
use crate::settings::RefreshMode;
use camino::{Utf8Path, Utf8PathBuf};
use polstate_types::{PolicyScope, RegistryHive};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub trait PolicyHost: Send + Sync {
    /// Whether the process may write system GPO files.
    fn is_elevated(&self) -> bool;

    fn registry(&self, hive: RegistryHive) -> Arc<dyn RegistryView>;

    /// Load a hive file and return a view of its root. It stays loaded until
    /// [`PolicyHost::unmount_hive`].
    fn mount_hive(&self, file: &Utf8Path) -> Result<Arc<dyn RegistryView>, RegistryError>;

    fn unmount_hive(&self, file: &Utf8Path) -> Result<(), RegistryError>;

    /// `false` when policy files are not picked up on their own, so saves must be
    /// propagated to the registry directly.
    fn has_native_refresh(&self) -> bool;

    /// Ask the platform to re-read policy for `scope`.
    fn refresh_policy(&self, scope: PolicyScope) -> anyhow::Result<()>;
}

/// The host for the machine the process runs on.
#[cfg(windows)]
pub fn platform_host(_settings: &mut LoaderSettings) -> Arc<dyn PolicyHost> {
    Arc::new(crate::windows_host::WindowsHost::new())
}

/// The host for the machine the process runs on.
///
/// Only Windows has a live registry and a refresh signal. Elsewhere an in-memory host
/// stands in for file work and `settings.refresh` drops to [`RefreshMode::None`], so a
/// save never reports a refresh or registry changes that did not happen.
#[cfg(not(windows))]
pub fn platform_host(settings: &mut LoaderSettings) -> Arc<dyn PolicyHost> {
    if settings.refresh != RefreshMode::None {
        warn!(
            refresh = settings.refresh.as_str(),
            "no live registry on this platform; saved GPOs are only versioned"
        );
        settings.refresh = RefreshMode::None;
    }
    Arc::new(MemoryHost::new(true, false))
}

/// Unmounts its hive when dropped.
pub struct MountGuard {
    host: Arc<dyn PolicyHost>,
    file: Utf8PathBuf,
}

impl MountGuard {
    pub fn mount(
        host: Arc<dyn PolicyHost>,
        file: &Utf8Path,
    ) -> Result<(Self, Arc<dyn RegistryView>), RegistryError> {
        let view = host.mount_hive(file)?;
        debug!(%file, "mounted offline hive");
        Ok((
            Self {
                host,
                file: file.to_owned(),
            },
            view,
        ))
    }

    pub fn file(&self) -> &Utf8Path {
        &self.file
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if let Err(err) = self.host.unmount_hive(&self.file) {
            warn!(file = %self.file, %err, "failed to unmount offline hive");
        } else {
            debug!(file = %self.file, "unmounted offline hive");
        }
    }
}

#[derive(Debug, Default)]
struct HostState {
    hives: BTreeMap<RegistryHive, MemoryRegistry>,
    /// Hive contents by file, kept across mounts.
    offline: BTreeMap<Utf8PathBuf, MemoryRegistry>,
    mounted: Vec<Utf8PathBuf>,
    refreshes: Vec<PolicyScope>,
}

/// A host whose registry lives in memory. Offline hives are keyed by file path and
/// keep their contents between mounts for the life of the host.
#[derive(Debug)]
pub struct MemoryHost {
    elevated: bool,
    native_refresh: bool,
    state: Mutex<HostState>,
}

impl MemoryHost {
    pub fn new(elevated: bool, native_refresh: bool) -> Self {
        Self {
            elevated,
            native_refresh,
            state: Mutex::new(HostState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The in-memory hive behind [`PolicyHost::registry`].
    pub fn hive(&self, hive: RegistryHive) -> MemoryRegistry {
        self.lock().hives.entry(hive).or_default().clone()
    }

    pub fn mounted(&self) -> Vec<Utf8PathBuf> {
        self.lock().mounted.clone()
    }

    pub fn refreshes(&self) -> Vec<PolicyScope> {
        self.lock().refreshes.clone()
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl PolicyHost for MemoryHost {
    fn is_elevated(&self) -> bool {
        self.elevated
    }

    fn registry(&self, hive: RegistryHive) -> Arc<dyn RegistryView> {
        Arc::new(self.hive(hive))
    }

    fn mount_hive(&self, file: &Utf8Path) -> Result<Arc<dyn RegistryView>, RegistryError> {
        if !self.elevated {
            return Err(RegistryError::AccessDenied(file.to_string()));
        }
        if !file.exists() {
            return Err(RegistryError::NotFound(file.to_string()));
        }
        let mut state = self.lock();
        if state.mounted.iter().any(|m| m == file) {
            return Err(RegistryError::InvalidPath(format!("{file} is already mounted")));
        }
        state.mounted.push(file.to_owned());
        let view = state.offline.entry(file.to_owned()).or_default().clone();
        Ok(Arc::new(view))
    }

    fn unmount_hive(&self, file: &Utf8Path) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let before = state.mounted.len();
        state.mounted.retain(|m| m != file);
        if state.mounted.len() == before {
            return Err(RegistryError::NotFound(file.to_string()));
        }
        Ok(())
    }

    fn has_native_refresh(&self) -> bool {
        self.native_refresh
    }

    fn refresh_policy(&self, scope: PolicyScope) -> anyhow::Result<()> {
        self.lock().refreshes.push(scope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn mount_guard_unmounts_on_drop() {
        let tmp = TempDir::new().expect("temp dir");
        let file = Utf8PathBuf::from_path_buf(tmp.path().join("NTUSER.DAT")).expect("utf8");
        std::fs::write(&file, b"").expect("write");

        let host = Arc::new(MemoryHost::default());
        {
            let (_guard, view) = MountGuard::mount(host.clone(), &file).expect("mount");
            view.set("Software", "A", crate::NativeValue::DWord(1))
                .expect("set");
            assert_eq!(host.mounted(), vec![file.clone()]);
        }
        assert!(host.mounted().is_empty());

        // Contents survive a remount.
        let (_guard, view) = MountGuard::mount(host.clone(), &file).expect("remount");
        assert!(view.get("Software", "A").expect("get").is_some());
    }

    #[cfg(not(windows))]
    #[test]
    fn without_a_registry_saves_are_only_versioned() {
        let mut settings = LoaderSettings {
            refresh: RefreshMode::RegistryDiff,
            ..LoaderSettings::default()
        };
        let host = platform_host(&mut settings);
        assert_eq!(settings.refresh, RefreshMode::None);
        assert!(!host.has_native_refresh());
    }

    #[test]
    fn mounting_needs_elevation_and_an_existing_file() {
        let host = MemoryHost::new(false, true);
        assert!(matches!(
            host.mount_hive(Utf8Path::new("C:/missing.dat")),
            Err(RegistryError::AccessDenied(_))
        ));
        let host = MemoryHost::default();
        assert!(matches!(
            host.mount_hive(Utf8Path::new("/definitely/missing.dat")),
            Err(RegistryError::NotFound(_))
        ));
    }
}
