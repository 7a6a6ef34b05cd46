use crate::gpt_ini::bump_version_file;
use crate::host::{MountGuard, PolicyHost};
use crate::live::LiveRegistrySource;
use crate::settings::{LoaderSettings, RefreshMode};
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use polstate_polfile::PolFile;
use polstate_types::{PolicyScope, PolicySource, RegistryHive};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a policy source comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// The local GPO under `System32\GroupPolicy`.
    LocalGpo,
    /// The per-user GPO under `System32\GroupPolicyUsers\<sid>`. User scope only.
    UserGpo { sid: String },
    /// A standalone policy file.
    PolFile { path: Utf8PathBuf },
    /// A live registry subtree such as `HKLM\Software\Policies`. An empty path means
    /// the root of the scope's own hive.
    Registry { path: String },
    /// A hive file mounted for the life of the loader.
    OfflineHive { path: Utf8PathBuf },
    /// Accepts writes and discards them on save.
    Null,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A standalone policy file was written.
    Written { path: Utf8PathBuf },
    /// A GPO file was written and the platform was asked to refresh.
    Refreshed { path: Utf8PathBuf, version: u32 },
    /// A GPO file was written and its changes were applied to the live registry.
    Propagated { path: Utf8PathBuf, version: u32 },
    /// A GPO file was written with its version bumped, nothing else.
    Versioned { path: Utf8PathBuf, version: u32 },
    /// Registry-backed sources apply every write immediately.
    Immediate,
    Discarded,
}

impl fmt::Display for SaveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveOutcome::Written { path } => write!(f, "wrote {path}"),
            SaveOutcome::Refreshed { path, version } => {
                write!(f, "wrote {path} (version {version}), policy refresh requested")
            }
            SaveOutcome::Propagated { path, version } => {
                write!(f, "wrote {path} (version {version}), changes applied to the registry")
            }
            SaveOutcome::Versioned { path, version } => {
                write!(f, "wrote {path} (version {version})")
            }
            SaveOutcome::Immediate => f.write_str("changes were applied immediately"),
            SaveOutcome::Discarded => f.write_str("changes discarded"),
        }
    }
}

enum Backend {
    File {
        path: Utf8PathBuf,
        /// Set for GPO files, which carry a `gpt.ini` and need a refresh.
        gpo_dir: Option<Utf8PathBuf>,
        pol: PolFile,
        /// What is on disk, for diffing on save.
        original: PolFile,
    },
    Live(LiveRegistrySource),
    Null(PolFile),
}

/// An open policy source plus everything needed to save it.
pub struct PolicyLoader {
    kind: SourceKind,
    scope: PolicyScope,
    settings: LoaderSettings,
    host: Arc<dyn PolicyHost>,
    // Dropped before `mount`, so the view goes away before its hive unmounts.
    backend: Backend,
    writable: bool,
    mount: Option<MountGuard>,
}

fn scope_dir(scope: PolicyScope) -> &'static str {
    match scope {
        PolicyScope::Machine => "Machine",
        PolicyScope::User => "User",
    }
}

fn read_pol(path: &Utf8Path) -> anyhow::Result<PolFile> {
    if !path.exists() {
        debug!(%path, "policy file does not exist yet; starting empty");
        return Ok(PolFile::new());
    }
    let bytes = std::fs::read(path).with_context(|| format!("read {path}"))?;
    PolFile::from_bytes(&bytes).with_context(|| format!("parse {path}"))
}

/// Check that `path` could be written without leaving anything behind.
///
/// An existing file is opened for appending. Otherwise a scratch file is created in the
/// nearest existing ancestor directory and removed again; nothing else is created.
fn probe_file(path: &Utf8Path) -> bool {
    if path.exists() {
        return std::fs::OpenOptions::new().append(true).open(path).is_ok();
    }
    // A bare file name lives in the working directory.
    let Some(dir) = path
        .ancestors()
        .skip(1)
        .map(|dir| if dir.as_str().is_empty() { Utf8Path::new(".") } else { dir })
        .find(|dir| dir.is_dir())
    else {
        return false;
    };
    let parent_exists = path
        .parent()
        .is_some_and(|parent| parent.as_str().is_empty() || parent == dir);
    let scratch = if parent_exists {
        path.to_path_buf()
    } else {
        dir.join(format!(".polstate-probe-{}", std::process::id()))
    };
    if std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&scratch)
        .is_err()
    {
        return false;
    }
    match std::fs::remove_file(&scratch) {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %scratch, error = %err, "could not remove write probe");
            false
        }
    }
}

impl PolicyLoader {
    pub fn open(
        kind: SourceKind,
        scope: PolicyScope,
        settings: LoaderSettings,
        host: Arc<dyn PolicyHost>,
    ) -> anyhow::Result<Self> {
        let gpo_dir = match &kind {
            SourceKind::LocalGpo => Some(settings.system_root.join("System32/GroupPolicy")),
            SourceKind::UserGpo { sid } => {
                if scope != PolicyScope::User {
                    anyhow::bail!("a per-user GPO only holds user settings (got scope {scope})");
                }
                Some(
                    settings
                        .system_root
                        .join("System32/GroupPolicyUsers")
                        .join(sid),
                )
            }
            _ => None,
        };

        let pol_path = match (&kind, &gpo_dir) {
            (SourceKind::PolFile { path }, _) => Some(path.clone()),
            (_, Some(dir)) => Some(dir.join(scope_dir(scope)).join("Registry.pol")),
            _ => None,
        };

        let mut mount = None;
        let backend = match (&kind, pol_path) {
            (_, Some(path)) => {
                let pol = read_pol(&path)?;
                let original = pol.duplicate().with_context(|| format!("snapshot {path}"))?;
                Backend::File {
                    path,
                    gpo_dir,
                    pol,
                    original,
                }
            }
            (SourceKind::Registry { path }, None) => {
                let (hive, base) = if path.trim_matches('\\').is_empty() {
                    (scope.hive(), "")
                } else {
                    RegistryHive::split_path(path)
                        .with_context(|| format!("unknown registry hive in {path}"))?
                };
                Backend::Live(LiveRegistrySource::new(host.registry(hive), base))
            }
            (SourceKind::OfflineHive { path }, None) => {
                let (guard, view) = MountGuard::mount(host.clone(), path)
                    .with_context(|| format!("mount offline hive {path}"))?;
                mount = Some(guard);
                Backend::Live(LiveRegistrySource::new(view, ""))
            }
            _ => Backend::Null(PolFile::new()),
        };

        let mut loader = Self {
            kind,
            scope,
            settings,
            host,
            backend,
            writable: true,
            mount,
        };
        loader.writable = loader.probe_writable();
        debug!(source = %loader.describe(), writable = loader.writable, "opened policy source");
        Ok(loader)
    }

    fn probe_writable(&self) -> bool {
        if !self.settings.probe_writability {
            return true;
        }
        match &self.backend {
            Backend::File { path, gpo_dir, .. } => {
                if gpo_dir.is_some() && !self.host.is_elevated() {
                    debug!(%path, "not elevated; system GPO treated as read-only");
                    return false;
                }
                probe_file(path)
            }
            Backend::Live(live) => live.probe_writable(""),
            Backend::Null(_) => true,
        }
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn scope(&self) -> PolicyScope {
        self.scope
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// The backing policy file, for file and null sources.
    pub fn pol_file(&self) -> Option<&PolFile> {
        match &self.backend {
            Backend::File { pol, .. } | Backend::Null(pol) => Some(pol),
            Backend::Live(_) => None,
        }
    }

    pub fn pol_file_mut(&mut self) -> Option<&mut PolFile> {
        match &mut self.backend {
            Backend::File { pol, .. } | Backend::Null(pol) => Some(pol),
            Backend::Live(_) => None,
        }
    }

    pub fn source(&self) -> &dyn PolicySource {
        match &self.backend {
            Backend::File { pol, .. } | Backend::Null(pol) => pol,
            Backend::Live(live) => live,
        }
    }

    pub fn source_mut(&mut self) -> &mut dyn PolicySource {
        match &mut self.backend {
            Backend::File { pol, .. } | Backend::Null(pol) => pol,
            Backend::Live(live) => live,
        }
    }

    pub fn describe(&self) -> String {
        match (&self.kind, &self.backend) {
            (SourceKind::LocalGpo, Backend::File { path, .. }) => {
                format!("local GPO ({}) at {path}", self.scope)
            }
            (SourceKind::UserGpo { sid }, Backend::File { path, .. }) => {
                format!("user GPO for {sid} at {path}")
            }
            (SourceKind::PolFile { path }, _) => format!("policy file {path}"),
            (SourceKind::Registry { .. }, Backend::Live(live)) => {
                let hive = match &self.kind {
                    SourceKind::Registry { path } if !path.trim_matches('\\').is_empty() => {
                        RegistryHive::split_path(path).map(|(hive, _)| hive)
                    }
                    _ => None,
                }
                .unwrap_or_else(|| self.scope.hive());
                if live.base().is_empty() {
                    format!("registry {}", hive.canonical_name())
                } else {
                    format!("registry {}\\{}", hive.canonical_name(), live.base())
                }
            }
            (SourceKind::OfflineHive { path }, _) => format!("offline hive {path}"),
            (SourceKind::Null, _) => "null source (changes are discarded)".to_string(),
            (kind, _) => format!("{kind:?}"),
        }
    }

    /// Persist the current state.
    ///
    /// GPO files get their `gpt.ini` version bumped, then reach effective policy per
    /// [`RefreshMode`]. After a successful save the written state becomes the baseline
    /// for the next diff.
    pub fn save(&mut self) -> anyhow::Result<SaveOutcome> {
        if !self.writable {
            anyhow::bail!("{} is not writable", self.describe());
        }
        let outcome = match &mut self.backend {
            Backend::Null(_) => SaveOutcome::Discarded,
            Backend::Live(_) => SaveOutcome::Immediate,
            Backend::File {
                path,
                gpo_dir,
                pol,
                original,
            } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("create {parent}"))?;
                }
                std::fs::write(&*path, pol.to_bytes())
                    .with_context(|| format!("write {path}"))?;

                let outcome = match gpo_dir {
                    None => SaveOutcome::Written { path: path.clone() },
                    Some(dir) => {
                        let version = bump_version_file(&dir.join("gpt.ini"), self.scope)?;
                        let path = path.clone();
                        match self.settings.refresh {
                            RefreshMode::Native if self.host.has_native_refresh() => {
                                self.host
                                    .refresh_policy(self.scope)
                                    .context("request policy refresh")?;
                                SaveOutcome::Refreshed { path, version }
                            }
                            RefreshMode::Native | RefreshMode::RegistryDiff => {
                                let mut live = propagation_target(&*self.host, &self.kind, self.scope);
                                pol.apply_difference(Some(&*original), &mut live)
                                    .with_context(|| {
                                        format!("apply {path} to the registry")
                                    })?;
                                SaveOutcome::Propagated { path, version }
                            }
                            RefreshMode::None => SaveOutcome::Versioned { path, version },
                        }
                    }
                };
                *original = pol.duplicate().context("snapshot saved policy file")?;
                outcome
            }
        };
        info!(source = %self.describe(), %outcome, "saved policy source");
        Ok(outcome)
    }

    /// The mounted hive file, if this loader owns one.
    pub fn mounted_hive(&self) -> Option<&Utf8Path> {
        self.mount.as_ref().map(MountGuard::file)
    }
}

/// The live registry view a GPO's settings land in.
fn propagation_target(
    host: &dyn PolicyHost,
    kind: &SourceKind,
    scope: PolicyScope,
) -> LiveRegistrySource {
    match kind {
        SourceKind::UserGpo { sid } => {
            LiveRegistrySource::new(host.registry(RegistryHive::Users), sid.clone())
        }
        _ => LiveRegistrySource::new(host.registry(scope.hive()), ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use crate::registry::{NativeValue, RegistryView};
    use polstate_types::{PolicyReader, RegistryValue, RegistryValueType};
    use tempfile::TempDir;

    const KEY: &str = "Software\\Policies\\Contoso";

    fn settings(tmp: &TempDir, refresh: RefreshMode) -> LoaderSettings {
        LoaderSettings {
            system_root: Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8"),
            refresh,
            probe_writability: true,
        }
    }

    fn set(source: &mut dyn PolicySource, value: &str, n: u32) {
        source
            .set_value(KEY, value, RegistryValue::DWord(n), RegistryValueType::DWord)
            .expect("set");
    }

    #[test]
    fn local_gpo_save_writes_file_and_version_then_refreshes() {
        let tmp = TempDir::new().expect("temp dir");
        let host = Arc::new(MemoryHost::new(true, true));
        let mut loader = PolicyLoader::open(
            SourceKind::LocalGpo,
            PolicyScope::Machine,
            settings(&tmp, RefreshMode::Native),
            host.clone(),
        )
        .expect("open");
        assert!(loader.is_writable());
        set(loader.source_mut(), "Enabled", 1);

        let outcome = loader.save().expect("save");
        let gpo = tmp.path().join("System32/GroupPolicy");
        let pol_path =
            Utf8PathBuf::from_path_buf(gpo.join("Machine/Registry.pol")).expect("utf8");
        assert_eq!(
            outcome,
            SaveOutcome::Refreshed {
                path: pol_path.clone(),
                version: 1
            }
        );
        assert_eq!(host.refreshes(), vec![PolicyScope::Machine]);

        let reopened = PolicyLoader::open(
            SourceKind::LocalGpo,
            PolicyScope::Machine,
            settings(&tmp, RefreshMode::Native),
            host.clone(),
        )
        .expect("reopen");
        assert_eq!(
            reopened.source().get_value(KEY, "Enabled"),
            Some(RegistryValue::DWord(1))
        );
        let ini = std::fs::read_to_string(gpo.join("gpt.ini")).expect("gpt.ini");
        assert!(ini.contains("Version=1"));
    }

    #[test]
    fn hosts_without_refresh_get_the_diff_in_the_registry() {
        let tmp = TempDir::new().expect("temp dir");
        let host = Arc::new(MemoryHost::new(true, false));
        let hklm = host.hive(RegistryHive::LocalMachine);
        hklm.set(KEY, "Stale", NativeValue::DWord(9)).expect("seed");
        hklm.set("Software\\Vendor", "Keep", NativeValue::DWord(1))
            .expect("seed");

        let open = || {
            PolicyLoader::open(
                SourceKind::LocalGpo,
                PolicyScope::Machine,
                settings(&tmp, RefreshMode::Native),
                host.clone(),
            )
            .expect("open")
        };

        let mut loader = open();
        set(loader.source_mut(), "Stale", 9);
        set(loader.source_mut(), "Enabled", 1);
        assert!(matches!(
            loader.save().expect("save"),
            SaveOutcome::Propagated { version: 1, .. }
        ));
        assert_eq!(hklm.get(KEY, "Enabled").expect("get"), Some(NativeValue::DWord(1)));

        let mut loader = open();
        loader.source_mut().forget_value(KEY, "Stale").expect("forget");
        assert!(matches!(
            loader.save().expect("save"),
            SaveOutcome::Propagated { version: 2, .. }
        ));
        assert_eq!(hklm.get(KEY, "Stale").expect("get"), None);
        assert_eq!(hklm.get(KEY, "Enabled").expect("get"), Some(NativeValue::DWord(1)));
        assert!(hklm.get("Software\\Vendor", "Keep").expect("get").is_some());
        assert!(host.refreshes().is_empty());
    }

    #[test]
    fn user_gpo_requires_user_scope_and_propagates_under_the_sid() {
        let tmp = TempDir::new().expect("temp dir");
        let host = Arc::new(MemoryHost::new(true, false));
        let sid = "S-1-5-21-1-2-3-1001".to_string();
        assert!(
            PolicyLoader::open(
                SourceKind::UserGpo { sid: sid.clone() },
                PolicyScope::Machine,
                settings(&tmp, RefreshMode::RegistryDiff),
                host.clone(),
            )
            .is_err()
        );

        let mut loader = PolicyLoader::open(
            SourceKind::UserGpo { sid: sid.clone() },
            PolicyScope::User,
            settings(&tmp, RefreshMode::RegistryDiff),
            host.clone(),
        )
        .expect("open");
        set(loader.source_mut(), "Enabled", 1);
        let outcome = loader.save().expect("save");
        assert!(matches!(outcome, SaveOutcome::Propagated { version: 0x10000, .. }));
        assert_eq!(
            host.hive(RegistryHive::Users)
                .get(&format!("{sid}\\{KEY}"), "Enabled")
                .expect("get"),
            Some(NativeValue::DWord(1))
        );
        assert!(tmp
            .path()
            .join(format!("System32/GroupPolicyUsers/{sid}/User/Registry.pol"))
            .exists());
    }

    #[test]
    fn unelevated_system_gpo_is_read_only() {
        let tmp = TempDir::new().expect("temp dir");
        let mut loader = PolicyLoader::open(
            SourceKind::LocalGpo,
            PolicyScope::User,
            settings(&tmp, RefreshMode::None),
            Arc::new(MemoryHost::new(false, true)),
        )
        .expect("open");
        assert!(!loader.is_writable());
        assert!(loader.save().is_err());
        assert!(!tmp.path().join("System32").exists());
    }

    #[test]
    fn standalone_pol_files_are_written_without_versioning() {
        let tmp = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("out/Registry.pol")).expect("utf8");
        let mut loader = PolicyLoader::open(
            SourceKind::PolFile { path: path.clone() },
            PolicyScope::Machine,
            LoaderSettings::default(),
            Arc::new(MemoryHost::new(false, false)),
        )
        .expect("open");
        assert!(loader.is_writable());
        assert!(!path.exists(), "probing must not leave a file behind");
        assert!(!tmp.path().join("out").exists(), "probing must not create directories");
        set(loader.source_mut(), "Enabled", 1);
        assert_eq!(loader.save().expect("save"), SaveOutcome::Written { path: path.clone() });
        assert!(!tmp.path().join("out/gpt.ini").exists());
        assert_eq!(loader.describe(), format!("policy file {path}"));
    }

    #[test]
    fn corrupt_pol_files_fail_to_open() {
        let tmp = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("bad.pol")).expect("utf8");
        std::fs::write(&path, b"not a policy file").expect("write");
        let err = PolicyLoader::open(
            SourceKind::PolFile { path },
            PolicyScope::Machine,
            LoaderSettings::default(),
            Arc::new(MemoryHost::default()),
        )
        .err()
        .expect("corrupt file");
        assert!(format!("{err:#}").contains("parse"));
    }

    #[test]
    fn registry_sources_write_through() {
        let host = Arc::new(MemoryHost::default());
        let mut loader = PolicyLoader::open(
            SourceKind::Registry {
                path: "HKCU\\Software\\Policies".to_string(),
            },
            PolicyScope::User,
            LoaderSettings::default(),
            host.clone(),
        )
        .expect("open");
        assert!(loader.is_writable());
        assert_eq!(
            loader.describe(),
            "registry HKEY_CURRENT_USER\\Software\\Policies"
        );
        loader
            .source_mut()
            .set_value("Contoso", "A", RegistryValue::DWord(1), RegistryValueType::DWord)
            .expect("set");
        assert_eq!(
            host.hive(RegistryHive::CurrentUser)
                .get(KEY, "A")
                .expect("get"),
            Some(NativeValue::DWord(1))
        );
        assert_eq!(loader.save().expect("save"), SaveOutcome::Immediate);
        assert!(loader.pol_file().is_none());
    }

    #[test]
    fn offline_hives_stay_mounted_while_open() {
        let tmp = TempDir::new().expect("temp dir");
        let file = Utf8PathBuf::from_path_buf(tmp.path().join("NTUSER.DAT")).expect("utf8");
        std::fs::write(&file, b"").expect("write");
        let host = Arc::new(MemoryHost::default());
        {
            let loader = PolicyLoader::open(
                SourceKind::OfflineHive { path: file.clone() },
                PolicyScope::User,
                LoaderSettings::default(),
                host.clone(),
            )
            .expect("open");
            assert_eq!(loader.mounted_hive(), Some(file.as_path()));
            assert_eq!(host.mounted(), vec![file.clone()]);
        }
        assert!(host.mounted().is_empty());
    }

    #[test]
    fn null_sources_discard() {
        let mut loader = PolicyLoader::open(
            SourceKind::Null,
            PolicyScope::Machine,
            LoaderSettings::default(),
            Arc::new(MemoryHost::default()),
        )
        .expect("open");
        set(loader.source_mut(), "Enabled", 1);
        assert!(loader.source().contains_value(KEY, "Enabled"));
        assert_eq!(loader.save().expect("save"), SaveOutcome::Discarded);
    }
}
