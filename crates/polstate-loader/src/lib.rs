//! Policy source factory: opens GPO files, live registry subtrees, offline hives and
//! null sinks behind one [`PolicySource`] surface, and saves them back.
//!
//! This crate does filesystem IO. Platform registry access goes through
//! [`PolicyHost`]: [`platform_host`] picks the Windows registry where there is one,
//! and [`MemoryHost`] is the in-memory host used elsewhere and in tests.
//!
//! [`PolicySource`]: polstate_types::PolicySource

// Registry FFI is confined to `windows_host`.
#![deny(unsafe_code)]

pub mod gpt_ini;

mod host;
mod live;
mod loader;
mod registry;
mod settings;
#[cfg(windows)]
#[allow(unsafe_code)]
mod windows_host;

pub use host::{MemoryHost, MountGuard, PolicyHost, platform_host};
pub use live::LiveRegistrySource;
pub use loader::{PolicyLoader, SaveOutcome, SourceKind};
pub use registry::{MemoryRegistry, NativeValue, RegistryError, RegistryView};
pub use settings::{LoaderSettings, RefreshMode};
#[cfg(windows)]
pub use windows_host::{WindowsHost, WindowsRegistry};
