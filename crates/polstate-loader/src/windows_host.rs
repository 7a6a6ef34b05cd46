//! Host backed by the Windows registry and the Group Policy refresh call.

use crate::host::PolicyHost;
use crate::registry::{NativeValue, RegistryError, RegistryView};
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use polstate_types::codec::{
    decode_multi_utf16, decode_utf16z, encode_multi_utf16, encode_utf16z,
};
use polstate_types::{PolicyScope, RegistryHive, join_key};
use std::os::windows::ffi::OsStrExt;
use std::ptr::{null, null_mut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA,
    ERROR_NO_MORE_ITEMS, ERROR_NOT_ALL_ASSIGNED, ERROR_PATH_NOT_FOUND, ERROR_SUCCESS,
    GetLastError, HANDLE, LUID, WIN32_ERROR,
};
use windows_sys::Win32::Security::{
    AdjustTokenPrivileges, GetTokenInformation, LUID_AND_ATTRIBUTES, LookupPrivilegeValueW,
    SE_PRIVILEGE_ENABLED, TOKEN_ACCESS_MASK, TOKEN_ADJUST_PRIVILEGES, TOKEN_ELEVATION,
    TOKEN_PRIVILEGES, TOKEN_QUERY, TokenElevation,
};
use windows_sys::Win32::System::GroupPolicy::{RP_FORCE, RefreshPolicyEx};
use windows_sys::Win32::System::Registry::{
    HKEY, HKEY_CLASSES_ROOT, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, HKEY_USERS,
    KEY_ENUMERATE_SUB_KEYS, KEY_QUERY_VALUE, KEY_READ, KEY_SET_VALUE, KEY_WRITE, REG_DWORD,
    REG_EXPAND_SZ, REG_MULTI_SZ, REG_OPTION_NON_VOLATILE, REG_QWORD, REG_SAM_FLAGS, REG_SZ,
    REG_VALUE_TYPE, RegCloseKey, RegCreateKeyExW, RegDeleteKeyW, RegDeleteValueW,
    RegEnumKeyExW, RegEnumValueW, RegLoadKeyW, RegOpenKeyExW, RegQueryValueExW,
    RegSetValueExW, RegUnLoadKeyW,
};

/// Longest value name the registry allows, terminator included.
const MAX_VALUE_NAME: u32 = 16_384;
const MAX_KEY_NAME: u32 = 256;
const ELEVATION_SIZE: u32 = size_of::<TOKEN_ELEVATION>() as u32;

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

fn len(n: u32) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

fn root_handle(hive: RegistryHive) -> HKEY {
    match hive {
        RegistryHive::LocalMachine => HKEY_LOCAL_MACHINE,
        RegistryHive::CurrentUser => HKEY_CURRENT_USER,
        RegistryHive::Users => HKEY_USERS,
        RegistryHive::ClassesRoot => HKEY_CLASSES_ROOT,
    }
}

fn check(code: WIN32_ERROR, path: &str) -> Result<(), RegistryError> {
    match code {
        ERROR_SUCCESS => Ok(()),
        ERROR_ACCESS_DENIED => Err(RegistryError::AccessDenied(path.to_string())),
        ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => {
            Err(RegistryError::NotFound(path.to_string()))
        }
        code => Err(RegistryError::Os {
            path: path.to_string(),
            code,
        }),
    }
}

/// An open registry key, closed on drop.
struct KeyHandle(HKEY);

impl Drop for KeyHandle {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful open or create and is closed once.
        unsafe { RegCloseKey(self.0) };
    }
}

struct TokenHandle(HANDLE);

impl Drop for TokenHandle {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful OpenProcessToken and is closed once.
        unsafe { CloseHandle(self.0) };
    }
}

fn process_token(access: TOKEN_ACCESS_MASK) -> Option<TokenHandle> {
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    let mut token = null_mut();
    // SAFETY: GetCurrentProcess returns a pseudo handle and `token` is a valid out pointer.
    let ok = unsafe { OpenProcessToken(GetCurrentProcess(), access, &mut token) };
    (ok != 0).then(|| TokenHandle(token))
}

fn process_is_elevated() -> bool {
    let Some(token) = process_token(TOKEN_QUERY) else {
        return false;
    };
    let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
    let mut returned = 0u32;
    // SAFETY: the buffer is a TOKEN_ELEVATION of exactly the size passed.
    let ok = unsafe {
        GetTokenInformation(
            token.0,
            TokenElevation,
            (&raw mut elevation).cast(),
            ELEVATION_SIZE,
            &mut returned,
        )
    };
    ok != 0 && elevation.TokenIsElevated != 0
}

/// Enable `name` (such as `SeRestorePrivilege`) on the process token.
fn enable_privilege(name: &str) -> Result<(), RegistryError> {
    let denied = || RegistryError::AccessDenied(name.to_string());
    let token = process_token(TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY).ok_or_else(denied)?;

    let name_w = wide(name);
    let mut luid = LUID {
        LowPart: 0,
        HighPart: 0,
    };
    // SAFETY: `name_w` is NUL-terminated and `luid` is a valid out pointer.
    if unsafe { LookupPrivilegeValueW(null(), name_w.as_ptr(), &mut luid) } == 0 {
        return Err(denied());
    }
    let privileges = TOKEN_PRIVILEGES {
        PrivilegeCount: 1,
        Privileges: [LUID_AND_ATTRIBUTES {
            Luid: luid,
            Attributes: SE_PRIVILEGE_ENABLED,
        }],
    };
    // SAFETY: `privileges` outlives the call and no previous state is requested.
    let ok = unsafe { AdjustTokenPrivileges(token.0, 0, &privileges, 0, null_mut(), null_mut()) };
    // The call succeeds even when the account does not hold the privilege.
    // SAFETY: reads the calling thread's last error only.
    if ok == 0 || unsafe { GetLastError() } == ERROR_NOT_ALL_ASSIGNED {
        return Err(denied());
    }
    debug!(privilege = name, "enabled privilege");
    Ok(())
}

fn native_value(kind: REG_VALUE_TYPE, data: Vec<u8>) -> NativeValue {
    match kind {
        REG_DWORD => match data.first_chunk::<4>() {
            Some(bytes) => NativeValue::DWord(i32::from_le_bytes(*bytes)),
            None => NativeValue::Binary { kind, data },
        },
        REG_QWORD => match data.first_chunk::<8>() {
            Some(bytes) => NativeValue::QWord(i64::from_le_bytes(*bytes)),
            None => NativeValue::Binary { kind, data },
        },
        REG_SZ => NativeValue::String(decode_utf16z(&data)),
        REG_EXPAND_SZ => NativeValue::ExpandString(decode_utf16z(&data)),
        REG_MULTI_SZ => NativeValue::MultiString(decode_multi_utf16(&data)),
        _ => NativeValue::Binary { kind, data },
    }
}

fn native_bytes(data: &NativeValue) -> (REG_VALUE_TYPE, Vec<u8>) {
    match data {
        NativeValue::DWord(n) => (REG_DWORD, n.to_le_bytes().to_vec()),
        NativeValue::QWord(n) => (REG_QWORD, n.to_le_bytes().to_vec()),
        NativeValue::String(text) => (REG_SZ, encode_utf16z(text)),
        NativeValue::ExpandString(text) => (REG_EXPAND_SZ, encode_utf16z(text)),
        NativeValue::MultiString(lines) => (REG_MULTI_SZ, encode_multi_utf16(lines)),
        NativeValue::Binary { kind, data } => (*kind, data.clone()),
    }
}

/// A subtree of one predefined hive. Every call opens its own handle, so nothing
/// stays open between calls and a loaded hive can always be unloaded.
#[derive(Clone, Debug)]
pub struct WindowsRegistry {
    hive: RegistryHive,
    base: String,
}

impl WindowsRegistry {
    pub fn new(hive: RegistryHive, base: impl Into<String>) -> Self {
        Self {
            hive,
            base: base.into(),
        }
    }

    fn path(&self, key: &str) -> String {
        join_key(&self.base, key.trim_matches('\\'))
    }

    fn open(&self, key: &str, access: REG_SAM_FLAGS) -> Result<Option<KeyHandle>, RegistryError> {
        let path = self.path(key);
        let path_w = wide(&path);
        let mut handle = null_mut();
        // SAFETY: the root is a predefined key, `path_w` is NUL-terminated and `handle`
        // is a valid out pointer.
        let code = unsafe {
            RegOpenKeyExW(root_handle(self.hive), path_w.as_ptr(), 0, access, &mut handle)
        };
        match check(code, &path) {
            Ok(()) => Ok(Some(KeyHandle(handle))),
            Err(RegistryError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn create(&self, key: &str) -> Result<KeyHandle, RegistryError> {
        let path = self.path(key);
        let path_w = wide(&path);
        let mut handle = null_mut();
        // SAFETY: as for `open`; class and security attributes are optional and null.
        let code = unsafe {
            RegCreateKeyExW(
                root_handle(self.hive),
                path_w.as_ptr(),
                0,
                null(),
                REG_OPTION_NON_VOLATILE,
                KEY_READ | KEY_WRITE,
                null(),
                &mut handle,
                null_mut(),
            )
        };
        check(code, &path)?;
        Ok(KeyHandle(handle))
    }
}

impl RegistryView for WindowsRegistry {
    fn get(&self, key: &str, value: &str) -> Result<Option<NativeValue>, RegistryError> {
        let Some(handle) = self.open(key, KEY_QUERY_VALUE)? else {
            return Ok(None);
        };
        let name_w = wide(value);
        let mut data: Vec<u8> = Vec::new();
        loop {
            let mut kind: REG_VALUE_TYPE = 0;
            let mut size = u32::try_from(data.len()).unwrap_or(u32::MAX);
            let buffer = if data.is_empty() {
                null_mut()
            } else {
                data.as_mut_ptr()
            };
            // SAFETY: `buffer` is null or points at `size` writable bytes.
            let code = unsafe {
                RegQueryValueExW(handle.0, name_w.as_ptr(), null(), &mut kind, buffer, &mut size)
            };
            match code {
                ERROR_SUCCESS if !data.is_empty() || size == 0 => {
                    data.truncate(len(size));
                    return Ok(Some(native_value(kind, data)));
                }
                // First call sizes the buffer; a value that grew in between retries.
                ERROR_SUCCESS | ERROR_MORE_DATA => data.resize(len(size), 0),
                ERROR_FILE_NOT_FOUND => return Ok(None),
                code => return check(code, &self.path(key)).map(|()| None),
            }
        }
    }

    fn set(&self, key: &str, value: &str, data: NativeValue) -> Result<(), RegistryError> {
        let handle = self.create(key)?;
        let name_w = wide(value);
        let (kind, bytes) = native_bytes(&data);
        let size = u32::try_from(bytes.len())
            .map_err(|_| RegistryError::InvalidPath(format!("{key}\\{value} is too large")))?;
        // SAFETY: `bytes` holds exactly `size` readable bytes.
        let code =
            unsafe { RegSetValueExW(handle.0, name_w.as_ptr(), 0, kind, bytes.as_ptr(), size) };
        check(code, &self.path(key))
    }

    fn delete_value(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        let Some(handle) = self.open(key, KEY_SET_VALUE)? else {
            return Ok(());
        };
        let name_w = wide(value);
        // SAFETY: `name_w` is NUL-terminated.
        match unsafe { RegDeleteValueW(handle.0, name_w.as_ptr()) } {
            ERROR_FILE_NOT_FOUND => Ok(()),
            code => check(code, &self.path(key)),
        }
    }

    fn value_names(&self, key: &str) -> Result<Vec<String>, RegistryError> {
        let handle = self
            .open(key, KEY_QUERY_VALUE)?
            .ok_or_else(|| RegistryError::NotFound(self.path(key)))?;
        let mut names = Vec::new();
        let mut buf = vec![0u16; len(MAX_VALUE_NAME)];
        let mut index = 0u32;
        loop {
            let mut chars = MAX_VALUE_NAME;
            // SAFETY: `buf` holds `chars` UTF-16 units; type and data are not requested.
            let code = unsafe {
                RegEnumValueW(
                    handle.0,
                    index,
                    buf.as_mut_ptr(),
                    &mut chars,
                    null(),
                    null_mut(),
                    null_mut(),
                    null_mut(),
                )
            };
            match code {
                ERROR_NO_MORE_ITEMS => return Ok(names),
                ERROR_SUCCESS => names.push(String::from_utf16_lossy(&buf[..len(chars)])),
                code => return check(code, &self.path(key)).map(|()| names),
            }
            index += 1;
        }
    }

    fn subkey_names(&self, key: &str) -> Result<Vec<String>, RegistryError> {
        let handle = self
            .open(key, KEY_ENUMERATE_SUB_KEYS)?
            .ok_or_else(|| RegistryError::NotFound(self.path(key)))?;
        let mut names = Vec::new();
        let mut buf = vec![0u16; len(MAX_KEY_NAME)];
        let mut index = 0u32;
        loop {
            let mut chars = MAX_KEY_NAME;
            // SAFETY: `buf` holds `chars` UTF-16 units; class and timestamp are not requested.
            let code = unsafe {
                RegEnumKeyExW(
                    handle.0,
                    index,
                    buf.as_mut_ptr(),
                    &mut chars,
                    null(),
                    null_mut(),
                    null_mut(),
                    null_mut(),
                )
            };
            match code {
                ERROR_NO_MORE_ITEMS => return Ok(names),
                ERROR_SUCCESS => names.push(String::from_utf16_lossy(&buf[..len(chars)])),
                code => return check(code, &self.path(key)).map(|()| names),
            }
            index += 1;
        }
    }

    fn delete_empty_key(&self, key: &str) -> Result<(), RegistryError> {
        let path = self.path(key);
        if path.is_empty() || !self.key_exists(key) {
            return Ok(());
        }
        if !self.value_names(key)?.is_empty() || !self.subkey_names(key)?.is_empty() {
            return Ok(());
        }
        let path_w = wide(&path);
        // SAFETY: the root is a predefined key and `path_w` is NUL-terminated.
        match unsafe { RegDeleteKeyW(root_handle(self.hive), path_w.as_ptr()) } {
            ERROR_FILE_NOT_FOUND => Ok(()),
            code => check(code, &path),
        }
    }

    fn key_exists(&self, key: &str) -> bool {
        matches!(self.open(key, KEY_READ), Ok(Some(_)))
    }
}

#[derive(Debug, Default)]
struct Mounts {
    /// Hive file and the `HKLM` subkey it is loaded under.
    loaded: Vec<(Utf8PathBuf, String)>,
}

/// The machine the process runs on.
///
/// Offline hives are loaded under uniquely named `HKLM` subkeys, which needs the
/// backup and restore privileges.
#[derive(Debug, Default)]
pub struct WindowsHost {
    mounts: Mutex<Mounts>,
    next_mount: AtomicU32,
}

impl WindowsHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Mounts> {
        self.mounts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PolicyHost for WindowsHost {
    fn is_elevated(&self) -> bool {
        process_is_elevated()
    }

    fn registry(&self, hive: RegistryHive) -> Arc<dyn RegistryView> {
        Arc::new(WindowsRegistry::new(hive, ""))
    }

    fn mount_hive(&self, file: &Utf8Path) -> Result<Arc<dyn RegistryView>, RegistryError> {
        if !file.exists() {
            return Err(RegistryError::NotFound(file.to_string()));
        }
        let mut mounts = self.lock();
        if mounts.loaded.iter().any(|(loaded, _)| loaded == file) {
            return Err(RegistryError::InvalidPath(format!("{file} is already mounted")));
        }
        enable_privilege("SeBackupPrivilege")?;
        enable_privilege("SeRestorePrivilege")?;

        let absolute = std::path::absolute(file)
            .map_err(|_| RegistryError::InvalidPath(file.to_string()))?;
        let file_w: Vec<u16> = absolute
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let name = format!(
            "polstate-{}-{}",
            std::process::id(),
            self.next_mount.fetch_add(1, Ordering::Relaxed)
        );
        let name_w = wide(&name);
        // SAFETY: both strings are NUL-terminated and HKLM is a predefined key.
        let code = unsafe { RegLoadKeyW(HKEY_LOCAL_MACHINE, name_w.as_ptr(), file_w.as_ptr()) };
        check(code, file.as_str())?;
        debug!(%file, mount = %name, "loaded hive");

        mounts.loaded.push((file.to_owned(), name.clone()));
        Ok(Arc::new(WindowsRegistry::new(RegistryHive::LocalMachine, name)))
    }

    fn unmount_hive(&self, file: &Utf8Path) -> Result<(), RegistryError> {
        let mut mounts = self.lock();
        let idx = mounts
            .loaded
            .iter()
            .position(|(loaded, _)| loaded == file)
            .ok_or_else(|| RegistryError::NotFound(file.to_string()))?;
        let name_w = wide(&mounts.loaded[idx].1);
        // SAFETY: `name_w` is NUL-terminated and HKLM is a predefined key.
        let code = unsafe { RegUnLoadKeyW(HKEY_LOCAL_MACHINE, name_w.as_ptr()) };
        check(code, file.as_str())?;
        mounts.loaded.remove(idx);
        Ok(())
    }

    fn has_native_refresh(&self) -> bool {
        true
    }

    fn refresh_policy(&self, scope: PolicyScope) -> anyhow::Result<()> {
        let machine = i32::from(scope == PolicyScope::Machine);
        // SAFETY: no pointers are passed.
        if unsafe { RefreshPolicyEx(machine, RP_FORCE) } == 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("refresh {scope} policy"));
        }
        debug!(%scope, "requested policy refresh");
        Ok(())
    }
}
