//! Persistent key-value settings store.
//!
//! All operator tunables (protected device list, scan interval, feature
//! toggles) and the persisted name/serial map flow through the
//! [`SettingsStore`] trait. The production implementation is a flat
//! string-to-string map serialized as JSON; tests use [`MemoryStore`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;

use crate::error::{Error, IoResultExt, Result};

/// Comma/semicolon separated device names excluded from hotplug handling.
pub const KEY_PROTECTED_DEVICES: &str = "protected_devices";

/// Serialized `serial,name` map used for stable device naming.
pub const KEY_NAME_SERIAL_MAP: &str = "name_serial_map";

/// Poll interval between scan cycles, in milliseconds.
pub const KEY_SCAN_WAIT_PERIOD_MS: &str = "scan_wait_period_ms";

/// Master enable flag for the hotplug detector.
pub const KEY_ENABLE_HOTPLUG_DETECTOR: &str = "enable_hotplug_detector";

/// Enables the boot-device signature lookup on NAS-style installs.
pub const KEY_ENABLE_NAS: &str = "enable_nas";

/// Default scan interval when the setting is absent or unparseable.
pub const DEFAULT_SCAN_WAIT_PERIOD_MS: u64 = 10_000;

/// String-keyed persistent configuration store.
///
/// Writes are expected to be durable but are never allowed to take the
/// scan loop down; implementations log and swallow write failures.
pub trait SettingsStore: Send + Sync {
    /// Returns the value for `key`, or `default` if unset.
    fn get(&self, key: &str, default: &str) -> String;

    /// Stores `value` under `key` and flushes immediately.
    fn put(&self, key: &str, value: &str);

    /// Returns `key` parsed as u64, falling back to `default`.
    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key, &default.to_string())
            .parse()
            .unwrap_or(default)
    }

    /// Returns `key` parsed as a boolean, falling back to `default`.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key, "").as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => default,
        }
    }
}

/// Returns the default settings file location under the user's config
/// directory.
pub fn default_settings_path() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or(Error::HomeDirNotFound)?;
    Ok(base.join("hotplug-mount").join("settings.json"))
}

/// File-backed [`SettingsStore`] persisting a flat JSON object.
///
/// Every `put` rewrites the whole file. The map is small (a handful of
/// tunables plus the name/serial history) so the write amplification is
/// an acceptable trade for crash safety.
pub struct JsonFileStore {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, creating an empty one if the file is
    /// absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = if path.exists() {
            let content = fs::read_to_string(&path).settings_read_context(&path)?;
            serde_json::from_str(&content).map_err(|e| Error::SettingsParse {
                message: e.to_string(),
            })?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).settings_write_context(&self.path)?;
        }
        let content = serde_json::to_string_pretty(map).map_err(|e| Error::SettingsParse {
            message: e.to_string(),
        })?;
        fs::write(&self.path, content).settings_write_context(&self.path)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str, default: &str) -> String {
        let map = self.map.lock().expect("settings lock poisoned");
        map.get(key).cloned().unwrap_or_else(|| default.to_string())
    }

    fn put(&self, key: &str, value: &str) {
        let mut map = self.map.lock().expect("settings lock poisoned");
        map.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&map) {
            warn!("settings flush failed for key '{}': {}", key, e);
        }
    }
}

/// In-memory [`SettingsStore`], primarily for tests and embedders that
/// manage persistence themselves.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str, default: &str) -> String {
        let map = self.map.lock().expect("settings lock poisoned");
        map.get(key).cloned().unwrap_or_else(|| default.to_string())
    }

    fn put(&self, key: &str, value: &str) {
        let mut map = self.map.lock().expect("settings lock poisoned");
        map.insert(key.to_string(), value.to_string());
    }
}
