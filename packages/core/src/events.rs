//! Event and library collaborator interfaces.
//!
//! The monitor announces attach/detach through an [`EventSink`] and
//! keeps the media library's watched paths in sync through a
//! [`LibraryService`]. Both are consumed interfaces; the defaults here
//! log and no-op so the monitor runs standalone.

use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

/// A device lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StorageEvent {
    /// A device was mounted and is available at `path`.
    DeviceAdded { path: PathBuf, name: String },
    /// A device was unmounted or detached.
    DeviceRemoved { path: PathBuf, name: String },
}

/// Receives device add/remove notifications.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: &StorageEvent);
}

/// [`EventSink`] that writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn notify(&self, event: &StorageEvent) {
        match event {
            StorageEvent::DeviceAdded { path, name } => {
                info!("storage device added: '{}' at {}", name, path.display());
            }
            StorageEvent::DeviceRemoved { path, name } => {
                info!("storage device removed: '{}' at {}", name, path.display());
            }
        }
    }
}

/// Media library integration consumed by the scan loop.
///
/// Only invoked when the process is the primary instance; client
/// instances skip library interaction entirely.
pub trait LibraryService: Send + Sync {
    /// Registers a mounted device path for automatic import.
    fn add_watched_path(&self, path: &Path);

    /// Deregisters a path after unmount.
    fn remove_watched_path(&self, path: &Path);

    /// Triggers a library rescan after the device population changed.
    fn rescan(&self);

    /// Whether auto-import of new devices is enabled.
    fn is_auto_import_enabled(&self) -> bool;
}

/// [`LibraryService`] with auto-import disabled and no-op operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLibrary;

impl LibraryService for NullLibrary {
    fn add_watched_path(&self, _path: &Path) {}
    fn remove_watched_path(&self, _path: &Path) {}
    fn rescan(&self) {}
    fn is_auto_import_enabled(&self) -> bool {
        false
    }
}
