//! hotplug-mount-core: background monitor for removable storage.
//!
//! Detects external storage devices as they are attached or removed,
//! assigns each a stable human-readable name that survives
//! re-insertion, mounts it at a predictable location, and reports
//! attach/detach events to external consumers.
//!
//! # Modules
//!
//! - [`scanner`]: Platform poll loops and the [`StorageMonitor`] service
//! - [`mounter`]: Mount/unmount state machine
//! - [`naming`]: Stable-name resolution with persisted serial mapping
//! - [`protect`]: Protected (internal/boot) device classification
//! - [`sysfs`]: Device identity derivation from sysfs metadata
//! - [`settings`]: Key-value settings store
//! - [`events`]: Event sink and library service interfaces
//! - [`exec`]: External command execution
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hotplug_mount_core::{
//!     events::{LogSink, NullLibrary},
//!     exec::SystemRunner,
//!     scanner::{MonitorConfig, StorageMonitor},
//!     settings::JsonFileStore,
//! };
//!
//! let settings = Arc::new(JsonFileStore::open("/etc/hotplug-mount.json").unwrap());
//! let monitor = StorageMonitor::new(
//!     MonitorConfig::default(),
//!     settings,
//!     Arc::new(SystemRunner),
//!     Arc::new(LogSink),
//!     Arc::new(NullLibrary),
//! );
//! monitor.start().unwrap();
//! // ... on shutdown:
//! monitor.shutdown();
//! monitor.join();
//! ```

pub mod error;
pub mod events;
pub mod exec;
pub mod mounter;
pub mod naming;
pub mod protect;
pub mod scanner;
pub mod settings;
pub mod sysfs;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use error::{Error, Result};
pub use events::{EventSink, LibraryService, StorageEvent};
pub use exec::{CommandRunner, SystemRunner};
pub use mounter::{MountOutcome, MountStateManager};
pub use naming::NameResolver;
pub use scanner::{MonitorConfig, StorageMonitor};
pub use settings::SettingsStore;
pub use sysfs::DeviceIdentity;
