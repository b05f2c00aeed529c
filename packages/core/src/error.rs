//! Unified error types for the hotplug-mount-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Failed to list a device directory (e.g. /sys/block or /dev).
    #[snafu(display("failed to list devices under {}", path.display()))]
    DeviceListing {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Mount operation failed.
    #[snafu(display("failed to mount {device}: {message}"))]
    Mount { device: String, message: String },

    /// Unmount operation failed.
    #[snafu(display("failed to unmount {}: {message}", path.display()))]
    Unmount { path: PathBuf, message: String },

    /// Settings file not found or cannot be read.
    #[snafu(display("failed to read settings at {}", path.display()))]
    SettingsRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the settings file.
    #[snafu(display("failed to write settings at {}", path.display()))]
    SettingsWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Settings file exists but does not parse.
    #[snafu(display("failed to parse settings: {message}"))]
    SettingsParse { message: String },

    /// Home directory not found.
    #[snafu(display("Could not determine home directory"))]
    HomeDirNotFound,

    #[snafu(whatever, display("{message}"))]
    Generic {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for device directory listing errors.
    fn listing_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount point creation errors.
    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for settings read errors.
    fn settings_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for settings write errors.
    fn settings_write_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn listing_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(DeviceListingSnafu { path: path.into() })
    }

    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointCreationSnafu { path: path.into() })
    }

    fn settings_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(SettingsReadSnafu { path: path.into() })
    }

    fn settings_write_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(SettingsWriteSnafu { path: path.into() })
    }
}
