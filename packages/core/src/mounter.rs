//! Mount/unmount state machine for external devices.
//!
//! Owns the set of currently mounted devices and their mount paths.
//! Mount targets live under `<mount root>/external/<stable name>`. A
//! device whose mount fails stays tracked so the scan loop does not
//! retry it every cycle; a device whose unmount fails stays tracked so
//! it *is* retried, and gets a per-device extra verification flag for
//! the next mount pass (the device ID may have changed during the
//! failed unmount).

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{Error, IoResultExt};
use crate::exec::CommandRunner;

/// Result of a mount pass over a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// Device was freshly mounted this cycle.
    Mounted,
    /// Device was already mounted; nothing to do.
    AlreadyMounted,
    /// Mount was attempted and failed. The device is still tracked so
    /// it is not retried in a hot loop.
    Failed,
}

/// Result of an unmount pass over a single device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// Device is no longer tracked. Carries the removed mount record,
    /// or `None` if the device was tracked without ever mounting.
    Removed(Option<MountRecord>),
    /// Unmount failed; the device stays tracked for retry.
    Failed,
}

/// A successfully mounted device, held while the device is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    /// Directory the device is mounted at.
    pub mount_path: PathBuf,
    /// Resolved stable display name.
    pub display_name: String,
}

/// Tracks mounted devices and performs mount/unmount operations.
pub struct MountStateManager {
    mount_root: PathBuf,
    devroot: PathBuf,
    mounts_file: PathBuf,
    tracked: HashSet<String>,
    records: HashMap<String, MountRecord>,
    extra_check: HashSet<String>,
}

impl MountStateManager {
    /// Creates a manager mounting under `<mount_root>/external/`.
    pub fn new(mount_root: impl Into<PathBuf>, devroot: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
            devroot: devroot.into(),
            mounts_file: PathBuf::from("/proc/mounts"),
            tracked: HashSet::new(),
            records: HashMap::new(),
            extra_check: HashSet::new(),
        }
    }

    /// Overrides the mount table file consulted by the extra
    /// verification check. Tests point this at a fixture.
    pub fn with_mounts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_file = path.into();
        self
    }

    /// Target directory for a resolved stable name.
    pub fn target_dir(&self, stable_name: &str) -> PathBuf {
        self.mount_root.join("external").join(stable_name)
    }

    /// Mounts `name` at its stable target unless it is already handled.
    ///
    /// The steady-state path for an unchanged device across poll cycles
    /// is `AlreadyMounted`: tracked, and either no extra verification is
    /// pending for it or the OS mount table confirms the mount.
    pub fn mount_if_needed(
        &mut self,
        name: &str,
        stable_name: &str,
        runner: &dyn CommandRunner,
    ) -> MountOutcome {
        let target = self.target_dir(stable_name);

        if self.tracked.contains(name)
            && (!self.extra_check.contains(name) || self.is_mounted_at(name, &target))
        {
            return MountOutcome::AlreadyMounted;
        }

        if let Err(e) = fs::create_dir_all(&target).mount_point_context(&target) {
            warn!("{}", e);
        } else {
            debug!("set up dir for external device mount: {}", target.display());
        }

        let device_node = self.devroot.join(name);
        let mounted = match runner.run(
            "mount",
            &[&device_node.to_string_lossy(), &target.to_string_lossy()],
        ) {
            Ok(out) if out.success() => true,
            Ok(out) => {
                let e = Error::Mount {
                    device: name.to_string(),
                    message: out.stderr.trim().to_string(),
                };
                warn!("{}", e);
                false
            }
            Err(e) => {
                warn!("failed mounting {}: {}", name, e);
                false
            }
        };

        // Track the device either way so a dead mount is not retried
        // every cycle.
        self.tracked.insert(name.to_string());
        if mounted {
            self.extra_check.remove(name);
            info!("mounted {} at {}", name, target.display());
            self.records.insert(
                name.to_string(),
                MountRecord {
                    mount_path: target,
                    display_name: stable_name.to_string(),
                },
            );
            MountOutcome::Mounted
        } else {
            MountOutcome::Failed
        }
    }

    /// Unmounts a device that disappeared from the scan.
    ///
    /// Only on success are the record and the mount directory removed.
    /// On failure the device stays tracked and its next mount pass uses
    /// the stricter mount-table check.
    pub fn unmount(&mut self, name: &str, runner: &dyn CommandRunner) -> UnmountOutcome {
        let Some(record) = self.records.get(name).cloned() else {
            // Tracked but never mounted (earlier mount failure).
            self.tracked.remove(name);
            self.extra_check.remove(name);
            return UnmountOutcome::Removed(None);
        };

        let ok = match runner.run("umount", &[&record.mount_path.to_string_lossy()]) {
            Ok(out) => {
                if !out.success() {
                    let e = Error::Unmount {
                        path: record.mount_path.clone(),
                        message: out.stderr.trim().to_string(),
                    };
                    warn!("{}", e);
                }
                out.success()
            }
            Err(e) => {
                warn!("umount failed for {}: {}", name, e);
                false
            }
        };

        if !ok {
            info!("unmounting of drive {} failed, retry again later", name);
            self.extra_check.insert(name.to_string());
            return UnmountOutcome::Failed;
        }

        self.records.remove(name);
        self.tracked.remove(name);
        self.extra_check.remove(name);
        // Remove the folder we created as well so removal cleans up.
        if let Err(e) = fs::remove_dir(&record.mount_path) {
            debug!(
                "could not remove mount dir {}: {}",
                record.mount_path.display(),
                e
            );
        }
        info!("unmounted {} from {}", name, record.mount_path.display());
        UnmountOutcome::Removed(Some(record))
    }

    /// Best-effort unmount of every tracked device, for shutdown.
    ///
    /// Returns the records that were successfully unmounted.
    pub fn drain_all(&mut self, runner: &dyn CommandRunner) -> Vec<MountRecord> {
        let names: Vec<String> = self.records.keys().cloned().collect();
        let mut drained = Vec::new();
        for name in names {
            if let UnmountOutcome::Removed(Some(record)) = self.unmount(&name, runner) {
                drained.push(record);
            }
        }
        self.tracked.clear();
        self.extra_check.clear();
        drained
    }

    /// Replaces the tracked set with the devices accounted this cycle.
    pub fn set_tracked(&mut self, accounted: &HashSet<String>) {
        self.tracked = accounted.clone();
    }

    /// Devices currently tracked (mounted or mount-failed).
    pub fn tracked(&self) -> &HashSet<String> {
        &self.tracked
    }

    /// The mount record for `name`, if it mounted successfully.
    pub fn record_for(&self, name: &str) -> Option<&MountRecord> {
        self.records.get(name)
    }

    /// Number of devices with live mount records.
    pub fn mounted_count(&self) -> usize {
        self.records.len()
    }

    /// Whether `name` is flagged for the stricter mount-table check.
    pub fn needs_extra_check(&self, name: &str) -> bool {
        self.extra_check.contains(name)
    }

    /// Consults the OS mount table for `name` mounted at `target`.
    fn is_mounted_at(&self, name: &str, target: &Path) -> bool {
        let Ok(content) = fs::read_to_string(&self.mounts_file) else {
            return false;
        };
        let device_node = self.devroot.join(name);
        let escaped_target = escape_mount_path(&target.to_string_lossy());
        content.lines().any(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(src), Some(mnt)) => {
                    src == device_node.to_string_lossy() && mnt == escaped_target
                }
                _ => false,
            }
        })
    }
}

/// Escapes special characters the way the kernel renders them in
/// /proc/mounts: space (\040), tab (\011), newline (\012), backslash
/// (\134).
fn escape_mount_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            ' ' => encoded.push_str(r"\040"),
            '\t' => encoded.push_str(r"\011"),
            '\n' => encoded.push_str(r"\012"),
            '\\' => encoded.push_str(r"\134"),
            _ => encoded.push(c),
        }
    }
    encoded
}
