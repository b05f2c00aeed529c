//! Protected device classification.
//!
//! Internal fixed storage must never be touched by the hotplug mount
//! path. A device is protected when its bus path resolves to a SATA or
//! AHCI controller, when the operator lists it explicitly, when its
//! stable by-id entry is a scsi id (non-embedded installs), or when it
//! is the designated boot device of a NAS install.
//!
//! Classification failures are never fatal: a device whose bus path
//! cannot be resolved is treated as unprotected and logged.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use crate::exec::CommandRunner;
use crate::settings::{KEY_ENABLE_NAS, KEY_PROTECTED_DEVICES, SettingsStore};

/// Magic signature identifying the boot device on NAS installs.
const BOOT_SIGNATURE: &str = "0x53414745";

/// Set of raw device names excluded from hotplug handling.
///
/// Built once at loop start, not per cycle.
#[derive(Debug, Default)]
pub struct ProtectedDeviceFilter {
    protected: HashSet<String>,
}

impl ProtectedDeviceFilter {
    /// Builds the protected set for this process lifetime.
    ///
    /// `embedded` selects the embedded policy (SATA/AHCI bus-path check
    /// under sysfs) over the desktop policy (by-id scsi entries plus the
    /// optional NAS boot device).
    pub fn build(
        sysroot: &Path,
        devroot: &Path,
        settings: &dyn SettingsStore,
        runner: &dyn CommandRunner,
        embedded: bool,
    ) -> Self {
        let mut protected = HashSet::new();

        let operator_list = settings.get(KEY_PROTECTED_DEVICES, "");
        for name in operator_list.split([',', ';']) {
            let name = name.trim();
            if !name.is_empty() {
                protected.insert(name.to_string());
            }
        }

        if embedded {
            collect_sata_devices(sysroot, &mut protected);
        } else {
            collect_scsi_by_id(devroot, &mut protected);
            if settings.get_bool(KEY_ENABLE_NAS, false) {
                collect_boot_device(devroot, runner, &mut protected);
            }
        }

        Self { protected }
    }

    /// Returns true if `name` must not be mount-handled.
    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.contains(name)
    }

    /// Number of protected devices.
    pub fn len(&self) -> usize {
        self.protected.len()
    }

    /// Returns true if no devices are protected.
    pub fn is_empty(&self) -> bool {
        self.protected.is_empty()
    }
}

/// Protects devices whose bus path resolves to a SATA or AHCI
/// controller.
fn collect_sata_devices(sysroot: &Path, protected: &mut HashSet<String>) {
    let block_dir = sysroot.join("block");
    let Ok(entries) = fs::read_dir(&block_dir) else {
        debug!("no block directory at {}", block_dir.display());
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("sd") || name.len() <= 2 {
            continue;
        }
        match fs::canonicalize(entry.path().join("device")) {
            Ok(canonical) => {
                let canonical = canonical.to_string_lossy();
                if canonical.contains("SATA") || canonical.contains("ahci") {
                    info!("found SATA HDD to ignore in external device mount checking: {name}");
                    protected.insert(name);
                }
            }
            Err(e) => warn!("error resolving canonical path for {}: {}", name, e),
        }
    }
}

/// Protects devices reachable through a `scsi*` stable id.
fn collect_scsi_by_id(devroot: &Path, protected: &mut HashSet<String>) {
    let by_id = devroot.join("disk").join("by-id");
    let Ok(entries) = fs::read_dir(&by_id) else {
        debug!("no by-id directory at {}", by_id.display());
        return;
    };
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with("scsi") {
            continue;
        }
        match fs::canonicalize(entry.path()) {
            Ok(canonical) => {
                if let Some(dev) = canonical.file_name() {
                    protected.insert(dev.to_string_lossy().to_string());
                }
            }
            Err(e) => warn!(
                "error resolving canonical path for {}: {}",
                entry.path().display(),
                e
            ),
        }
    }
}

/// Looks up the boot device by its vendor signature and protects it
/// along with all of its partitions.
fn collect_boot_device(devroot: &Path, runner: &dyn CommandRunner, protected: &mut HashSet<String>) {
    let boot_dev = match runner.run("tbutil", &["findsig", BOOT_SIGNATURE]) {
        Ok(out) if out.success() && !out.stdout_trimmed().is_empty() => {
            out.stdout_trimmed().to_string()
        }
        Ok(_) => return,
        Err(e) => {
            warn!("boot device signature lookup failed: {}", e);
            return;
        }
    };

    let Some(boot_name) = Path::new(&boot_dev)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
    else {
        return;
    };
    info!("found boot device; adding it to protected list: {boot_name}");
    protected.insert(boot_name.clone());

    if let Ok(entries) = fs::read_dir(devroot) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&boot_name) && name != boot_name {
                info!("found boot device partition; adding it to protected list: {name}");
                protected.insert(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemoryStore;
    use crate::testutil::ScriptedRunner;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn test_operator_list_split_on_comma_and_semicolon() {
        let tmp = TempDir::new().unwrap();
        let settings = MemoryStore::new();
        settings.put(KEY_PROTECTED_DEVICES, "sda;sdb, sdc");

        let runner = ScriptedRunner::new();
        let filter = ProtectedDeviceFilter::build(tmp.path(), tmp.path(), &settings, &runner, true);

        assert!(filter.is_protected("sda"));
        assert!(filter.is_protected("sdb"));
        assert!(filter.is_protected("sdc"));
        assert!(!filter.is_protected("sdd"));
    }

    #[test]
    fn test_sata_bus_path_is_protected() {
        let tmp = TempDir::new().unwrap();
        let sysroot = tmp.path();

        // sda sits on a SATA controller, sdb on USB.
        let sata_target = sysroot.join("devices").join("pci0").join("SATA1");
        let usb_target = sysroot.join("devices").join("pci0").join("usb1");
        std::fs::create_dir_all(&sata_target).unwrap();
        std::fs::create_dir_all(&usb_target).unwrap();

        let sda = sysroot.join("block").join("sda");
        let sdb = sysroot.join("block").join("sdb");
        std::fs::create_dir_all(&sda).unwrap();
        std::fs::create_dir_all(&sdb).unwrap();
        symlink(&sata_target, sda.join("device")).unwrap();
        symlink(&usb_target, sdb.join("device")).unwrap();

        let settings = MemoryStore::new();
        let runner = ScriptedRunner::new();
        let filter = ProtectedDeviceFilter::build(sysroot, sysroot, &settings, &runner, true);

        assert!(filter.is_protected("sda"));
        assert!(!filter.is_protected("sdb"));
    }

    #[test]
    fn test_dangling_device_link_is_unprotected() {
        let tmp = TempDir::new().unwrap();
        let sysroot = tmp.path();

        let sda = sysroot.join("block").join("sda");
        std::fs::create_dir_all(&sda).unwrap();
        symlink(sysroot.join("nonexistent"), sda.join("device")).unwrap();

        let settings = MemoryStore::new();
        let runner = ScriptedRunner::new();
        let filter = ProtectedDeviceFilter::build(sysroot, sysroot, &settings, &runner, true);

        assert!(!filter.is_protected("sda"));
    }

    #[test]
    fn test_scsi_by_id_is_protected() {
        let tmp = TempDir::new().unwrap();
        let devroot = tmp.path();

        let sda = devroot.join("sda");
        let sdb = devroot.join("sdb");
        std::fs::write(&sda, "").unwrap();
        std::fs::write(&sdb, "").unwrap();

        let by_id = devroot.join("disk").join("by-id");
        std::fs::create_dir_all(&by_id).unwrap();
        symlink(&sda, by_id.join("scsi-35000c500a1b2c3d4")).unwrap();
        symlink(&sdb, by_id.join("usb-Acme_X1_ABC123")).unwrap();

        let settings = MemoryStore::new();
        let runner = ScriptedRunner::new();
        let filter =
            ProtectedDeviceFilter::build(tmp.path(), devroot, &settings, &runner, false);

        assert!(filter.is_protected("sda"));
        assert!(!filter.is_protected("sdb"));
    }

    #[test]
    fn test_boot_device_and_partitions_protected() {
        let tmp = TempDir::new().unwrap();
        let devroot = tmp.path();
        std::fs::write(devroot.join("sdc"), "").unwrap();
        std::fs::write(devroot.join("sdc1"), "").unwrap();
        std::fs::write(devroot.join("sdc2"), "").unwrap();
        std::fs::write(devroot.join("sdd"), "").unwrap();

        let settings = MemoryStore::new();
        settings.put(KEY_ENABLE_NAS, "true");
        let runner = ScriptedRunner::new();
        runner.set_output("tbutil", "/dev/sdc\n");

        let filter =
            ProtectedDeviceFilter::build(tmp.path(), devroot, &settings, &runner, false);

        assert!(filter.is_protected("sdc"));
        assert!(filter.is_protected("sdc1"));
        assert!(filter.is_protected("sdc2"));
        assert!(!filter.is_protected("sdd"));
    }

    #[test]
    fn test_nas_lookup_skipped_when_disabled() {
        let tmp = TempDir::new().unwrap();
        let settings = MemoryStore::new();
        let runner = ScriptedRunner::new();
        runner.set_output("tbutil", "/dev/sdc\n");

        let filter =
            ProtectedDeviceFilter::build(tmp.path(), tmp.path(), &settings, &runner, false);

        assert_eq!(runner.calls_for("tbutil"), 0);
        assert!(filter.is_empty());
    }
}
