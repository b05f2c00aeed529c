//! Device identity derivation from sysfs metadata.
//!
//! Builds the human-readable preferred name (vendor, model, capacity,
//! partition suffix) and reads the hardware serials used for stable
//! naming. Every read is best-effort: missing metadata degrades to an
//! empty name fragment or the `undefined` serial sentinel and never
//! aborts a mount attempt.
//!
//! The sysfs root is a parameter so tests can point it at a fixture
//! tree built with tempfile.

use std::fs;
use std::path::Path;

use log::debug;

use crate::exec::CommandRunner;

/// Sentinel serial for devices whose serial cannot be read.
pub const UNDEFINED_SERIAL: &str = "undefined";

/// Physical identity of a block device, derived once per mount attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Preferred display/mount name, e.g. `"Acme X1 (2 GB)"`.
    pub display_name: String,
    /// Freshly read hardware serial, or [`UNDEFINED_SERIAL`].
    pub new_serial: String,
    /// Serial previously exposed on the device's bus path, or
    /// [`UNDEFINED_SERIAL`]. Used to recognize serial migrations.
    pub old_serial: String,
}

/// Strips a partition suffix: `"sdb1"` -> `"sdb"`.
///
/// Whole-device sysfs entries are three characters (`sdX`); anything
/// longer refers to a partition of that device.
pub fn base_device(name: &str) -> &str {
    if name.len() > 3 { &name[..3] } else { name }
}

/// Derives the identity of `name` (a partition or whole-device entry)
/// from the metadata under `<sysroot>/block/<base>/`.
///
/// The fresh serial is read with the `vol_id` udev utility through the
/// supplied runner; the old serial comes from the `serial` file on the
/// device's USB bus path.
pub fn read_identity(
    sysroot: &Path,
    devroot: &Path,
    name: &str,
    runner: &dyn CommandRunner,
) -> DeviceIdentity {
    let base = base_device(name);
    let block_dir = sysroot.join("block").join(base);

    let mut display_name = String::new();
    match read_first_line(&block_dir.join("device").join("vendor")) {
        Some(vendor) => {
            display_name.push_str(&vendor);
            display_name.push(' ');
        }
        None => debug!("no vendor metadata for {}", name),
    }
    match read_first_line(&block_dir.join("device").join("model")) {
        Some(model) => {
            display_name.push_str(&model);
            display_name.push(' ');
        }
        None => debug!("no model metadata for {}", name),
    }
    match read_capacity_blocks(&block_dir.join("size")) {
        Some(blocks) => display_name.push_str(&format_capacity(blocks)),
        None => debug!("no size metadata for {}", name),
    }

    // Partition number suffix so multi-partition devices get unique names.
    if let Some(last) = name.chars().last()
        && last.is_ascii_digit()
        && last != '1'
    {
        display_name.push_str(&format!(" ({})", last));
    }
    let display_name = display_name.trim().to_string();

    let (new_serial, old_serial) = read_serials(sysroot, devroot, name, &block_dir, runner);

    DeviceIdentity {
        display_name,
        new_serial,
        old_serial,
    }
}

/// Reads the serial pair for a device.
///
/// Only devices whose uevent reports a USB bus path carry serials; for
/// everything else both come back as [`UNDEFINED_SERIAL`].
fn read_serials(
    sysroot: &Path,
    devroot: &Path,
    name: &str,
    block_dir: &Path,
    runner: &dyn CommandRunner,
) -> (String, String) {
    let mut new_serial = UNDEFINED_SERIAL.to_string();
    let mut old_serial = UNDEFINED_SERIAL.to_string();

    let Ok(uevent) = fs::read_to_string(block_dir.join("uevent")) else {
        return (new_serial, old_serial);
    };
    let Some(bus_path) = usb_bus_path(&uevent) else {
        return (new_serial, old_serial);
    };

    let serial_file = sysroot
        .join(bus_path.trim_start_matches('/'))
        .join("serial");
    if let Some(serial) = read_first_line(&serial_file) {
        old_serial = serial;
    }

    // The udev HDD serial technique for the fresh serial.
    let dev_path = devroot.join(name);
    match runner.run("vol_id", &["-u", &dev_path.to_string_lossy()]) {
        Ok(out) if !out.stdout_trimmed().is_empty() => {
            new_serial = out.stdout_trimmed().to_string();
        }
        Ok(_) => debug!("vol_id returned no serial for {}", name),
        Err(e) => debug!("vol_id failed for {}: {}", name, e),
    }

    (new_serial, old_serial)
}

/// Extracts the USB controller-level bus path from uevent data.
///
/// Takes the `PHYSDEVPATH` value and truncates it two path components
/// past the `usb` segment, keeping the trailing slash, so the result
/// points at the directory holding the `serial` file.
fn usb_bus_path(uevent: &str) -> Option<String> {
    let value = uevent
        .lines()
        .find_map(|line| line.strip_prefix("PHYSDEVPATH="))?;
    let usb_idx = value.find("usb")?;
    let first = value[usb_idx + 1..].find('/')? + usb_idx + 1;
    let second = value[first + 1..].find('/')? + first + 1;
    Some(value[..second + 1].to_string())
}

/// Reads the capacity file (512-byte sectors) and converts to 1K blocks.
fn read_capacity_blocks(path: &Path) -> Option<u64> {
    let sectors: u64 = read_first_line(path)?.parse().ok()?;
    Some(sectors / 2)
}

/// Formats a capacity in 1K blocks as a rounded `(N GB)`/`(N MB)` string.
fn format_capacity(blocks: u64) -> String {
    if blocks > 1024 * 1024 {
        format!("({} GB)", (blocks + 512 * 1024) / (1024 * 1024))
    } else {
        format!("({} MB)", (blocks + 512) / 1024)
    }
}

fn read_first_line(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    Some(content.lines().next().unwrap_or("").trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedRunner;
    use std::fs;
    use tempfile::TempDir;

    fn write_block_metadata(sysroot: &Path, dev: &str, vendor: &str, model: &str, sectors: u64) {
        let dir = sysroot.join("block").join(dev);
        fs::create_dir_all(dir.join("device")).unwrap();
        fs::write(dir.join("device").join("vendor"), format!("{}\n", vendor)).unwrap();
        fs::write(dir.join("device").join("model"), format!("{}\n", model)).unwrap();
        fs::write(dir.join("size"), format!("{}\n", sectors)).unwrap();
    }

    #[test]
    fn test_display_name_two_gb_device() {
        let tmp = TempDir::new().unwrap();
        // 4194304 sectors = 2097152 1K blocks = 2 GB
        write_block_metadata(tmp.path(), "sdb", "Acme", "X1", 4_194_304);

        let runner = ScriptedRunner::new();
        let identity = read_identity(tmp.path(), Path::new("/dev"), "sdb", &runner);
        assert_eq!(identity.display_name, "Acme X1 (2 GB)");
        assert_eq!(identity.new_serial, UNDEFINED_SERIAL);
        assert_eq!(identity.old_serial, UNDEFINED_SERIAL);
    }

    #[test]
    fn test_display_name_small_device_uses_mb() {
        let tmp = TempDir::new().unwrap();
        // 1048576 sectors = 524288 1K blocks = 512 MB
        write_block_metadata(tmp.path(), "sdc", "Tiny", "Stick", 1_048_576);

        let runner = ScriptedRunner::new();
        let identity = read_identity(tmp.path(), Path::new("/dev"), "sdc", &runner);
        assert_eq!(identity.display_name, "Tiny Stick (512 MB)");
    }

    #[test]
    fn test_partition_suffix_only_past_first() {
        let tmp = TempDir::new().unwrap();
        write_block_metadata(tmp.path(), "sdb", "Acme", "X1", 4_194_304);

        let runner = ScriptedRunner::new();
        let first = read_identity(tmp.path(), Path::new("/dev"), "sdb1", &runner);
        assert_eq!(first.display_name, "Acme X1 (2 GB)");

        let second = read_identity(tmp.path(), Path::new("/dev"), "sdb2", &runner);
        assert_eq!(second.display_name, "Acme X1 (2 GB) (2)");
    }

    #[test]
    fn test_missing_metadata_degrades_gracefully() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("block").join("sdd")).unwrap();

        let runner = ScriptedRunner::new();
        let identity = read_identity(tmp.path(), Path::new("/dev"), "sdd", &runner);
        assert_eq!(identity.display_name, "");
        assert_eq!(identity.new_serial, UNDEFINED_SERIAL);
    }

    #[test]
    fn test_usb_serial_lookup() {
        let tmp = TempDir::new().unwrap();
        write_block_metadata(tmp.path(), "sdb", "Acme", "X1", 4_194_304);

        let dir = tmp.path().join("block").join("sdb");
        fs::write(
            dir.join("uevent"),
            "MAJOR=8\nPHYSDEVPATH=/devices/pci0000:00/usb1/1-4/1-4:1.0/host6\n",
        )
        .unwrap();
        // The bus path is truncated two components past "usb1".
        let bus_dir = tmp.path().join("devices/pci0000:00/usb1/1-4");
        fs::create_dir_all(&bus_dir).unwrap();
        fs::write(bus_dir.join("serial"), "OLDSER\n").unwrap();

        let runner = ScriptedRunner::new();
        runner.set_output("vol_id", "ABC123\n");

        let identity = read_identity(tmp.path(), Path::new("/dev"), "sdb", &runner);
        assert_eq!(identity.new_serial, "ABC123");
        assert_eq!(identity.old_serial, "OLDSER");
    }

    #[test]
    fn test_usb_bus_path_extraction() {
        let uevent = "PHYSDEVPATH=/devices/pci0000:00/usb1/1-4/1-4:1.0/host6\n";
        assert_eq!(
            usb_bus_path(uevent).as_deref(),
            Some("/devices/pci0000:00/usb1/1-4/")
        );
        assert_eq!(usb_bus_path("PHYSDEVPATH=/devices/pci0000:00/ata1\n"), None);
        assert_eq!(usb_bus_path("MAJOR=8\n"), None);
    }

    #[test]
    fn test_base_device() {
        assert_eq!(base_device("sdb"), "sdb");
        assert_eq!(base_device("sdb1"), "sdb");
        assert_eq!(base_device("sdb12"), "sdb");
    }
}
