//! Stable name resolution for external devices.
//!
//! Identical make/model/size drives would otherwise collide on their
//! derived display name, so each name is bound to a hardware serial and
//! persisted. The wire format is kept backward compatible with the
//! historic ad hoc form: `serial,name` pairs joined by `|`, append-only
//! so a crash loses at most the in-flight assignment.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;

use crate::settings::{KEY_NAME_SERIAL_MAP, SettingsStore};
use crate::sysfs::UNDEFINED_SERIAL;

/// In-memory view of the persisted `displayName -> serial` table.
#[derive(Debug, Default, Clone)]
pub struct NameSerialMap {
    entries: HashMap<String, String>,
}

impl NameSerialMap {
    /// Parses the serialized history into the current mapping.
    ///
    /// Entries are applied in order, so a later entry for the same name
    /// wins (this is how serial migrations take effect on reload).
    /// Entries with an `undefined` serial are historical placeholders
    /// and are skipped, which guarantees a valid mapping is never
    /// clobbered by one.
    pub fn parse(serialized: &str) -> Self {
        let mut entries = HashMap::new();
        for pair in serialized.split('|') {
            let Some((serial, name)) = pair.split_once(',') else {
                continue;
            };
            if serial == UNDEFINED_SERIAL {
                continue;
            }
            entries.insert(name.to_string(), serial.to_string());
        }
        Self { entries }
    }

    /// Returns the serial currently bound to `name`.
    pub fn serial_for(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Number of distinct mapped names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no names are mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn set(&mut self, name: &str, serial: &str) {
        self.entries.insert(name.to_string(), serial.to_string());
    }
}

/// Maps a device's physical identity to a stable, collision-free
/// display/mount name, persisted across restarts.
pub struct NameResolver {
    map: NameSerialMap,
    history: String,
    settings: Arc<dyn SettingsStore>,
}

impl NameResolver {
    /// Loads the persisted name/serial history from the settings store.
    pub fn load(settings: Arc<dyn SettingsStore>) -> Self {
        let history = settings.get(KEY_NAME_SERIAL_MAP, "");
        Self {
            map: NameSerialMap::parse(&history),
            history,
            settings,
        }
    }

    /// Resolves `preferred` to a stable name for the device identified
    /// by `new_serial` (with `old_serial` covering firmware/driver
    /// serial migrations).
    ///
    /// Tie-break order, applied to `preferred` and then to each
    /// suffixed candidate `preferred-2`, `preferred-3`, ...:
    /// 1. name already bound to `new_serial` -> reuse it;
    /// 2. name bound to `old_serial` -> re-point it to `new_serial`;
    /// 3. name unbound -> bind it to `new_serial`;
    /// otherwise the name belongs to an unrelated device, try the next
    /// candidate. Terminates because only finitely many colliding
    /// devices have ever been recorded.
    pub fn resolve(&mut self, preferred: &str, new_serial: &str, old_serial: &str) -> String {
        if self.try_candidate(preferred, new_serial, old_serial) {
            return preferred.to_string();
        }
        let mut counter = 2;
        loop {
            let candidate = format!("{preferred}-{counter}");
            if self.try_candidate(&candidate, new_serial, old_serial) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Read-only view of the current mapping.
    pub fn map(&self) -> &NameSerialMap {
        &self.map
    }

    fn try_candidate(&mut self, name: &str, new_serial: &str, old_serial: &str) -> bool {
        match self.map.serial_for(name) {
            Some(existing) if existing == new_serial => true,
            Some(existing) if existing == old_serial => {
                self.record(name, new_serial);
                info!(
                    "established serial {} for mount name '{}' (migrated from old serial {})",
                    new_serial, name, old_serial
                );
                true
            }
            Some(_) => false,
            None => {
                self.record(name, new_serial);
                info!("established serial {} for mount name '{}'", new_serial, name);
                true
            }
        }
    }

    /// Appends a `serial,name` pair to the history and flushes it.
    fn record(&mut self, name: &str, serial: &str) {
        if !self.history.is_empty() {
            self.history.push('|');
        }
        self.history.push_str(serial);
        self.history.push(',');
        self.history.push_str(name);
        self.map.set(name, serial);
        self.settings.put(KEY_NAME_SERIAL_MAP, &self.history);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemoryStore;

    fn resolver() -> (NameResolver, Arc<MemoryStore>) {
        let settings = Arc::new(MemoryStore::new());
        let resolver = NameResolver::load(settings.clone());
        (resolver, settings)
    }

    #[test]
    fn test_first_assignment_and_idempotence() {
        let (mut r, settings) = resolver();

        assert_eq!(r.resolve("Acme X1 (2 GB)", "ABC123", "undefined"), "Acme X1 (2 GB)");
        let persisted = settings.get(KEY_NAME_SERIAL_MAP, "");
        assert_eq!(persisted, "ABC123,Acme X1 (2 GB)");

        // Second resolve with the same serial is a pure lookup.
        assert_eq!(r.resolve("Acme X1 (2 GB)", "ABC123", "undefined"), "Acme X1 (2 GB)");
        assert_eq!(settings.get(KEY_NAME_SERIAL_MAP, ""), persisted);
    }

    #[test]
    fn test_collision_yields_distinct_names() {
        let (mut r, _settings) = resolver();

        let a = r.resolve("Acme X1 (2 GB)", "SER-A", "undefined");
        let b = r.resolve("Acme X1 (2 GB)", "SER-B", "undefined");
        let c = r.resolve("Acme X1 (2 GB)", "SER-C", "undefined");
        assert_eq!(a, "Acme X1 (2 GB)");
        assert_eq!(b, "Acme X1 (2 GB)-2");
        assert_eq!(c, "Acme X1 (2 GB)-3");

        // Re-querying each device gets its own previous name back.
        assert_eq!(r.resolve("Acme X1 (2 GB)", "SER-B", "undefined"), b);
        assert_eq!(r.resolve("Acme X1 (2 GB)", "SER-A", "undefined"), a);
        assert_eq!(r.resolve("Acme X1 (2 GB)", "SER-C", "undefined"), c);
    }

    #[test]
    fn test_serial_migration_repoints_mapping() {
        let settings = Arc::new(MemoryStore::new());
        settings.put(KEY_NAME_SERIAL_MAP, "OLD1,Acme X1 (2 GB)");
        let mut r = NameResolver::load(settings.clone());

        assert_eq!(r.resolve("Acme X1 (2 GB)", "NEW1", "OLD1"), "Acme X1 (2 GB)");
        assert_eq!(r.map().serial_for("Acme X1 (2 GB)"), Some("NEW1"));
        // History retains the old entry; the new one is appended.
        assert_eq!(
            settings.get(KEY_NAME_SERIAL_MAP, ""),
            "OLD1,Acme X1 (2 GB)|NEW1,Acme X1 (2 GB)"
        );

        // Subsequent calls hit the fast path, no further writes.
        let before = settings.get(KEY_NAME_SERIAL_MAP, "");
        assert_eq!(r.resolve("Acme X1 (2 GB)", "NEW1", "OLD1"), "Acme X1 (2 GB)");
        assert_eq!(settings.get(KEY_NAME_SERIAL_MAP, ""), before);
    }

    #[test]
    fn test_parse_later_entries_win() {
        let map = NameSerialMap::parse("OLD1,Drive|NEW1,Drive");
        assert_eq!(map.serial_for("Drive"), Some("NEW1"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_parse_skips_undefined_and_empty_tokens() {
        let map = NameSerialMap::parse("|undefined,Ghost|ABC,Real|");
        assert_eq!(map.serial_for("Ghost"), None);
        assert_eq!(map.serial_for("Real"), Some("ABC"));
    }

    #[test]
    fn test_undefined_serial_device_keeps_name_within_session() {
        let (mut r, _settings) = resolver();

        let name = r.resolve("NoName Stick (1 GB)", "undefined", "undefined");
        assert_eq!(name, "NoName Stick (1 GB)");
        // Same session, still undefined: fast path, same name.
        assert_eq!(
            r.resolve("NoName Stick (1 GB)", "undefined", "undefined"),
            name
        );
    }

    #[test]
    fn test_undefined_never_displaces_valid_mapping() {
        let settings = Arc::new(MemoryStore::new());
        settings.put(KEY_NAME_SERIAL_MAP, "ABC,Drive");
        let mut r = NameResolver::load(settings.clone());

        // A serial-less device with the same preferred name must not
        // steal "Drive" from the recorded device.
        let name = r.resolve("Drive", "undefined", "undefined");
        assert_eq!(name, "Drive-2");
        assert_eq!(r.map().serial_for("Drive"), Some("ABC"));
    }

    #[test]
    fn test_names_survive_reload() {
        let settings = Arc::new(MemoryStore::new());
        {
            let mut r = NameResolver::load(settings.clone());
            r.resolve("Acme X1 (2 GB)", "SER-A", "undefined");
            r.resolve("Acme X1 (2 GB)", "SER-B", "undefined");
        }
        let mut r = NameResolver::load(settings);
        assert_eq!(r.resolve("Acme X1 (2 GB)", "SER-B", "undefined"), "Acme X1 (2 GB)-2");
    }
}
