//! Hotplug detection loops.
//!
//! One platform branch runs per process lifetime. The Linux branch is
//! the full pipeline: enumerate block devices, drop protected ones,
//! resolve stable names, drive the mount state machine, and diff the
//! accounted set against the previous cycle to detect removals. The
//! Windows and macOS branches are plain volume-list diff pollers with
//! no naming or mounting of their own.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{IoResultExt, Result};
use crate::events::{EventSink, LibraryService, StorageEvent};
use crate::exec::CommandRunner;
use crate::mounter::{MountOutcome, MountRecord, MountStateManager, UnmountOutcome};
use crate::naming::NameResolver;
use crate::protect::ProtectedDeviceFilter;
use crate::settings::{
    DEFAULT_SCAN_WAIT_PERIOD_MS, KEY_ENABLE_HOTPLUG_DETECTOR, KEY_SCAN_WAIT_PERIOD_MS,
    SettingsStore,
};
use crate::sysfs;

/// Static configuration for a monitor instance.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Root of the sysfs tree (normally `/sys`).
    pub sysroot: PathBuf,
    /// Root of the device namespace (normally `/dev`).
    pub devroot: PathBuf,
    /// External mounts land under `<mount_root>/external/`.
    pub mount_root: PathBuf,
    /// Volume directory polled on macOS.
    pub volumes_dir: PathBuf,
    /// Embedded installs enumerate via sysfs and do stable naming;
    /// desktop installs enumerate `/dev` directly.
    pub embedded: bool,
    /// Client/secondary instances never touch the library service.
    pub client: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sysroot: PathBuf::from("/sys"),
            devroot: PathBuf::from("/dev"),
            mount_root: PathBuf::from("/var/media"),
            volumes_dir: PathBuf::from("/Volumes"),
            embedded: true,
            client: false,
        }
    }
}

/// One scan cycle's worth of state for the Linux branch.
///
/// The rolling `previouslyMounted` set lives inside the
/// [`MountStateManager`] as its tracked set; this struct owns the
/// resolver and protected filter for the loop's lifetime.
pub struct LinuxScanner {
    config: MonitorConfig,
    runner: Arc<dyn CommandRunner>,
    events: Arc<dyn EventSink>,
    library: Arc<dyn LibraryService>,
    state: Arc<Mutex<MountStateManager>>,
    resolver: NameResolver,
    filter: ProtectedDeviceFilter,
}

impl LinuxScanner {
    /// Builds the scanner: loads the persisted name/serial map and
    /// computes the protected set once for the loop's lifetime.
    pub fn new(
        config: MonitorConfig,
        settings: Arc<dyn SettingsStore>,
        runner: Arc<dyn CommandRunner>,
        events: Arc<dyn EventSink>,
        library: Arc<dyn LibraryService>,
        state: Arc<Mutex<MountStateManager>>,
    ) -> Self {
        let filter = ProtectedDeviceFilter::build(
            &config.sysroot,
            &config.devroot,
            settings.as_ref(),
            runner.as_ref(),
            config.embedded,
        );
        let resolver = NameResolver::load(settings);
        Self {
            config,
            runner,
            events,
            library,
            state,
            resolver,
            filter,
        }
    }

    /// Runs exactly one scan cycle.
    ///
    /// Failures are scoped to individual devices; the cycle itself
    /// always completes.
    pub fn scan_once(&mut self) {
        let Self {
            config,
            runner,
            events,
            library,
            state,
            resolver,
            filter,
        } = self;

        let candidates = enumerate_candidates(config, filter);

        let mut accounted: HashSet<String> = HashSet::new();
        let mut added: Vec<MountRecord> = Vec::new();
        let mut removed: Vec<MountRecord> = Vec::new();
        let mut valid_removes = false;

        {
            let mut state = state.lock().expect("mount state lock poisoned");

            for name in &candidates {
                let stable_name = if config.embedded {
                    let identity = sysfs::read_identity(
                        &config.sysroot,
                        &config.devroot,
                        name,
                        runner.as_ref(),
                    );
                    resolver.resolve(
                        &identity.display_name,
                        &identity.new_serial,
                        &identity.old_serial,
                    )
                } else {
                    name.clone()
                };

                match state.mount_if_needed(name, &stable_name, runner.as_ref()) {
                    MountOutcome::Mounted => {
                        accounted.insert(name.clone());
                        if let Some(record) = state.record_for(name) {
                            added.push(record.clone());
                        }
                    }
                    MountOutcome::AlreadyMounted | MountOutcome::Failed => {
                        accounted.insert(name.clone());
                    }
                }
            }

            let lost: Vec<String> = state
                .tracked()
                .difference(&accounted)
                .cloned()
                .collect();
            if !lost.is_empty() {
                debug!("external drives lost: {:?}", lost);
            }
            for name in &lost {
                match state.unmount(name, runner.as_ref()) {
                    UnmountOutcome::Removed(Some(record)) => {
                        valid_removes = true;
                        removed.push(record);
                    }
                    UnmountOutcome::Removed(None) => {
                        valid_removes = true;
                    }
                    UnmountOutcome::Failed => {
                        // Keep it tracked so next cycle retries.
                        accounted.insert(name.clone());
                    }
                }
            }

            state.set_tracked(&accounted);
        }

        // Notify outside the state lock.
        let auto_import = !config.client && library.is_auto_import_enabled();
        for record in &added {
            if auto_import {
                info!(
                    "automatically adding device to import paths: {}",
                    record.mount_path.display()
                );
                library.add_watched_path(&record.mount_path);
            }
            events.notify(&StorageEvent::DeviceAdded {
                path: record.mount_path.clone(),
                name: record.display_name.clone(),
            });
        }
        for record in &removed {
            if auto_import {
                library.remove_watched_path(&record.mount_path);
            }
            events.notify(&StorageEvent::DeviceRemoved {
                path: record.mount_path.clone(),
                name: record.display_name.clone(),
            });
        }
        if (!added.is_empty() || valid_removes) && !config.client {
            library.rescan();
        }
    }
}

/// Enumerates mount candidates for this cycle, protected devices
/// removed.
///
/// Embedded installs walk `<sysroot>/block`, preferring per-partition
/// entries and falling back to the whole device when it exposes no
/// partitions (NTFS media commonly has none). Desktop installs list
/// partition nodes straight out of `<devroot>`.
fn enumerate_candidates(config: &MonitorConfig, filter: &ProtectedDeviceFilter) -> Vec<String> {
    let mut candidates = Vec::new();

    if config.embedded {
        let block_dir = config.sysroot.join("block");
        let entries = match fs::read_dir(&block_dir).listing_context(&block_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("{}", e);
                return candidates;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("sd") || name.len() <= 2 || filter.is_protected(&name) {
                continue;
            }
            let mut found_parts = false;
            if let Ok(children) = fs::read_dir(entry.path()) {
                for child in children.flatten() {
                    let child_name = child.file_name().to_string_lossy().to_string();
                    if child_name.starts_with(&name) && child_name.len() > name.len() {
                        found_parts = true;
                        candidates.push(child_name);
                    }
                }
            }
            if !found_parts {
                candidates.push(name);
            }
        }
    } else {
        let entries = match fs::read_dir(&config.devroot).listing_context(&config.devroot) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("{}", e);
                return candidates;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("sd") && name.len() > 3 && !filter.is_protected(&name) {
                candidates.push(name);
            }
        }
    }

    candidates.sort();
    candidates
}

/// Rolling set diff used by the Windows and macOS branches.
///
/// These platforms carry no identity or mounting logic: the display
/// name is the raw OS path and nothing is persisted.
#[derive(Debug, Default)]
pub struct VolumeDiffer {
    known: HashSet<PathBuf>,
}

impl VolumeDiffer {
    /// Seeds the differ with the volumes present at startup, which are
    /// not announced.
    pub fn new(initial: HashSet<PathBuf>) -> Self {
        Self { known: initial }
    }

    /// Diffs `current` against the previous listing.
    ///
    /// Returns (added, removed) and replaces the known set.
    pub fn diff(&mut self, current: HashSet<PathBuf>) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let added = current.difference(&self.known).cloned().collect();
        let removed = self.known.difference(&current).cloned().collect();
        self.known = current;
        (added, removed)
    }
}

/// Lists the entries of a volume directory (the macOS `/Volumes` poll).
pub fn list_volumes(dir: &Path) -> HashSet<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
        Err(e) => {
            warn!("cannot list volumes under {}: {}", dir.display(), e);
            HashSet::new()
        }
    }
}

/// Lists the existing drive-letter roots (the Windows poll).
#[cfg(target_os = "windows")]
pub fn list_drive_roots() -> HashSet<PathBuf> {
    ('A'..='Z')
        .map(|letter| PathBuf::from(format!("{}:\\", letter)))
        .filter(|root| root.exists())
        .collect()
}

/// The background storage monitor service.
///
/// Constructed explicitly and owned by whatever bootstraps the process;
/// [`StorageMonitor::start`] spawns the single poll thread,
/// [`StorageMonitor::shutdown`] stops it and best-effort unmounts every
/// still-tracked device.
pub struct StorageMonitor {
    config: MonitorConfig,
    settings: Arc<dyn SettingsStore>,
    runner: Arc<dyn CommandRunner>,
    events: Arc<dyn EventSink>,
    library: Arc<dyn LibraryService>,
    state: Arc<Mutex<MountStateManager>>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StorageMonitor {
    pub fn new(
        config: MonitorConfig,
        settings: Arc<dyn SettingsStore>,
        runner: Arc<dyn CommandRunner>,
        events: Arc<dyn EventSink>,
        library: Arc<dyn LibraryService>,
    ) -> Self {
        let state = Arc::new(Mutex::new(MountStateManager::new(
            config.mount_root.clone(),
            config.devroot.clone(),
        )));
        Self {
            config,
            settings,
            runner,
            events,
            library,
            state,
            stop: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Spawns the platform poll loop on a dedicated background thread.
    ///
    /// Returns without spawning when the detector is disabled via
    /// settings. Calling `start` twice is a no-op.
    pub fn start(&self) -> Result<()> {
        if !self.settings.get_bool(KEY_ENABLE_HOTPLUG_DETECTOR, true) {
            info!("hotplug storage detector disabled by settings");
            return Ok(());
        }
        let mut handle = self.handle.lock().expect("monitor handle lock poisoned");
        if handle.is_some() {
            return Ok(());
        }

        let config = self.config.clone();
        let settings = self.settings.clone();
        let runner = self.runner.clone();
        let events = self.events.clone();
        let library = self.library.clone();
        let state = self.state.clone();
        let stop = self.stop.clone();

        let builder = std::thread::Builder::new().name("storage-hotplug".to_string());
        let spawned = builder
            .spawn(move || {
                info!("storage device detector started");
                if cfg!(target_os = "windows") {
                    #[cfg(target_os = "windows")]
                    run_volume_diff_loop(
                        || list_drive_roots(),
                        &settings,
                        &events,
                        &library,
                        &config,
                        &stop,
                    );
                } else if cfg!(target_os = "macos") {
                    let volumes_dir = config.volumes_dir.clone();
                    run_volume_diff_loop(
                        move || list_volumes(&volumes_dir),
                        &settings,
                        &events,
                        &library,
                        &config,
                        &stop,
                    );
                } else {
                    let mut scanner = LinuxScanner::new(
                        config,
                        settings.clone(),
                        runner,
                        events,
                        library,
                        state,
                    );
                    while !stop.load(Ordering::Relaxed) {
                        scanner.scan_once();
                        sleep_interval(&*settings, &stop);
                    }
                }
                info!("storage device detector stopped");
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => snafu::whatever!("failed to spawn storage monitor thread: {e}"),
        };

        *handle = Some(thread);
        Ok(())
    }

    /// Stops the poll thread and best-effort unmounts every tracked
    /// device. Safe to call from a signal handler thread while a cycle
    /// is in flight; the shared mount state is mutex-guarded.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let mut state = self.state.lock().expect("mount state lock poisoned");
        if state.mounted_count() > 0 {
            info!("device cleanup, unmounting drives");
            let drained = state.drain_all(self.runner.as_ref());
            for record in &drained {
                self.events.notify(&StorageEvent::DeviceRemoved {
                    path: record.mount_path.clone(),
                    name: record.display_name.clone(),
                });
            }
        }
    }

    /// Blocks until the poll thread exits (i.e. after [`shutdown`]).
    ///
    /// [`shutdown`]: StorageMonitor::shutdown
    pub fn join(&self) {
        let thread = self.handle.lock().expect("monitor handle lock poisoned").take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }

    /// Shared mount state, for embedders that need to inspect it.
    pub fn state(&self) -> Arc<Mutex<MountStateManager>> {
        self.state.clone()
    }
}

/// Windows/macOS poll loop: list, diff, announce additions, rescan on
/// removals. No naming, no serial persistence, no unmounting.
fn run_volume_diff_loop<F>(
    list: F,
    settings: &Arc<dyn SettingsStore>,
    events: &Arc<dyn EventSink>,
    library: &Arc<dyn LibraryService>,
    config: &MonitorConfig,
    stop: &Arc<AtomicBool>,
) where
    F: Fn() -> HashSet<PathBuf>,
{
    let mut differ = VolumeDiffer::new(list());
    while !stop.load(Ordering::Relaxed) {
        let (added, removed) = differ.diff(list());
        for path in added {
            info!("detected new drive: {}", path.display());
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            events.notify(&StorageEvent::DeviceAdded { path, name });
        }
        if !removed.is_empty() {
            debug!("drives have been removed, rescanning");
            if !config.client {
                library.rescan();
            }
        }
        sleep_interval(&**settings, stop);
    }
}

/// Sleeps for the configured scan interval, waking early on shutdown.
fn sleep_interval(settings: &dyn SettingsStore, stop: &AtomicBool) {
    let total = settings.get_u64(KEY_SCAN_WAIT_PERIOD_MS, DEFAULT_SCAN_WAIT_PERIOD_MS);
    let mut slept = 0;
    while slept < total && !stop.load(Ordering::Relaxed) {
        let step = (total - slept).min(250);
        std::thread::sleep(Duration::from_millis(step));
        slept += step;
    }
}
