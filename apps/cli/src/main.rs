//! hotplug-mount daemon binary.
//!
//! Runs the storage hotplug monitor in the foreground until terminated.
//! Operator tunables (protected device list, scan interval, feature
//! toggles) live in the JSON settings file; see the core library's
//! `settings` module for the key names.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};

use hotplug_mount_core::events::{LogSink, NullLibrary};
use hotplug_mount_core::exec::SystemRunner;
use hotplug_mount_core::scanner::{MonitorConfig, StorageMonitor};
use hotplug_mount_core::settings::{JsonFileStore, default_settings_path};

/// Removable storage hotplug monitor.
#[derive(Parser)]
#[command(name = "hotplug-mount")]
#[command(about = "Detects, names and mounts removable storage devices", long_about = None)]
struct Cli {
    /// Settings file path (defaults to the user config directory).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Root directory external mounts are created under.
    #[arg(long, default_value = "/var/media")]
    mount_root: PathBuf,

    /// Enumerate /dev directly instead of walking sysfs (desktop
    /// installs; disables stable naming).
    #[arg(long)]
    desktop: bool,

    /// Run as a client/secondary instance (skips library integration).
    #[arg(long)]
    client: bool,
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if !nix::unistd::geteuid().is_root() {
        warn!("not running as root; mount and unmount operations will likely fail");
    }

    let settings_path = match cli.settings {
        Some(path) => path,
        None => match default_settings_path() {
            Ok(path) => path,
            Err(e) => {
                eprintln!("cannot determine settings path: {e}");
                process::exit(1);
            }
        },
    };
    let settings = match JsonFileStore::open(&settings_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("cannot open settings: {e}");
            process::exit(1);
        }
    };
    info!("using settings at {}", settings_path.display());

    let config = MonitorConfig {
        mount_root: cli.mount_root,
        embedded: !cli.desktop,
        client: cli.client,
        ..Default::default()
    };
    let monitor = Arc::new(StorageMonitor::new(
        config,
        Arc::new(settings),
        Arc::new(SystemRunner),
        Arc::new(LogSink),
        Arc::new(NullLibrary),
    ));

    {
        let monitor = monitor.clone();
        ctrlc::set_handler(move || {
            info!("shutdown requested");
            monitor.shutdown();
        })
        .expect("failed to install signal handler");
    }

    if let Err(e) = monitor.start() {
        eprintln!("monitor failed to start: {e}");
        process::exit(1);
    }
    monitor.join();
}
