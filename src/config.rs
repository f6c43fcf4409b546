//! Daemon configuration
//!
//! Runtime tunables with conventional defaults, assembled from command line
//! arguments in `main.rs`. The debounce window and acknowledgement poll
//! bound are deliberately configurable: they only need to exceed the
//! kernel driver's observed re-enumeration and teardown latency.

use std::path::PathBuf;
use std::time::Duration;

use crate::link::SwitchPaths;
use crate::properties::PollConfig;

/// Debounce window for disconnect transitions
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Switch state file polling cadence of the bundled monitor
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Directory backing the file property store
    pub property_dir: PathBuf,
    /// Switch state file locations
    pub switch_paths: SwitchPaths,
    /// Optional file of `bootMode:fromSet:toSet` override lines
    pub oem_override_file: Option<PathBuf>,
    /// Disconnect debounce window
    pub debounce: Duration,
    /// Acknowledgement poll bound for configuration switches
    pub poll: PollConfig,
    /// Switch monitor polling cadence
    pub monitor_interval: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            property_dir: PathBuf::from("/var/lib/usb-linkd/properties"),
            switch_paths: SwitchPaths::default(),
            oem_override_file: None,
            debounce: DEFAULT_DEBOUNCE,
            poll: PollConfig::default(),
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
        }
    }
}
