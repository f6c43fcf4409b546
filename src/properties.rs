//! Property channel - the external key/value interface to the kernel
//!
//! USB gadget configuration is requested and observed through string-valued
//! properties: the daemon writes the desired configuration to one key and
//! the kernel driver reports the configuration it actually applied through
//! another. The only synchronization primitive the channel offers is a
//! bounded poll on the observed key.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, trace};

use crate::error::{Result, UsbError};

/// Persisted default function set, survives reboots
pub const KEY_PERSIST_USB_CONFIG: &str = "persist.sys.usb.config";
/// Requested active configuration
pub const KEY_USB_CONFIG: &str = "sys.usb.config";
/// Configuration the kernel driver has actually applied
pub const KEY_USB_STATE: &str = "sys.usb.state";
/// OEM boot mode identifier
pub const KEY_BOOT_MODE: &str = "ro.bootmode";
/// Legacy ADB enable flag, migrated away at startup
pub const KEY_LEGACY_ADB_ENABLE: &str = "persist.service.adb.enable";
/// Debug-bridge notification suppression flag ("0" suppresses)
pub const KEY_ADB_NOTIFY: &str = "persist.adb.notify";

/// Abstraction over the external property store
pub trait PropertyStore: Send + Sync {
    /// Read a property, returning `default` when unset
    fn get(&self, key: &str, default: &str) -> String;

    /// Write a property
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Bounded acknowledgement polling parameters
///
/// The bound only needs to exceed the kernel driver's observed teardown
/// latency; the nominal 20 x 50ms window is one second.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            max_attempts: 20,
        }
    }
}

/// Poll `key` until it reads `expected`, bounded by `poll`.
///
/// Returns `false` when the value never appeared within the bound. The
/// caller decides what a missed acknowledgement means for its transaction.
pub async fn wait_for_value(
    store: &dyn PropertyStore,
    key: &str,
    expected: &str,
    poll: PollConfig,
) -> bool {
    for attempt in 0..poll.max_attempts {
        if store.get(key, "") == expected {
            trace!("{} == {:?} after {} attempts", key, expected, attempt);
            return true;
        }
        tokio::time::sleep(poll.interval).await;
    }
    error!("waiting for {} == {:?} FAILED", key, expected);
    false
}

/// Property store backed by one file per key
///
/// Values are stored as trimmed single-line text. Reads of missing keys
/// return the supplied default; writes go through a single write + flush so
/// an observer never sees a partially written value.
pub struct FilePropertyStore {
    dir: PathBuf,
}

impl FilePropertyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl PropertyStore for FilePropertyStore {
    fn get(&self, key: &str, default: &str) -> String {
        match std::fs::read_to_string(self.key_path(key)) {
            Ok(contents) => contents.trim().to_string(),
            Err(_) => default.to_string(),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        use std::io::Write;

        let path = self.key_path(key);
        let mut file = std::fs::File::create(&path).map_err(|e| UsbError::Property {
            key: key.to_string(),
            reason: format!("open {}: {}", path.display(), e),
        })?;

        let mut buf = value.as_bytes().to_vec();
        if !value.ends_with('\n') {
            buf.push(b'\n');
        }
        file.write_all(&buf).map_err(|e| UsbError::Property {
            key: key.to_string(),
            reason: format!("write {}: {}", path.display(), e),
        })?;
        file.flush().map_err(|e| UsbError::Property {
            key: key.to_string(),
            reason: format!("flush {}: {}", path.display(), e),
        })?;
        Ok(())
    }
}

type MirrorPredicate = dyn Fn(&str) -> bool + Send + Sync;

/// In-memory property store for tests and embedding
///
/// Optionally emulates the kernel side of the channel: when the mirror
/// predicate accepts a configuration value, writes to `sys.usb.config` are
/// reflected into `sys.usb.state`, and writes to the persisted key trigger
/// the active key the way the platform property trigger does.
#[derive(Default)]
pub struct MemoryPropertyStore {
    values: Mutex<HashMap<String, String>>,
    kernel_mirror: Mutex<Option<Arc<MirrorPredicate>>>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that acknowledges every configuration it is asked to apply
    pub fn with_kernel_mirror() -> Self {
        let store = Self::new();
        store.set_kernel_mirror(|_| true);
        store
    }

    /// Install a predicate deciding which configuration values the emulated
    /// kernel acknowledges
    pub fn set_kernel_mirror<F>(&self, accept: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        *self.kernel_mirror.lock().unwrap() = Some(Arc::new(accept));
    }

    pub fn clear_kernel_mirror(&self) {
        *self.kernel_mirror.lock().unwrap() = None;
    }

    fn mirror(&self) -> Option<Arc<MirrorPredicate>> {
        self.kernel_mirror.lock().unwrap().clone()
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn get(&self, key: &str, default: &str) -> String {
        self.values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap();
        values.insert(key.to_string(), value.to_string());

        if let Some(accept) = self.mirror() {
            // persisted key triggers the active key, the active key is
            // applied (and reported) by the emulated kernel
            if key == KEY_PERSIST_USB_CONFIG {
                values.insert(KEY_USB_CONFIG.to_string(), value.to_string());
            }
            if (key == KEY_USB_CONFIG || key == KEY_PERSIST_USB_CONFIG) && accept(value) {
                values.insert(KEY_USB_STATE.to_string(), value.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_get_set() {
        let store = MemoryPropertyStore::new();
        assert_eq!(store.get(KEY_BOOT_MODE, "unknown"), "unknown");
        store.set(KEY_BOOT_MODE, "normal").unwrap();
        assert_eq!(store.get(KEY_BOOT_MODE, "unknown"), "normal");
    }

    #[test]
    fn test_memory_store_mirror_acknowledges_config() {
        let store = MemoryPropertyStore::with_kernel_mirror();
        store.set(KEY_USB_CONFIG, "mtp,adb").unwrap();
        assert_eq!(store.get(KEY_USB_STATE, ""), "mtp,adb");
    }

    #[test]
    fn test_memory_store_persist_triggers_active() {
        let store = MemoryPropertyStore::with_kernel_mirror();
        store.set(KEY_PERSIST_USB_CONFIG, "mtp").unwrap();
        assert_eq!(store.get(KEY_USB_CONFIG, ""), "mtp");
        assert_eq!(store.get(KEY_USB_STATE, ""), "mtp");
    }

    #[test]
    fn test_memory_store_selective_mirror() {
        let store = MemoryPropertyStore::new();
        store.set_kernel_mirror(|v| v == "none");
        store.set(KEY_USB_CONFIG, "none").unwrap();
        assert_eq!(store.get(KEY_USB_STATE, ""), "none");
        store.set(KEY_USB_CONFIG, "mtp").unwrap();
        // the emulated kernel never applied "mtp"
        assert_eq!(store.get(KEY_USB_STATE, ""), "none");
    }

    #[tokio::test]
    async fn test_wait_for_value_success() {
        let store = MemoryPropertyStore::with_kernel_mirror();
        store.set(KEY_USB_CONFIG, "mtp").unwrap();
        let ok = wait_for_value(&store, KEY_USB_STATE, "mtp", PollConfig::default()).await;
        assert!(ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_value_bounded_failure() {
        let store = MemoryPropertyStore::new();
        let poll = PollConfig {
            interval: Duration::from_millis(50),
            max_attempts: 3,
        };
        let start = tokio::time::Instant::now();
        let ok = wait_for_value(&store, KEY_USB_STATE, "mtp", poll).await;
        assert!(!ok);
        assert_eq!(start.elapsed(), Duration::from_millis(150));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePropertyStore::new(dir.path()).unwrap();
        assert_eq!(store.get(KEY_USB_CONFIG, "none"), "none");
        store.set(KEY_USB_CONFIG, "mtp,adb").unwrap();
        assert_eq!(store.get(KEY_USB_CONFIG, "none"), "mtp,adb");
        // values are stored newline-terminated but read back trimmed
        let raw = std::fs::read_to_string(dir.path().join(KEY_USB_CONFIG)).unwrap();
        assert_eq!(raw, "mtp,adb\n");
    }
}
