//! Read-only user/session settings source
//!
//! Settings persistence lives elsewhere on the platform; this daemon only
//! reads current values and reacts to change notifications, which are
//! translated into coordinator messages by [`watch_settings`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::coordinator::UsbCoordinator;

/// Which group of settings changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingChange {
    AdbEnabled,
    AdbNotifyPrefs,
}

/// Read-only view of the user settings the daemon consumes
pub trait SettingsSource: Send + Sync {
    /// Whether the user has enabled USB debugging
    fn adb_enabled(&self) -> bool;

    /// TCP port of network ADB when active
    fn net_adb_port(&self) -> Option<u16>;

    /// Whether the user wants the debug-bridge notification shown
    fn adb_notify(&self) -> bool;

    /// Subscribe to change notifications
    fn subscribe(&self) -> broadcast::Receiver<SettingChange>;
}

/// In-process settings source for the standalone daemon and tests
pub struct StaticSettings {
    adb_enabled: AtomicBool,
    net_adb_port: Mutex<Option<u16>>,
    adb_notify: AtomicBool,
    tx: broadcast::Sender<SettingChange>,
}

impl StaticSettings {
    pub fn new(adb_enabled: bool) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            adb_enabled: AtomicBool::new(adb_enabled),
            net_adb_port: Mutex::new(None),
            adb_notify: AtomicBool::new(true),
            tx,
        }
    }

    pub fn set_adb_enabled(&self, enabled: bool) {
        self.adb_enabled.store(enabled, Ordering::Release);
        let _ = self.tx.send(SettingChange::AdbEnabled);
    }

    pub fn set_net_adb_port(&self, port: Option<u16>) {
        *self.net_adb_port.lock().unwrap() = port;
        let _ = self.tx.send(SettingChange::AdbNotifyPrefs);
    }

    pub fn set_adb_notify(&self, notify: bool) {
        self.adb_notify.store(notify, Ordering::Release);
        let _ = self.tx.send(SettingChange::AdbNotifyPrefs);
    }
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self::new(false)
    }
}

impl SettingsSource for StaticSettings {
    fn adb_enabled(&self) -> bool {
        self.adb_enabled.load(Ordering::Acquire)
    }

    fn net_adb_port(&self) -> Option<u16> {
        *self.net_adb_port.lock().unwrap()
    }

    fn adb_notify(&self) -> bool {
        self.adb_notify.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingChange> {
        self.tx.subscribe()
    }
}

/// Translate settings changes into coordinator messages.
///
/// The fresh value is read back from the source at notification time, so a
/// burst of changes collapses to the final state.
pub fn watch_settings(
    settings: std::sync::Arc<dyn SettingsSource>,
    coordinator: UsbCoordinator,
) -> JoinHandle<()> {
    let mut rx = settings.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(SettingChange::AdbEnabled) => {
                    let enable = settings.adb_enabled();
                    debug!("ADB setting changed: {}", enable);
                    if coordinator.set_adb_enabled(enable).await.is_err() {
                        break;
                    }
                }
                Ok(SettingChange::AdbNotifyPrefs) => {
                    if coordinator.refresh_notifications().await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("settings watcher lagged by {} changes", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("settings watcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_settings_defaults() {
        let settings = StaticSettings::default();
        assert!(!settings.adb_enabled());
        assert!(settings.adb_notify());
        assert_eq!(settings.net_adb_port(), None);
    }

    #[tokio::test]
    async fn test_change_notification() {
        let settings = StaticSettings::new(false);
        let mut rx = settings.subscribe();

        settings.set_adb_enabled(true);
        assert_eq!(rx.recv().await.unwrap(), SettingChange::AdbEnabled);
        assert!(settings.adb_enabled());

        settings.set_net_adb_port(Some(5555));
        assert_eq!(rx.recv().await.unwrap(), SettingChange::AdbNotifyPrefs);
        assert_eq!(settings.net_adb_port(), Some(5555));
    }
}
