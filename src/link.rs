//! USB link state tracking
//!
//! Raw hardware notifications arrive as `(switch_name, switch_state)` pairs
//! from one of two mutually exclusive wiring modes:
//!
//! - **modern**: two independent switches, `usb_connected` and
//!   `usb_configuration`, each reporting `"1"` when asserted.
//! - **legacy**: a single `usb_mass_storage` switch reporting `"online"`,
//!   which drives both the connected and configured flags.
//!
//! The wiring mode is fixed for the process lifetime, selected at bootstrap
//! based on which switch state files exist. The tracker normalizes events
//! into a [`LinkState`] which is submitted to the coordinator's update
//! queue; debouncing of disconnects happens at that queue boundary, not
//! here.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Modern wiring: cable attach/detach switch
pub const SWITCH_USB_CONNECTED: &str = "usb_connected";
/// Modern wiring: host-configuration switch
pub const SWITCH_USB_CONFIGURATION: &str = "usb_configuration";
/// Legacy wiring: single mass-storage switch
pub const SWITCH_USB_LEGACY: &str = "usb_mass_storage";

const STATE_ASSERTED: &str = "1";
const STATE_ONLINE: &str = "online";

/// Logical connectivity phase of the USB peripheral link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connected,
    Configured,
    /// Configured without being connected - an impossible hardware
    /// combination, kept only so it can be rejected explicitly
    Unknown,
}

impl LinkState {
    pub fn from_flags(connected: bool, configured: bool) -> Self {
        match (connected, configured) {
            (false, false) => Self::Disconnected,
            (true, false) => Self::Connected,
            (true, true) => Self::Configured,
            (false, true) => Self::Unknown,
        }
    }

    pub fn connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Configured)
    }

    pub fn configured(&self) -> bool {
        matches!(self, Self::Configured | Self::Unknown)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connected => "CONNECTED",
            Self::Configured => "CONFIGURED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Which switch wiring the kernel exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WiringMode {
    Modern,
    Legacy,
}

/// Raw hardware notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchEvent {
    pub name: String,
    pub state: String,
}

impl SwitchEvent {
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
        }
    }
}

/// Switch state file locations
#[derive(Debug, Clone)]
pub struct SwitchPaths {
    pub connected_state: PathBuf,
    pub configuration_state: PathBuf,
    pub legacy_state: PathBuf,
}

impl Default for SwitchPaths {
    fn default() -> Self {
        Self {
            connected_state: PathBuf::from("/sys/class/switch/usb_connected/state"),
            configuration_state: PathBuf::from("/sys/class/switch/usb_configuration/state"),
            legacy_state: PathBuf::from("/sys/class/switch/usb_mass_storage/state"),
        }
    }
}

/// Result of probing the switch state files at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchProbe {
    Modern { connected: bool, configured: bool },
    Legacy { connected: bool },
    /// Neither wiring exists; not fatal, the logical state stays at
    /// whatever the persisted configuration implies
    Absent,
}

/// Read the initial hardware state, preferring the modern two-switch wiring
pub fn probe_switches(paths: &SwitchPaths) -> SwitchProbe {
    match std::fs::read_to_string(&paths.connected_state) {
        Ok(connected_raw) => {
            let connected = connected_raw.trim() == STATE_ASSERTED;
            let configured = std::fs::read_to_string(&paths.configuration_state)
                .map(|s| s.trim() == STATE_ASSERTED)
                .unwrap_or(false);
            SwitchProbe::Modern {
                connected,
                configured,
            }
        }
        Err(_) => {
            info!("No USB configuration switch support, trying legacy switch");
            match std::fs::read_to_string(&paths.legacy_state) {
                Ok(raw) => SwitchProbe::Legacy {
                    connected: raw.trim() == STATE_ONLINE,
                },
                Err(_) => {
                    info!("No legacy USB configuration switch support either");
                    SwitchProbe::Absent
                }
            }
        }
    }
}

/// Normalizes raw switch events into logical link states
///
/// Owns the connected/configured booleans; everything downstream works in
/// terms of the derived [`LinkState`].
#[derive(Debug)]
pub struct LinkStateTracker {
    wiring: WiringMode,
    connected: bool,
    configured: bool,
}

impl LinkStateTracker {
    pub fn new(wiring: WiringMode, connected: bool, configured: bool) -> Self {
        Self {
            wiring,
            connected,
            configured,
        }
    }

    pub fn wiring(&self) -> WiringMode {
        self.wiring
    }

    /// Apply a raw notification and return the recomputed state to submit.
    ///
    /// Returns `None` for switches that do not belong to the active wiring
    /// mode and for the impossible configured-but-not-connected
    /// combination, which is an invariant violation and never submitted.
    pub fn on_switch_event(&mut self, event: &SwitchEvent) -> Option<LinkState> {
        trace!("switch event: {}={}", event.name, event.state);

        match self.wiring {
            WiringMode::Legacy => {
                if event.name != SWITCH_USB_LEGACY {
                    return None;
                }
                let online = event.state == STATE_ONLINE;
                self.connected = online;
                self.configured = online;
            }
            WiringMode::Modern => match event.name.as_str() {
                SWITCH_USB_CONNECTED => self.connected = event.state == STATE_ASSERTED,
                SWITCH_USB_CONFIGURATION => self.configured = event.state == STATE_ASSERTED,
                _ => return None,
            },
        }

        let state = LinkState::from_flags(self.connected, self.configured);
        if state == LinkState::Unknown {
            error!(
                "impossible link state: configured without connected ({}={})",
                event.name, event.state
            );
            return None;
        }
        Some(state)
    }
}

/// Polls the switch state files and emits a [`SwitchEvent`] on every change.
///
/// Stands in for a platform uevent feed when none is available; any
/// external producer can inject events through the same channel instead.
pub struct SwitchMonitor {
    paths: SwitchPaths,
    wiring: WiringMode,
    interval: Duration,
    tx: mpsc::Sender<SwitchEvent>,
}

impl SwitchMonitor {
    pub fn new(
        paths: SwitchPaths,
        wiring: WiringMode,
        interval: Duration,
        tx: mpsc::Sender<SwitchEvent>,
    ) -> Self {
        Self {
            paths,
            wiring,
            interval,
            tx,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let watched: Vec<(&'static str, PathBuf)> = match self.wiring {
            WiringMode::Modern => vec![
                (SWITCH_USB_CONNECTED, self.paths.connected_state.clone()),
                (
                    SWITCH_USB_CONFIGURATION,
                    self.paths.configuration_state.clone(),
                ),
            ],
            WiringMode::Legacy => vec![(SWITCH_USB_LEGACY, self.paths.legacy_state.clone())],
        };

        let mut last: Vec<Option<String>> = vec![None; watched.len()];
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        debug!("switch monitor started ({:?} wiring)", self.wiring);
        loop {
            ticker.tick().await;
            for (i, (name, path)) in watched.iter().enumerate() {
                let Ok(raw) = std::fs::read_to_string(path) else {
                    continue;
                };
                let value = raw.trim().to_string();
                if last[i].as_deref() == Some(value.as_str()) {
                    continue;
                }
                last[i] = Some(value.clone());
                if self.tx.send(SwitchEvent::new(*name, value)).await.is_err() {
                    debug!("switch event channel closed, stopping monitor");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_state_from_flags() {
        assert_eq!(LinkState::from_flags(false, false), LinkState::Disconnected);
        assert_eq!(LinkState::from_flags(true, false), LinkState::Connected);
        assert_eq!(LinkState::from_flags(true, true), LinkState::Configured);
        assert_eq!(LinkState::from_flags(false, true), LinkState::Unknown);
    }

    #[test]
    fn test_link_state_accessors() {
        assert!(!LinkState::Disconnected.connected());
        assert!(LinkState::Connected.connected());
        assert!(!LinkState::Connected.configured());
        assert!(LinkState::Configured.connected());
        assert!(LinkState::Configured.configured());
    }

    #[test]
    fn test_modern_wiring_sequence() {
        let mut tracker = LinkStateTracker::new(WiringMode::Modern, false, false);

        let state = tracker.on_switch_event(&SwitchEvent::new(SWITCH_USB_CONNECTED, "1"));
        assert_eq!(state, Some(LinkState::Connected));

        let state = tracker.on_switch_event(&SwitchEvent::new(SWITCH_USB_CONFIGURATION, "1"));
        assert_eq!(state, Some(LinkState::Configured));

        let state = tracker.on_switch_event(&SwitchEvent::new(SWITCH_USB_CONFIGURATION, "0"));
        assert_eq!(state, Some(LinkState::Connected));

        let state = tracker.on_switch_event(&SwitchEvent::new(SWITCH_USB_CONNECTED, "0"));
        assert_eq!(state, Some(LinkState::Disconnected));
    }

    #[test]
    fn test_legacy_wiring_drives_both_flags() {
        let mut tracker = LinkStateTracker::new(WiringMode::Legacy, false, false);

        let state = tracker.on_switch_event(&SwitchEvent::new(SWITCH_USB_LEGACY, "online"));
        assert_eq!(state, Some(LinkState::Configured));

        let state = tracker.on_switch_event(&SwitchEvent::new(SWITCH_USB_LEGACY, "offline"));
        assert_eq!(state, Some(LinkState::Disconnected));
    }

    #[test]
    fn test_unrelated_switch_ignored() {
        let mut tracker = LinkStateTracker::new(WiringMode::Modern, true, true);
        assert_eq!(
            tracker.on_switch_event(&SwitchEvent::new("headset_jack", "1")),
            None
        );
        // legacy switch does not belong to modern wiring
        assert_eq!(
            tracker.on_switch_event(&SwitchEvent::new(SWITCH_USB_LEGACY, "online")),
            None
        );
    }

    #[test]
    fn test_impossible_state_never_submitted() {
        let mut tracker = LinkStateTracker::new(WiringMode::Modern, false, false);
        // configuration asserted while disconnected
        assert_eq!(
            tracker.on_switch_event(&SwitchEvent::new(SWITCH_USB_CONFIGURATION, "1")),
            None
        );
        // recovery once the connected switch catches up
        assert_eq!(
            tracker.on_switch_event(&SwitchEvent::new(SWITCH_USB_CONNECTED, "1")),
            Some(LinkState::Configured)
        );
    }

    #[test]
    fn test_probe_modern_and_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SwitchPaths {
            connected_state: dir.path().join("usb_connected"),
            configuration_state: dir.path().join("usb_configuration"),
            legacy_state: dir.path().join("usb_mass_storage"),
        };

        assert_eq!(probe_switches(&paths), SwitchProbe::Absent);

        std::fs::write(&paths.legacy_state, "online\n").unwrap();
        assert_eq!(
            probe_switches(&paths),
            SwitchProbe::Legacy { connected: true }
        );

        std::fs::write(&paths.connected_state, "1\n").unwrap();
        std::fs::write(&paths.configuration_state, "0\n").unwrap();
        assert_eq!(
            probe_switches(&paths),
            SwitchProbe::Modern {
                connected: true,
                configured: false
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_monitor_emits_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SwitchPaths {
            connected_state: dir.path().join("usb_connected"),
            configuration_state: dir.path().join("usb_configuration"),
            legacy_state: dir.path().join("usb_mass_storage"),
        };
        std::fs::write(&paths.connected_state, "0\n").unwrap();
        std::fs::write(&paths.configuration_state, "0\n").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let monitor = SwitchMonitor::new(
            paths.clone(),
            WiringMode::Modern,
            Duration::from_millis(100),
            tx,
        );
        let handle = monitor.spawn();

        // initial readings are reported once
        assert_eq!(
            rx.recv().await.unwrap(),
            SwitchEvent::new(SWITCH_USB_CONNECTED, "0")
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SwitchEvent::new(SWITCH_USB_CONFIGURATION, "0")
        );

        std::fs::write(&paths.connected_state, "1\n").unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            SwitchEvent::new(SWITCH_USB_CONNECTED, "1")
        );

        handle.abort();
    }
}
