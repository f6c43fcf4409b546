//! Coordinator message and state types

use serde::Serialize;
use tokio::sync::oneshot;

use crate::link::LinkState;

/// Messages processed one at a time, in arrival order, by the coordinator
/// worker. All external state mutation goes through these.
#[derive(Debug)]
pub enum CoordinatorMsg {
    /// Debounced link state update from the tracker
    UpdateState(LinkState),
    /// Enable or disable the debug-bridge function
    SetAdbEnabled(bool),
    /// Switch the active function set; `None` means the stored default
    SetFunctions {
        functions: Option<String>,
        make_default: bool,
    },
    /// The platform finished booting; state broadcasts start now
    BootCompleted,
    /// A different user became active
    UserSwitched(u32),
    /// Notification preferences changed; re-derive the ADB category
    RefreshNotifications,
    /// Read-only dump of the coordinator state
    Snapshot(oneshot::Sender<StatusSnapshot>),
}

/// The single mutable state instance, exclusively owned by the worker task.
/// Everything outside the worker sees only snapshots or broadcast events.
#[derive(Debug, Clone)]
pub struct CoordinatorState {
    pub link: LinkState,
    /// Currently applied function set (comma-joined wire form)
    pub current_functions: String,
    /// Persisted default function set
    pub default_functions: String,
    pub adb_enabled: bool,
    /// Active user, `None` until the first user switch
    pub current_user: Option<u32>,
    pub legacy_wiring: bool,
    pub boot_completed: bool,
}

/// Transient record of one switch attempt.
///
/// Carries the rollback anchors for the two-phase protocol; created at the
/// start of an attempt and dropped when it completes or fails.
#[derive(Debug)]
pub(crate) struct SwitchSession {
    pub target: String,
    pub previous_current: String,
    pub previous_default: String,
}

/// Read-only inspection surface
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub current_functions: String,
    pub default_functions: String,
    pub connected: bool,
    pub configured: bool,
    pub adb_enabled: bool,
    pub legacy_wiring: bool,
    pub boot_completed: bool,
    pub boot_mode: String,
    /// What the default set would resolve to under the live boot mode,
    /// present only when an override actually applies
    pub oem_override: Option<String>,
}
