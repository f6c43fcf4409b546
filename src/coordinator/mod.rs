//! Configuration switch coordinator
//!
//! The single serialized authority over USB link and function-set state.
//! Hardware events, settings changes, and explicit API calls all post typed
//! messages into one queue; the worker task processes them one at a time,
//! so no two switch protocols or state updates ever run concurrently.
//!
//! ```text
//!  switch events ──┐
//!  settings watcher ─┼──> mpsc queue ──> CoordinatorWorker ──> PropertyStore
//!  API callers ─────┘        │                  │
//!                     (disconnect debounce)     └──> EventBus
//! ```
//!
//! The only blocking operation inside the worker is the bounded
//! acknowledgement poll of the switch protocol; it stalls the queue for at
//! most `max_attempts x interval`, which is the accepted price for racing
//! nothing.

mod types;
mod worker;

pub use types::{CoordinatorMsg, CoordinatorState, StatusSnapshot};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::adb::DebugBridgeRegistry;
use crate::error::{Result, UsbError};
use crate::events::EventBus;
use crate::link::LinkState;
use crate::oem::OemOverrideTable;
use crate::properties::{PollConfig, PropertyStore};
use crate::settings::SettingsSource;
use worker::CoordinatorWorker;

const COORDINATOR_QUEUE_CAPACITY: usize = 64;

/// Clonable handle posting messages to the coordinator worker
#[derive(Clone)]
pub struct UsbCoordinator {
    tx: mpsc::Sender<CoordinatorMsg>,
}

/// Spawn the coordinator worker task.
///
/// `state` comes from [`crate::bootstrap`]; the returned handle is the only
/// way to reach the worker.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    state: CoordinatorState,
    store: Arc<dyn PropertyStore>,
    oem: Arc<OemOverrideTable>,
    settings: Arc<dyn SettingsSource>,
    debug_bridge: DebugBridgeRegistry,
    events: Arc<EventBus>,
    debounce: Duration,
    poll: PollConfig,
) -> (UsbCoordinator, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COORDINATOR_QUEUE_CAPACITY);
    let worker = CoordinatorWorker::new(
        state,
        store,
        oem,
        settings,
        debug_bridge,
        events,
        debounce,
        poll,
    );
    let handle = tokio::spawn(worker.run(rx));
    (UsbCoordinator { tx }, handle)
}

impl UsbCoordinator {
    async fn post(&self, msg: CoordinatorMsg) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| UsbError::CoordinatorClosed)
    }

    /// Submit a normalized link state update (debounced by the worker)
    pub async fn update_state(&self, link: LinkState) -> Result<()> {
        self.post(CoordinatorMsg::UpdateState(link)).await
    }

    /// Enable or disable the debug-bridge function
    pub async fn set_adb_enabled(&self, enable: bool) -> Result<()> {
        self.post(CoordinatorMsg::SetAdbEnabled(enable)).await
    }

    /// Switch to `functions`; `make_default` also updates the persisted set
    pub async fn set_current_functions(
        &self,
        functions: Option<String>,
        make_default: bool,
    ) -> Result<()> {
        self.post(CoordinatorMsg::SetFunctions {
            functions,
            make_default,
        })
        .await
    }

    /// Mark boot as completed; link-state broadcasts start after this
    pub async fn boot_completed(&self) -> Result<()> {
        self.post(CoordinatorMsg::BootCompleted).await
    }

    /// Record a user switch, bouncing the config if file transfer is active
    pub async fn user_switched(&self, user_id: u32) -> Result<()> {
        self.post(CoordinatorMsg::UserSwitched(user_id)).await
    }

    /// Re-derive the debug-bridge notification category
    pub async fn refresh_notifications(&self) -> Result<()> {
        self.post(CoordinatorMsg::RefreshNotifications).await
    }

    /// Read-only snapshot of the coordinator state
    pub async fn snapshot(&self) -> Result<StatusSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.post(CoordinatorMsg::Snapshot(reply)).await?;
        rx.await.map_err(|_| UsbError::CoordinatorClosed)
    }
}
