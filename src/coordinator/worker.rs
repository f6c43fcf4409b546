//! Coordinator worker - the serialized actor loop and switch protocol

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::types::{CoordinatorMsg, CoordinatorState, StatusSnapshot, SwitchSession};
use crate::adb::DebugBridgeRegistry;
use crate::events::{AdbNotification, EventBus, LinkEvent, LinkNotification};
use crate::functions::{
    add_function, contains_function, remove_function, FunctionSet, FUNCTIONS_NONE, FUNCTION_ADB,
    FUNCTION_MTP, FUNCTION_PTP,
};
use crate::link::LinkState;
use crate::oem::OemOverrideTable;
use crate::properties::{
    wait_for_value, PollConfig, PropertyStore, KEY_ADB_NOTIFY, KEY_BOOT_MODE, KEY_PERSIST_USB_CONFIG,
    KEY_USB_CONFIG, KEY_USB_STATE,
};
use crate::settings::SettingsSource;

pub(crate) struct CoordinatorWorker {
    pub(crate) state: CoordinatorState,
    pub(crate) store: Arc<dyn PropertyStore>,
    pub(crate) oem: Arc<OemOverrideTable>,
    pub(crate) settings: Arc<dyn SettingsSource>,
    pub(crate) debug_bridge: DebugBridgeRegistry,
    pub(crate) events: Arc<EventBus>,
    pub(crate) debounce: Duration,
    pub(crate) poll: PollConfig,
    link_notification: LinkNotification,
    adb_notification: AdbNotification,
}

impl CoordinatorWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        state: CoordinatorState,
        store: Arc<dyn PropertyStore>,
        oem: Arc<OemOverrideTable>,
        settings: Arc<dyn SettingsSource>,
        debug_bridge: DebugBridgeRegistry,
        events: Arc<EventBus>,
        debounce: Duration,
        poll: PollConfig,
    ) -> Self {
        Self {
            state,
            store,
            oem,
            settings,
            debug_bridge,
            events,
            debounce,
            poll,
            link_notification: LinkNotification::None,
            adb_notification: AdbNotification::None,
        }
    }

    /// The actor loop.
    ///
    /// Link state updates are buffered in a single pending slot: a
    /// disconnect waits out the debounce window, anything else fires
    /// immediately, and a newly submitted update always replaces the
    /// pending one (last requested wins). Every other message is handled
    /// strictly in arrival order.
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<CoordinatorMsg>) {
        let mut pending: Option<(LinkState, Instant)> = None;

        loop {
            // a dummy deadline keeps the disabled branch harmless
            let deadline = pending
                .map(|(_, at)| at)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline), if pending.is_some() => {
                    if let Some((link, _)) = pending.take() {
                        self.apply_link_state(link).await;
                    }
                }

                msg = rx.recv() => match msg {
                    Some(CoordinatorMsg::UpdateState(link)) => {
                        // debounce disconnects to ride out re-enumeration blips
                        let delay = if link == LinkState::Disconnected {
                            self.debounce
                        } else {
                            Duration::ZERO
                        };
                        pending = Some((link, Instant::now() + delay));
                    }
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
            }
        }

        info!("coordinator stopped");
    }

    async fn handle(&mut self, msg: CoordinatorMsg) {
        match msg {
            CoordinatorMsg::UpdateState(_) => unreachable!("coalesced in run()"),
            CoordinatorMsg::SetAdbEnabled(enable) => self.set_adb_enabled(enable).await,
            CoordinatorMsg::SetFunctions {
                functions,
                make_default,
            } => {
                self.set_enabled_functions(functions.as_deref(), make_default)
                    .await;
            }
            CoordinatorMsg::BootCompleted => {
                debug!("boot completed");
                self.state.boot_completed = true;
                self.debug_bridge.set_enabled(self.state.adb_enabled);
            }
            CoordinatorMsg::UserSwitched(user_id) => self.handle_user_switched(user_id).await,
            CoordinatorMsg::RefreshNotifications => self.update_adb_notification(),
            CoordinatorMsg::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn apply_link_state(&mut self, link: LinkState) {
        debug!("link state -> {}", link);
        self.state.link = link;
        self.update_link_notification();
        self.update_adb_notification();
        if !link.connected() {
            // restore the default function set when the link drops
            self.set_enabled_functions(None, false).await;
        }
        if self.state.boot_completed {
            self.broadcast_state();
        }
    }

    async fn set_adb_enabled(&mut self, enable: bool) {
        if enable == self.state.adb_enabled {
            return;
        }
        info!("setAdbEnabled: {}", enable);
        self.state.adb_enabled = enable;

        // the debug function rides on whichever set is persisted, so the
        // change goes through a persisted re-apply of the default
        let default = self.state.default_functions.clone();
        self.set_enabled_functions(Some(default.as_str()), true).await;

        self.debug_bridge.set_enabled(enable);
        self.update_adb_notification();
    }

    /// The two-phase switch protocol: tear down to "none", then bring up
    /// the resolved target, with bounded acknowledgement polling and
    /// rollback. State fields only change after the corresponding property
    /// step is confirmed.
    async fn set_enabled_functions(&mut self, functions: Option<&str>, make_default: bool) {
        debug!(
            "setEnabledFunctions {:?} makeDefault: {}",
            functions, make_default
        );
        let boot_mode = self.store.get(KEY_BOOT_MODE, "unknown");

        match functions {
            // Persisted switch. Skipping OEM resolution is safe here: with
            // no override entry for the live boot mode, resolution is the
            // identity.
            Some(requested) if make_default && !self.oem.needs_override(&boot_mode) => {
                let target = self.apply_adb_policy(requested);
                if target == self.state.default_functions {
                    return;
                }
                let session = SwitchSession {
                    target,
                    previous_current: self.state.current_functions.clone(),
                    previous_default: self.state.default_functions.clone(),
                };

                if !self.set_usb_config(FUNCTIONS_NONE).await {
                    error!("Failed to disable USB");
                    self.restore_config(&session.previous_current).await;
                    return;
                }

                // writing the persisted property also drives the active
                // configuration through the kernel property trigger
                if let Err(e) = self.store.set(KEY_PERSIST_USB_CONFIG, &session.target) {
                    warn!("persisted config write failed: {}", e);
                }
                if wait_for_value(self.store.as_ref(), KEY_USB_STATE, &session.target, self.poll)
                    .await
                {
                    self.state.current_functions = session.target.clone();
                    self.state.default_functions = session.target;
                } else {
                    error!(
                        "Failed to switch persistent USB config to {}",
                        session.target
                    );
                    // revert the persisted property; the active side stays
                    // torn down at "none"
                    if let Err(e) = self
                        .store
                        .set(KEY_PERSIST_USB_CONFIG, &session.previous_default)
                    {
                        warn!("persisted config revert failed: {}", e);
                    }
                }
            }

            _ => {
                let requested = functions
                    .unwrap_or(self.state.default_functions.as_str())
                    .to_string();
                let resolved = self.oem.resolve(&boot_mode, &requested);
                let target = self.apply_adb_policy(&resolved);
                if target == self.state.current_functions {
                    return;
                }
                let session = SwitchSession {
                    target,
                    previous_current: self.state.current_functions.clone(),
                    previous_default: self.state.default_functions.clone(),
                };

                if !self.set_usb_config(FUNCTIONS_NONE).await {
                    error!("Failed to disable USB");
                    self.restore_config(&session.previous_current).await;
                    return;
                }

                if self.set_usb_config(&session.target).await {
                    self.state.current_functions = session.target;
                } else {
                    error!("Failed to switch USB config to {}", session.target);
                    self.restore_config(&session.previous_current).await;
                }
            }
        }
    }

    /// ADB inclusion is applied after OEM resolution so an override can
    /// never strip or force the debug function.
    fn apply_adb_policy(&self, functions: &str) -> String {
        if self.state.adb_enabled {
            add_function(functions, FUNCTION_ADB)
        } else {
            remove_function(functions, FUNCTION_ADB)
        }
    }

    /// Request a configuration and poll for the kernel acknowledgement
    async fn set_usb_config(&self, config: &str) -> bool {
        debug!("setUsbConfig({})", config);
        if let Err(e) = self.store.set(KEY_USB_CONFIG, config) {
            warn!("active config write failed: {}", e);
        }
        wait_for_value(self.store.as_ref(), KEY_USB_STATE, config, self.poll).await
    }

    /// Best-effort restore after a failed transaction; the result is not
    /// re-verified recursively.
    async fn restore_config(&self, previous: &str) {
        if !self.set_usb_config(previous).await {
            error!("Failed to restore previous USB config {}", previous);
        }
    }

    async fn handle_user_switched(&mut self, user_id: u32) {
        let transfer_active = contains_function(&self.state.current_functions, FUNCTION_MTP)
            || contains_function(&self.state.current_functions, FUNCTION_PTP);

        if transfer_active && self.state.current_user.is_some() {
            // the host caches per-user file-transfer state; a detach/attach
            // cycle forces it to re-read
            info!("Current user switched; resetting USB host stack for file transfer");
            let current = self.state.current_functions.clone();
            self.set_usb_config(FUNCTIONS_NONE).await;
            self.set_usb_config(&current).await;
        }
        self.state.current_user = Some(user_id);
    }

    fn update_link_notification(&mut self) {
        let category = if self.state.link.connected() {
            if contains_function(&self.state.current_functions, FUNCTION_MTP) {
                LinkNotification::FileTransferMtp
            } else if contains_function(&self.state.current_functions, FUNCTION_PTP) {
                LinkNotification::FileTransferPtp
            } else {
                LinkNotification::None
            }
        } else {
            LinkNotification::None
        };

        if category != self.link_notification {
            self.link_notification = category;
            self.events
                .publish(LinkEvent::LinkNotificationChanged { category });
        }
    }

    fn update_adb_notification(&mut self) {
        let suppressed =
            self.store.get(KEY_ADB_NOTIFY, "") == "0" || !self.settings.adb_notify();
        let usb_active = self.state.adb_enabled && self.state.link.connected();
        let net_active = self.state.adb_enabled && self.settings.net_adb_port().is_some();

        let category = if suppressed {
            AdbNotification::None
        } else {
            match (usb_active, net_active) {
                (true, true) => AdbNotification::Both,
                (true, false) => AdbNotification::UsbOnly,
                (false, true) => AdbNotification::NetworkOnly,
                (false, false) => AdbNotification::None,
            }
        };

        if category != self.adb_notification {
            self.adb_notification = category;
            self.events
                .publish(LinkEvent::AdbNotificationChanged { category });
        }
    }

    fn broadcast_state(&self) {
        let functions = FunctionSet::parse(&self.state.current_functions);
        let event = LinkEvent::state_changed(self.state.link, &functions);
        debug!(
            "broadcasting link state: {} functions: {}",
            self.state.link, functions
        );
        self.events.publish(event);
    }

    fn snapshot(&self) -> StatusSnapshot {
        let boot_mode = self.store.get(KEY_BOOT_MODE, "unknown");
        let resolved = self.oem.resolve(&boot_mode, &self.state.default_functions);
        StatusSnapshot {
            current_functions: self.state.current_functions.clone(),
            default_functions: self.state.default_functions.clone(),
            connected: self.state.link.connected(),
            configured: self.state.link.configured(),
            adb_enabled: self.state.adb_enabled,
            legacy_wiring: self.state.legacy_wiring,
            boot_completed: self.state.boot_completed,
            boot_mode,
            oem_override: (resolved != self.state.default_functions).then_some(resolved),
        }
    }
}
