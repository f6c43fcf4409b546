//! Debug-bridge collaborator
//!
//! The debug-bridge manager is an external component; the daemon only tells
//! it whether debugging is enabled and forwards authorization requests.
//! Support is optional - on builds without secure debugging there is no
//! bridge at all.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, UsbError};

/// Interface to the platform debug-bridge manager
pub trait DebugBridge: Send + Sync {
    /// Push the current enablement state
    fn set_enabled(&self, enabled: bool);

    /// Grant a pending debugging authorization request
    fn allow(&self, always: bool, public_key: &str);

    /// Reject a pending debugging authorization request
    fn deny(&self);

    /// Clear all stored authorization keys
    fn clear_keys(&self);
}

/// No-op bridge for environments without debug-bridge support
pub struct NullDebugBridge;

impl DebugBridge for NullDebugBridge {
    fn set_enabled(&self, enabled: bool) {
        debug!("debug bridge (null): set_enabled({})", enabled);
    }

    fn allow(&self, _always: bool, _public_key: &str) {}

    fn deny(&self) {}

    fn clear_keys(&self) {}
}

/// Facade over the optional debug bridge.
///
/// Authorization calls are forwarded when a bridge is installed and dropped
/// otherwise, except for key clearing: asking to clear keys with no bridge
/// present is a caller bug and is reported as such.
#[derive(Clone, Default)]
pub struct DebugBridgeRegistry {
    bridge: Option<Arc<dyn DebugBridge>>,
}

impl DebugBridgeRegistry {
    pub fn new(bridge: Option<Arc<dyn DebugBridge>>) -> Self {
        Self { bridge }
    }

    pub fn is_installed(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn set_enabled(&self, enabled: bool) {
        if let Some(bridge) = &self.bridge {
            bridge.set_enabled(enabled);
        }
    }

    pub fn allow_debugging(&self, always: bool, public_key: &str) {
        match &self.bridge {
            Some(bridge) => bridge.allow(always, public_key),
            None => warn!("allow_debugging ignored: debug bridge not initialized"),
        }
    }

    pub fn deny_debugging(&self) {
        match &self.bridge {
            Some(bridge) => bridge.deny(),
            None => warn!("deny_debugging ignored: debug bridge not initialized"),
        }
    }

    pub fn clear_debugging_keys(&self) -> Result<()> {
        match &self.bridge {
            Some(bridge) => {
                bridge.clear_keys();
                Ok(())
            }
            None => Err(UsbError::DebugBridgeUnavailable),
        }
    }
}
