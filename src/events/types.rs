//! Broadcast event types
//!
//! Derived events only: the link-state broadcast plus notification
//! *categories*. Presentation of notifications is out of scope and left to
//! subscribers.

use serde::{Deserialize, Serialize};

use crate::link::LinkState;

/// Category of the user-visible link notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkNotification {
    None,
    FileTransferMtp,
    FileTransferPtp,
}

/// Category of the debug-bridge notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdbNotification {
    None,
    UsbOnly,
    NetworkOnly,
    Both,
}

/// Link event enumeration
///
/// Serialized with `serde(tag = "event", content = "data")`, producing:
/// ```json
/// {
///   "event": "usb.state_changed",
///   "data": { "connected": true, "configured": false, "functions": ["mtp"] }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum LinkEvent {
    /// Link state broadcast: connectivity flags plus the active functions
    #[serde(rename = "usb.state_changed")]
    UsbStateChanged {
        connected: bool,
        configured: bool,
        /// Active function tokens, empty when the set is "none"
        functions: Vec<String>,
    },

    /// The link notification category changed
    #[serde(rename = "usb.link_notification")]
    LinkNotificationChanged { category: LinkNotification },

    /// The debug-bridge notification category changed
    #[serde(rename = "usb.adb_notification")]
    AdbNotificationChanged { category: AdbNotification },
}

impl LinkEvent {
    /// Build the state broadcast from a link state and active function set
    pub fn state_changed(link: LinkState, functions: &crate::functions::FunctionSet) -> Self {
        Self::UsbStateChanged {
            connected: link.connected(),
            configured: link.configured(),
            functions: functions.tokens().to_vec(),
        }
    }

    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::UsbStateChanged { .. } => "usb.state_changed",
            Self::LinkNotificationChanged { .. } => "usb.link_notification",
            Self::AdbNotificationChanged { .. } => "usb.adb_notification",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionSet;

    #[test]
    fn test_event_name() {
        let event = LinkEvent::state_changed(LinkState::Configured, &FunctionSet::parse("mtp,adb"));
        assert_eq!(event.event_name(), "usb.state_changed");
    }

    #[test]
    fn test_serialization() {
        let event = LinkEvent::state_changed(LinkState::Connected, &FunctionSet::parse("mtp,adb"));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("usb.state_changed"));
        assert!(json.contains("\"connected\":true"));
        assert!(json.contains("\"configured\":false"));
        assert!(json.contains("mtp"));

        let deserialized: LinkEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(deserialized, LinkEvent::UsbStateChanged { .. }));
    }

    #[test]
    fn test_notification_categories_serialize() {
        let json = serde_json::to_string(&LinkEvent::AdbNotificationChanged {
            category: AdbNotification::UsbOnly,
        })
        .unwrap();
        assert!(json.contains("usb_only"));
    }
}
