//! Event fan-out for link state notifications
//!
//! The coordinator publishes derived events here; the rest of the platform
//! subscribes. Fire-and-forget: with no subscribers an event is dropped.

pub mod types;

pub use types::{AdbNotification, LinkEvent, LinkNotification};

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Broadcast bus distributing [`LinkEvent`]s to all active subscribers
pub struct EventBus {
    tx: broadcast::Sender<LinkEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: LinkEvent) {
        // send returns Err with no subscribers, which is normal here
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events
    ///
    /// The receiver rides a ring buffer; a subscriber that falls too far
    /// behind gets a `Lagged` error and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionSet;
    use crate::link::LinkState;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(LinkEvent::state_changed(
            LinkState::Connected,
            &FunctionSet::parse("mtp"),
        ));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, LinkEvent::UsbStateChanged { .. }));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(LinkEvent::LinkNotificationChanged {
            category: LinkNotification::FileTransferMtp,
        });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            LinkEvent::LinkNotificationChanged { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            LinkEvent::LinkNotificationChanged { .. }
        ));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        // must not panic with nobody listening
        bus.publish(LinkEvent::AdbNotificationChanged {
            category: AdbNotification::None,
        });
    }
}
