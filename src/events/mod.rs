//! Event bus for device lifecycle notifications
//!
//! Observers (loggers, UIs) subscribe here independently of the consumers
//! registered with the coordinator.

pub mod types;

pub use types::HubEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcasts [`HubEvent`]s to every subscriber
///
/// ```no_run
/// use uvc_hub::events::{EventBus, HubEvent};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
/// bus.publish(HubEvent::DeviceDetached { device: 1 });
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("{}", event.event_name());
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish to all subscribers; dropped when nobody listens
    pub fn publish(&self, event: HubEvent) {
        let _ = self.tx.send(event);
    }

    /// Receive all future events
    ///
    /// A subscriber that falls more than the channel capacity behind gets
    /// `Lagged` and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
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

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(HubEvent::DeviceDetached { device: 1 });

        let event = rx.recv().await.unwrap();
        assert_eq!(event, HubEvent::DeviceDetached { device: 1 });
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(HubEvent::StreamStopped { device: 3 });

        assert_eq!(rx1.recv().await.unwrap().device(), 3);
        assert_eq!(rx2.recv().await.unwrap().device(), 3);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(HubEvent::DeviceDetached { device: 1 });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
