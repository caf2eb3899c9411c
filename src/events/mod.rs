//! Event system for device and stream notifications
//!
//! Hardware callbacks publish into a bounded broadcast ring buffer so that
//! the driver thread never waits on a slow subscriber.

pub mod types;

pub use types::{DeckLinkEvent, DeviceRef, ProfileChangeNotice};

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Bus for broadcasting DeckLink events
///
/// Subscribers can be tokio tasks (`recv().await`) or plain threads
/// (`blocking_recv()`).
///
/// # Example
///
/// ```no_run
/// use decklink_bridge::events::{DeckLinkEvent, EventBus};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("{}", event.event_name());
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<DeckLinkEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Never blocks. Without subscribers the event is dropped.
    pub fn publish(&self, event: DeckLinkEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    ///
    /// A subscriber that falls more than the ring size behind receives a
    /// `Lagged` error and misses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeckLinkEvent> {
        self.tx.subscribe()
    }

    /// Get the current number of active subscribers
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
    use crate::video::hal::{ProfileId, ProfileInfo};

    fn activated() -> DeckLinkEvent {
        DeckLinkEvent::ProfileActivated {
            profile: ProfileInfo {
                id: ProfileId::OneSubDeviceFullDuplex,
                device_name: "DeckLink Duo (1)".to_string(),
                is_active: true,
            },
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(activated());

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DeckLinkEvent::ProfileActivated { .. }));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(activated());

        assert_eq!(rx1.recv().await.unwrap().event_name(), "profile.activated");
        assert_eq!(rx2.recv().await.unwrap().event_name(), "profile.activated");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(activated());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_from_driver_thread() {
        let bus = std::sync::Arc::new(EventBus::new());
        let mut rx = bus.subscribe();

        let publisher = bus.clone();
        std::thread::spawn(move || publisher.publish(activated()))
            .join()
            .unwrap();

        let event = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(event.event_name(), "profile.activated");
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for _ in 0..EVENT_CHANNEL_CAPACITY + 10 {
            bus.publish(activated());
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(10))
        ));
    }
}
