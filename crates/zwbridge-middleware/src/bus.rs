//! Headless, typed publish/subscribe bus for normalized events.
//!
//! Uses a [`tokio::sync::broadcast`] channel under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  The MQTT forwarder is one subscriber; tests and diagnostics
//! can attach more.

use tokio::sync::broadcast;
use zwbridge_types::{BridgeError, NormalizedEvent};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<NormalizedEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event` to every current subscriber.
    ///
    /// Returns the number of receivers that were handed the event.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Channel`] when nobody is subscribed.
    pub fn publish(&self, event: NormalizedEvent) -> Result<usize, BridgeError> {
        self.sender
            .send(event)
            .map_err(|e| BridgeError::Channel(format!("event bus send error: {e}")))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NormalizedEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zwbridge_types::{DeviceId, EventBody, Payload, SemanticTopic, StateCommand};

    fn state_event(topic: SemanticTopic, device: &str) -> NormalizedEvent {
        NormalizedEvent::state(topic, DeviceId::from(device), StateCommand::On)
    }

    fn battery_event(device: &str) -> NormalizedEvent {
        NormalizedEvent::new(
            SemanticTopic::Openzwave,
            DeviceId::from(device),
            EventBody::BatteryLevel(Payload::Int(90)),
        )
    }

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let event = state_event(SemanticTopic::Lock, "lock.front");
        bus.publish(event.clone())?;

        assert_eq!(rx.recv().await?, event);
        Ok(())
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = battery_event("multi.kitchen");
        assert_eq!(bus.publish(event.clone())?, 2);

        assert_eq!(rx1.recv().await?, event);
        assert_eq!(rx2.recv().await?, event);
        Ok(())
    }

    #[tokio::test]
    async fn single_channel_preserves_order() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);

        bus.publish(battery_event("multi.kitchen"))?;
        bus.publish(state_event(SemanticTopic::Sensor, "door.back"))?;

        assert_eq!(rx.recv().await?.topic, SemanticTopic::Openzwave);
        assert_eq!(rx.recv().await?.topic, SemanticTopic::Sensor);
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert_eq!(bus.receiver_count(), 0);
        Ok(())
    }

    #[test]
    fn publish_no_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish(state_event(SemanticTopic::Ack, "switch.fan"));
        assert!(matches!(result, Err(BridgeError::Channel(_))));
    }

    #[tokio::test]
    async fn lag_on_slow_subscriber() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe();

        for _ in 0..100 {
            let _ = bus.publish(state_event(SemanticTopic::Pir, "pir.hall"));
        }

        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
