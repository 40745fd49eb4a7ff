//! In-process player bus.
//!
//! Models the same-origin broadcast channel shared by every tab of one browser
//! profile: every subscriber sees every message except the ones its own tab
//! published. Delivery is best effort; a slow subscriber may lag and lose
//! messages.

use std::fmt;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use player_bus_types::BusMessage;

/// Identity of one tab on the bus.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TabId(String);

impl TabId {
    /// Fresh random tab id (`tab:<uuid>`).
    pub fn generate() -> Self {
        Self(format!("tab:{}", Uuid::new_v4()))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message plus the tab that published it.
#[derive(Debug, Clone)]
pub struct BusEnvelope {
    pub origin: TabId,
    pub message: BusMessage,
}

#[derive(Clone)]
pub struct PlayerBus {
    channel: String,
    sender: broadcast::Sender<BusEnvelope>,
}

impl PlayerBus {
    /// Create a bus with a bounded broadcast channel.
    pub fn new(channel: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self {
            channel: channel.into(),
            sender,
        }
    }

    /// Logical channel name (`player` by default).
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscribe on behalf of `tab`; the tab's own messages are filtered out.
    pub fn subscribe(&self, tab: &TabId) -> BusSubscription {
        BusSubscription {
            tab: tab.clone(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish a message. Returns the number of subscriptions that saw it,
    /// including the publisher's own.
    pub fn publish(&self, origin: &TabId, message: BusMessage) -> usize {
        let kind = message.kind();
        let envelope = BusEnvelope {
            origin: origin.clone(),
            message,
        };
        match self.sender.send(envelope) {
            Ok(receivers) => {
                tracing::trace!(
                    channel = %self.channel,
                    tab_id = %origin,
                    kind,
                    receivers,
                    "bus publish"
                );
                receivers
            }
            Err(_) => {
                tracing::trace!(channel = %self.channel, tab_id = %origin, kind, "bus publish with no listeners");
                0
            }
        }
    }
}

/// Receiving half of the bus for one tab.
pub struct BusSubscription {
    tab: TabId,
    receiver: broadcast::Receiver<BusEnvelope>,
}

impl BusSubscription {
    /// Wait for the next message published by another tab.
    pub async fn recv(&mut self) -> Result<BusEnvelope, RecvError> {
        loop {
            let envelope = self.receiver.recv().await?;
            if envelope.origin != self.tab {
                return Ok(envelope);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn own_messages_are_not_delivered() {
        let bus = PlayerBus::new("player", 16);
        let a = TabId::named("a");
        let b = TabId::named("b");
        let mut sub_a = bus.subscribe(&a);
        let mut sub_b = bus.subscribe(&b);

        bus.publish(&a, BusMessage::LeaderProbe);
        bus.publish(&b, BusMessage::LeaderProbeResponse);

        let seen_by_b = sub_b.recv().await.unwrap();
        assert_eq!(seen_by_b.origin, a);
        assert_eq!(seen_by_b.message, BusMessage::LeaderProbe);

        let seen_by_a = sub_a.recv().await.unwrap();
        assert_eq!(seen_by_a.origin, b);
        assert_eq!(seen_by_a.message, BusMessage::LeaderProbeResponse);
    }

    #[test]
    fn publish_without_listeners_reports_zero() {
        let bus = PlayerBus::new("player", 16);
        assert_eq!(bus.publish(&TabId::named("a"), BusMessage::LeaderProbe), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_reports_lag() {
        let bus = PlayerBus::new("player", 16);
        let a = TabId::named("a");
        let mut slow = bus.subscribe(&TabId::named("slow"));
        for _ in 0..40 {
            bus.publish(&a, BusMessage::LeaderProbe);
        }
        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(_))));
        assert!(slow.recv().await.is_ok());
    }

    #[tokio::test]
    async fn closed_bus_ends_subscription() {
        let bus = PlayerBus::new("player", 16);
        let mut sub = bus.subscribe(&TabId::named("a"));
        drop(bus);
        assert!(matches!(sub.recv().await, Err(RecvError::Closed)));
    }

    #[test]
    fn generated_tab_ids_are_unique() {
        let a = TabId::generate();
        let b = TabId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("tab:"));
    }
}
