//! Transport traits for the publish/subscribe boundary
//!
//! The coordinator never talks to peers directly: it publishes messages on a
//! [`Bus`] and receives them through its [`Subscriber`] implementation, one
//! method per message variant.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::{Message, MessageKind, MessageType};

/// Handle returned by [`Bus::subscribe`], used to unsubscribe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Counters describing bus activity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub subscribers: usize,
}

/// Receiving side of the bus: one handler per message variant.
///
/// Each delivery may run concurrently with any other delivery.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Application (non-system) message
    async fn on_message(&self, _message: Message) {}

    async fn on_identity_claim(&self, _message: Message) {}

    async fn on_ack(&self, _message: Message) {}

    async fn on_rendezvous(&self, _message: Message) {}

    async fn on_token(&self, _message: Message) {}

    async fn on_barrier_join(&self, _message: Message) {}

    async fn on_heartbeat(&self, _message: Message) {}

    async fn on_reorg_notice(&self, _message: Message) {}

    /// Route a message to the handler matching its variant
    async fn dispatch(&self, message: Message) {
        match message.kind {
            MessageKind::User(_) => self.on_message(message).await,
            MessageKind::IdentityClaim { .. } => self.on_identity_claim(message).await,
            MessageKind::Ack => self.on_ack(message).await,
            MessageKind::Rendezvous(_) => self.on_rendezvous(message).await,
            MessageKind::Token => self.on_token(message).await,
            MessageKind::BarrierJoin => self.on_barrier_join(message).await,
            MessageKind::Heartbeat => self.on_heartbeat(message).await,
            MessageKind::ReorgNotice { .. } => self.on_reorg_notice(message).await,
        }
    }
}

/// Publishing side of the bus
#[async_trait]
pub trait Bus: Send + Sync {
    /// Deliver `message` to every subscriber interested in its variant.
    ///
    /// Delivery is asynchronous; no order is guaranteed across subscribers
    /// or publishers.
    async fn publish(&self, message: Message) -> Result<()>;

    /// Register `subscriber` for the given variants
    fn subscribe(
        &self,
        interests: &[MessageType],
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriptionId>;

    /// Remove a subscription; returns false if it was unknown
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    fn stats(&self) -> BusStats;
}
