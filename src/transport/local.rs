//! In-process publish/subscribe bus
//!
//! Every published message is handed to each interested subscriber on its
//! own tokio task, so handlers run concurrently and deliveries carry no
//! ordering guarantee, like a real network would offer.
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};
use tracing_futures::Instrument;

use super::traits::{Bus, BusStats, Subscriber, SubscriptionId};
use crate::error::Result;
use crate::messages::{Message, MessageType};
use crate::transport_error;

struct Subscription {
    interests: HashSet<MessageType>,
    subscriber: Arc<dyn Subscriber>,
}

pub struct LocalBus {
    subscriptions: DashMap<SubscriptionId, Subscription>,
    next_id: AtomicU64,
    open: AtomicBool,
    published: AtomicU64,
    delivered: AtomicU64,
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus")
            .field("subscribers", &self.subscriptions.len())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(0),
            open: AtomicBool::new(true),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Refuse further publishes and drop every subscription
    pub fn shutdown(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.subscriptions.clear();
        debug!("Local bus shut down");
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(transport_error!(
                "bus is shut down, dropping {} message",
                message.message_type()
            ));
        }
        self.published.fetch_add(1, Ordering::Relaxed);

        let message_type = message.message_type();
        let targets: Vec<Arc<dyn Subscriber>> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().interests.contains(&message_type))
            .map(|entry| entry.value().subscriber.clone())
            .collect();

        trace!(
            "Publishing {} message to {} subscribers",
            message_type,
            targets.len()
        );

        for subscriber in targets {
            let message = message.clone();
            self.delivered.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(
                async move { subscriber.dispatch(message).await }
                    .instrument(tracing::trace_span!("deliver", kind = %message_type)),
            );
        }
        Ok(())
    }

    fn subscribe(
        &self,
        interests: &[MessageType],
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriptionId> {
        if !self.is_open() {
            return Err(transport_error!("bus is shut down, cannot subscribe"));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.insert(
            id,
            Subscription {
                interests: interests.iter().copied().collect(),
                subscriber,
            },
        );
        debug!("Subscription {:?} registered for {:?}", id, interests);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            subscribers: self.subscriptions.len(),
        }
    }
}
