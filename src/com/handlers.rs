//! Bus handlers of the coordinator, one per message variant.
//!
//! Every handler but the identity-claim one waits for initialization and
//! returns early once the coordinator is stopped. Handlers touching group
//! state also wait for the reorganization gate; heartbeats, reorganization
//! notices and acknowledgments do not, since they are what lets a closed
//! gate or a waiting sender make progress.
use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use super::coordinator::ComInner;
use super::naming::Claim;
use crate::messages::{Message, MessageKind};
use crate::rank::Rank;
use crate::transport::Subscriber;

#[async_trait]
impl Subscriber for ComInner {
    async fn on_message(&self, message: Message) {
        let Some(identity) = self.ready().await else {
            return;
        };
        self.gate.wait_open().await;
        if !message.is_for(identity.rank) {
            return;
        }

        let now = self.clock.merge(message.timestamp);
        debug!(
            "[{}] received {:?} from rank {:?} with clock {}",
            self.label(),
            message.content(),
            message.sender,
            now
        );
        let ack_to = message.sender.filter(|_| message.ack_needed);
        let sent_at = message.timestamp;
        self.mailbox.add_message(message);

        if let Some(sender) = ack_to {
            debug!("[{}] acknowledging to rank {}", self.label(), sender);
            if let Err(e) = self
                .bus
                .publish(Message::ack(identity.rank, sender, sent_at))
                .await
            {
                warn!("[{}] failed to acknowledge: {}", self.label(), e);
            }
        }
    }

    async fn on_identity_claim(&self, message: Message) {
        if !self.alive.is_raised() {
            return;
        }
        if let MessageKind::IdentityClaim { candidate, name } = message.kind {
            trace!("[{}] claim {} from {}", self.label(), candidate, name);
            self.record_claim(Claim { candidate, name });
        }
    }

    async fn on_ack(&self, message: Message) {
        let Some(identity) = self.ready().await else {
            return;
        };
        if message.recipient != Some(identity.rank) {
            return;
        }
        match self.acks.acknowledge(message.timestamp) {
            Some(remaining) => debug!(
                "[{}] ack from rank {:?}, {} still expected",
                self.label(),
                message.sender,
                remaining
            ),
            None => warn!(
                "[{}] unexpected ack from rank {:?} for clock {}",
                self.label(),
                message.sender,
                message.timestamp
            ),
        }
    }

    async fn on_rendezvous(&self, message: Message) {
        let Some(identity) = self.ready().await else {
            return;
        };
        self.gate.wait_open().await;
        if message.recipient != Some(identity.rank) {
            return;
        }
        // waits while a previous rendezvous message is still unconsumed
        if self.rendezvous_tx.send(message).await.is_err() {
            warn!("[{}] rendezvous slot closed", self.label());
        }
    }

    async fn on_token(&self, message: Message) {
        let Some(identity) = self.ready().await else {
            return;
        };
        self.gate.wait_open().await;
        if message.recipient != Some(identity.rank) {
            return;
        }

        if !self.token.hold_if_wanted().await && !self.config.token_hop_delay.is_zero() {
            tokio::time::sleep(self.config.token_hop_delay).await;
        }
        let next = identity.rank.ring_successor(identity.group_size);
        trace!("[{}] forwarding token to rank {}", self.label(), next);
        if let Err(e) = self.bus.publish(Message::token(identity.rank, next)).await {
            warn!("[{}] token lost, forwarding failed: {}", self.label(), e);
        }
    }

    async fn on_barrier_join(&self, message: Message) {
        let Some(identity) = self.ready().await else {
            return;
        };
        self.gate.wait_open().await;
        let Some(sender) = message.sender else {
            return;
        };
        let completed = self.barrier.join(sender, identity.group_size);
        debug!(
            "[{}] barrier join from rank {}, {}",
            self.label(),
            sender,
            if completed {
                "round complete".to_string()
            } else {
                format!("{}/{}", self.barrier.arrived(), identity.group_size)
            }
        );
    }

    async fn on_heartbeat(&self, message: Message) {
        if self.ready().await.is_none() {
            return;
        }
        let Some(sender) = message.sender else {
            return;
        };
        self.heartbeats.record(sender);
        if self.gate.heard_from(sender) {
            info!(
                "[{}] rank {} is back, reorganization gate reopened",
                self.label(),
                sender
            );
        }
    }

    async fn on_reorg_notice(&self, message: Message) {
        if self.ready().await.is_none() {
            return;
        }
        let MessageKind::ReorgNotice { failed } = message.kind else {
            return;
        };
        if self.gate.close(&failed) {
            let failed: Vec<Rank> = self.gate.suspects();
            warn!(
                "[{}] reorganization requested by rank {:?}, gate closed for {:?}",
                self.label(),
                message.sender,
                failed
            );
        }
    }
}
