//! Message Taxonomy
//!
//! Every message carries a sender, an optional recipient (`None` means
//! broadcast), a logical timestamp and an acknowledgment-required flag. The
//! variant decides how it is handled:
//!
//! - `User` messages are the only ones that reach the application inbox and
//!   merge into the receiver's logical clock.
//! - Every other variant is a system message consumed by the coordinator's
//!   protocol handlers.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rank::Rank;

/// Payload of a message, opaque to the coordination layer
pub type Payload = Value;

/// Message variants with their variant-specific content
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub enum MessageKind {
    /// Application message delivered to the inbox
    User(Payload),
    /// Naming protocol claim: a random candidate number and the claimant's name
    IdentityClaim { candidate: u32, name: String },
    /// Acknowledgment of a rendezvous message or an acknowledged broadcast
    Ack,
    /// Synchronous point-to-point payload
    Rendezvous(Payload),
    /// Mutual exclusion token travelling the ring
    Token,
    /// Barrier arrival
    BarrierJoin,
    /// Liveness beacon
    Heartbeat,
    /// Failure report naming the ranks that stopped sending heartbeats
    ReorgNotice { failed: Vec<Rank> },
}

/// Variant tag used to declare subscriptions on the bus
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    User,
    IdentityClaim,
    Ack,
    Rendezvous,
    Token,
    BarrierJoin,
    Heartbeat,
    ReorgNotice,
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::User,
        MessageType::IdentityClaim,
        MessageType::Ack,
        MessageType::Rendezvous,
        MessageType::Token,
        MessageType::BarrierJoin,
        MessageType::Heartbeat,
        MessageType::ReorgNotice,
    ];
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::User => write!(f, "user"),
            MessageType::IdentityClaim => write!(f, "identity-claim"),
            MessageType::Ack => write!(f, "ack"),
            MessageType::Rendezvous => write!(f, "rendezvous"),
            MessageType::Token => write!(f, "token"),
            MessageType::BarrierJoin => write!(f, "barrier-join"),
            MessageType::Heartbeat => write!(f, "heartbeat"),
            MessageType::ReorgNotice => write!(f, "reorg-notice"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Message {
    /// `None` only for identity claims, which are published before ranks exist
    pub sender: Option<Rank>,
    /// `None` means broadcast
    pub recipient: Option<Rank>,
    pub timestamp: u64,
    pub ack_needed: bool,
    pub kind: MessageKind,
}

impl Message {
    /// Plain application message; `recipient: None` broadcasts it
    pub fn user(
        sender: Rank,
        recipient: Option<Rank>,
        content: Payload,
        timestamp: u64,
        ack_needed: bool,
    ) -> Self {
        Self {
            sender: Some(sender),
            recipient,
            timestamp,
            ack_needed,
            kind: MessageKind::User(content),
        }
    }

    pub fn identity_claim(candidate: u32, name: impl Into<String>) -> Self {
        Self {
            sender: None,
            recipient: None,
            timestamp: 0,
            ack_needed: false,
            kind: MessageKind::IdentityClaim {
                candidate,
                name: name.into(),
            },
        }
    }

    /// Acknowledgment carrying the timestamp of the message it acknowledges
    pub fn ack(sender: Rank, recipient: Rank, timestamp: u64) -> Self {
        Self {
            sender: Some(sender),
            recipient: Some(recipient),
            timestamp,
            ack_needed: false,
            kind: MessageKind::Ack,
        }
    }

    pub fn rendezvous(sender: Rank, recipient: Rank, content: Payload, timestamp: u64) -> Self {
        Self {
            sender: Some(sender),
            recipient: Some(recipient),
            timestamp,
            ack_needed: true,
            kind: MessageKind::Rendezvous(content),
        }
    }

    pub fn token(sender: Rank, recipient: Rank) -> Self {
        Self {
            sender: Some(sender),
            recipient: Some(recipient),
            timestamp: 0,
            ack_needed: false,
            kind: MessageKind::Token,
        }
    }

    pub fn barrier_join(sender: Rank) -> Self {
        Self::system_broadcast(sender, MessageKind::BarrierJoin)
    }

    pub fn heartbeat(sender: Rank) -> Self {
        Self::system_broadcast(sender, MessageKind::Heartbeat)
    }

    pub fn reorg_notice(sender: Rank, failed: Vec<Rank>) -> Self {
        Self::system_broadcast(sender, MessageKind::ReorgNotice { failed })
    }

    fn system_broadcast(sender: Rank, kind: MessageKind) -> Self {
        Self {
            sender: Some(sender),
            recipient: None,
            timestamp: 0,
            ack_needed: false,
            kind,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self.kind {
            MessageKind::User(_) => MessageType::User,
            MessageKind::IdentityClaim { .. } => MessageType::IdentityClaim,
            MessageKind::Ack => MessageType::Ack,
            MessageKind::Rendezvous(_) => MessageType::Rendezvous,
            MessageKind::Token => MessageType::Token,
            MessageKind::BarrierJoin => MessageType::BarrierJoin,
            MessageKind::Heartbeat => MessageType::Heartbeat,
            MessageKind::ReorgNotice { .. } => MessageType::ReorgNotice,
        }
    }

    /// System messages bypass the inbox and the receive-side clock merge
    pub fn is_system(&self) -> bool {
        !matches!(self.kind, MessageKind::User(_))
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    /// True when the message is broadcast or unicast to `rank`
    pub fn is_for(&self, rank: Rank) -> bool {
        self.recipient.map_or(true, |recipient| recipient == rank)
    }

    /// Application payload of user and rendezvous messages
    pub fn content(&self) -> Option<&Payload> {
        match &self.kind {
            MessageKind::User(content) | MessageKind::Rendezvous(content) => Some(content),
            _ => None,
        }
    }

    /// Payload as a string slice, when it is a JSON string
    pub fn content_str(&self) -> Option<&str> {
        self.content().and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_user_messages_are_not_system() {
        let user = Message::user(Rank::new(0), Some(Rank::new(1)), "A".into(), 1, false);
        assert!(!user.is_system());

        let system = [
            Message::identity_claim(42, "P0"),
            Message::ack(Rank::new(1), Rank::new(0), 3),
            Message::rendezvous(Rank::new(0), Rank::new(2), "B".into(), 2),
            Message::token(Rank::new(2), Rank::new(0)),
            Message::barrier_join(Rank::new(1)),
            Message::heartbeat(Rank::new(1)),
            Message::reorg_notice(Rank::new(0), vec![Rank::new(2)]),
        ];
        for message in system {
            assert!(message.is_system(), "{} should be a system message", message.message_type());
        }
    }

    #[test]
    fn test_recipients_and_flags() {
        let claim = Message::identity_claim(7, "P3");
        assert!(claim.is_broadcast());
        assert!(claim.sender.is_none());

        let rendezvous = Message::rendezvous(Rank::new(0), Rank::new(2), "B".into(), 2);
        assert!(rendezvous.ack_needed);
        assert!(rendezvous.is_for(Rank::new(2)));
        assert!(!rendezvous.is_for(Rank::new(1)));

        let join = Message::barrier_join(Rank::new(1));
        assert!(join.is_for(Rank::new(0)));
        assert!(!join.ack_needed);
    }

    #[test]
    fn test_message_type_matches_kind() {
        let types: Vec<MessageType> = [
            Message::user(Rank::new(0), None, Value::Null, 0, false),
            Message::identity_claim(1, "P0"),
            Message::ack(Rank::new(0), Rank::new(1), 0),
            Message::rendezvous(Rank::new(0), Rank::new(1), Value::Null, 0),
            Message::token(Rank::new(0), Rank::new(1)),
            Message::barrier_join(Rank::new(0)),
            Message::heartbeat(Rank::new(0)),
            Message::reorg_notice(Rank::new(0), vec![]),
        ]
        .iter()
        .map(Message::message_type)
        .collect();
        assert_eq!(types, MessageType::ALL.to_vec());
    }

    #[test]
    fn test_content_accessors() {
        let message = Message::user(Rank::new(0), Some(Rank::new(1)), "A".into(), 1, false);
        assert_eq!(message.content_str(), Some("A"));

        let structured = Message::rendezvous(
            Rank::new(0),
            Rank::new(1),
            serde_json::json!({"move": "e4"}),
            5,
        );
        assert_eq!(structured.content().unwrap()["move"], "e4");
        assert!(structured.content_str().is_none());

        assert!(Message::token(Rank::new(0), Rank::new(1)).content().is_none());
    }
}
