//! Peer-to-peer process coordination.
//!
//! A fixed group of symmetric processes discover each other over a
//! publish/subscribe [`transport`], agree on dense ranks without a
//! coordinator, then exchange ordered, synchronous and mutually exclusive
//! messages through a [`Com`] endpoint: Lamport clocks, rendezvous,
//! acknowledged broadcast, barriers, token-ring mutual exclusion and
//! heartbeat failure detection.
pub mod cli;
pub mod clock;
pub mod com;
pub mod error;
pub mod launcher;
pub mod mailbox;
pub mod messages;
pub mod rank;
pub mod scheduler;
pub mod settings;
pub mod transport;

pub use clock::LamportClock;
pub use com::Com;
pub use error::{ComError, Result};
pub use mailbox::Mailbox;
pub use messages::{Message, MessageKind, MessageType, Payload};
pub use rank::Rank;
pub use settings::ComConfig;
