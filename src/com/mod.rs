//! Coordination component
//!
//! [`Com`] owns a process's identity, logical clock, inbox and the state of
//! every group protocol: rendezvous, acknowledged broadcast, barrier,
//! token-ring mutual exclusion and heartbeat failure detection. It talks to
//! its peers only through a [`Bus`](crate::transport::Bus).
pub mod coordinator;
mod handlers;
pub mod naming;
pub mod state;

pub use coordinator::Com;
pub use naming::{Claim, ClaimBook, Identity};
