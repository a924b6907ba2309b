//! Publish/subscribe transport
//!
//! The coordination layer only depends on the [`Bus`] and [`Subscriber`]
//! traits. [`LocalBus`] is the in-process implementation used by the
//! launcher and the tests.

pub mod local;
pub mod traits;

pub use local::LocalBus;
pub use traits::{Bus, BusStats, Subscriber, SubscriptionId};
