use std::sync::atomic::{AtomicU64, Ordering};

/// LamportClock orders the events observed by one process.
///
/// The clock is a single counter that increments on every local event and,
/// when a message is received, jumps past the sender's timestamp. It gives a
/// causal order over events, never a real-time one. The value never
/// decreases.
#[derive(Debug, Default)]
pub struct LamportClock {
    clock: AtomicU64,
}

impl LamportClock {
    /// Create a new clock starting at zero
    pub fn new() -> Self {
        Self {
            clock: AtomicU64::new(0),
        }
    }

    /// Current logical time
    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Record a local event and return the new logical time
    pub fn increment(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Merge a received timestamp: `max(local, remote) + 1`.
    /// Returns the new logical time.
    pub fn merge(&self, remote: u64) -> u64 {
        let previous = self
            .clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |local| {
                Some(local.max(remote) + 1)
            })
            // the closure always returns Some
            .unwrap_or_else(|current| current);
        previous.max(remote) + 1
    }
}
