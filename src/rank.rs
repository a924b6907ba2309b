use serde::{Deserialize, Serialize};

/// Dense process identity in `[0, group_size)`, assigned once by the naming
/// protocol.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, PartialOrd, Ord, Eq, Hash,
)]
pub struct Rank(usize);

impl Rank {
    pub fn new(rank: usize) -> Self {
        Self(rank)
    }

    pub fn value(&self) -> usize {
        self.0
    }

    /// Successor on the logical ring `0 -> 1 -> ... -> n-1 -> 0`
    pub fn ring_successor(&self, group_size: usize) -> Rank {
        Rank((self.0 + 1) % group_size.max(1))
    }

    pub fn is_last(&self, group_size: usize) -> bool {
        self.0 + 1 == group_size
    }
}

impl From<usize> for Rank {
    fn from(rank: usize) -> Self {
        Rank::new(rank)
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
