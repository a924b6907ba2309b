//! Decentralized naming
//!
//! Every process broadcasts a random candidate number with its name. Claims
//! sharing a number are discarded and their owners draw again; once a round
//! shows no duplicates, sorting the claims by number gives each process a
//! dense rank.
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::protocol_error;
use crate::rank::Rank;

/// A candidate number claimed by a named process
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Claim {
    pub candidate: u32,
    pub name: String,
}

/// Result of the naming protocol, fixed for the coordinator's lifetime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub rank: Rank,
    pub group_size: usize,
    pub name_table: HashMap<String, Rank>,
}

impl Identity {
    /// Rank of a named participant
    pub fn resolve(&self, name: &str) -> Option<Rank> {
        self.name_table.get(name).copied()
    }

    /// Name of a ranked participant
    pub fn name_of(&self, rank: Rank) -> Option<&str> {
        self.name_table
            .iter()
            .find(|(_, r)| **r == rank)
            .map(|(name, _)| name.as_str())
    }
}

/// Claims received so far, including our own
#[derive(Debug, Default)]
pub struct ClaimBook {
    claims: Vec<Claim>,
}

impl ClaimBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, claim: Claim) {
        self.claims.push(claim);
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Candidate numbers claimed more than once
    pub fn duplicates(&self) -> HashSet<u32> {
        let mut counts: HashMap<u32, usize> = HashMap::new();
        for claim in &self.claims {
            *counts.entry(claim.candidate).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(candidate, _)| candidate)
            .collect()
    }

    /// Drop every claim bearing one of `candidates`
    pub fn discard(&mut self, candidates: &HashSet<u32>) {
        self.claims
            .retain(|claim| !candidates.contains(&claim.candidate));
    }

    /// Assign ranks by candidate order and locate our own claim.
    ///
    /// Must only be called once `duplicates()` is empty.
    pub fn resolve(&self, candidate: u32, name: &str) -> Result<Identity> {
        let mut sorted = self.claims.clone();
        sorted.sort();

        let mut rank = None;
        let mut name_table = HashMap::with_capacity(sorted.len());
        for (position, claim) in sorted.iter().enumerate() {
            if claim.candidate == candidate && claim.name == name {
                rank = Some(Rank::new(position));
            }
            if name_table
                .insert(claim.name.clone(), Rank::new(position))
                .is_some()
            {
                return Err(protocol_error!(
                    "name '{}' was claimed by more than one process",
                    claim.name
                ));
            }
        }

        let rank = rank.ok_or_else(|| {
            protocol_error!(
                "own claim ({}, {}) missing from {} received claims",
                candidate,
                name,
                sorted.len()
            )
        })?;

        Ok(Identity {
            rank,
            group_size: sorted.len(),
            name_table,
        })
    }
}
