//! Protocol state shared between the application task and message handlers
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::error::Result;
use crate::protocol_error;
use crate::rank::Rank;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Level-triggered boolean that tasks can wait on
#[derive(Debug)]
pub struct Flag {
    tx: watch::Sender<bool>,
}

impl Flag {
    pub fn new(raised: bool) -> Self {
        let (tx, _) = watch::channel(raised);
        Self { tx }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn lower(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait_raised(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in self, so this cannot fail while we wait
        let _ = rx.wait_for(|raised| *raised).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Reorganization gate: closed by a failure report, reopened once every
/// reported rank has been heard from again.
#[derive(Debug)]
pub struct ReorgGate {
    open: Flag,
    suspects: Mutex<HashSet<Rank>>,
}

impl Default for ReorgGate {
    fn default() -> Self {
        Self {
            open: Flag::new(true),
            suspects: Mutex::new(HashSet::new()),
        }
    }
}

impl ReorgGate {
    pub fn is_open(&self) -> bool {
        self.open.is_raised()
    }

    pub async fn wait_open(&self) {
        self.open.wait_raised().await;
    }

    /// Close the gate for `failed`; returns false when nothing was reported
    pub fn close(&self, failed: &[Rank]) -> bool {
        let mut suspects = locked(&self.suspects);
        suspects.extend(failed.iter().copied());
        if suspects.is_empty() {
            return false;
        }
        self.open.lower();
        true
    }

    /// Clear `rank` from the suspects; returns true if this reopened the gate
    pub fn heard_from(&self, rank: Rank) -> bool {
        let mut suspects = locked(&self.suspects);
        if suspects.remove(&rank) && suspects.is_empty() {
            self.open.raise();
            return true;
        }
        false
    }

    pub fn suspects(&self) -> Vec<Rank> {
        let mut suspects: Vec<Rank> = locked(&self.suspects).iter().copied().collect();
        suspects.sort();
        suspects
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct PendingAcks {
    // timestamp of the message being acknowledged
    timestamp: u64,
    remaining: usize,
}

/// Single-slot pending acknowledgment counter.
///
/// Acknowledgments echo the timestamp of the message they acknowledge, so
/// a late one for an abandoned operation is not counted against the next.
#[derive(Debug)]
pub struct AckCounter {
    pending: watch::Sender<PendingAcks>,
}

impl Default for AckCounter {
    fn default() -> Self {
        let (pending, _) = watch::channel(PendingAcks::default());
        Self { pending }
    }
}

impl AckCounter {
    /// Expect `count` acknowledgments of the message sent at `timestamp`,
    /// replacing whatever was pending
    pub fn arm(&self, count: usize, timestamp: u64) {
        self.pending.send_replace(PendingAcks {
            timestamp,
            remaining: count,
        });
    }

    /// Count one acknowledgment of the message sent at `timestamp`.
    /// Returns the number still expected, or `None` if it was not expected.
    pub fn acknowledge(&self, timestamp: u64) -> Option<usize> {
        let mut remaining = None;
        self.pending.send_if_modified(|pending| {
            if pending.remaining == 0 || pending.timestamp != timestamp {
                return false;
            }
            pending.remaining -= 1;
            remaining = Some(pending.remaining);
            true
        });
        remaining
    }

    pub fn pending(&self) -> usize {
        self.pending.borrow().remaining
    }

    /// Wait until the armed count reaches zero
    pub async fn wait(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|pending| pending.remaining == 0).await;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum TokenPhase {
    #[default]
    Idle,
    Wanting,
    Holding,
}

/// Token-ring mutual exclusion state of one process
#[derive(Debug)]
pub struct TokenState {
    phase: watch::Sender<TokenPhase>,
}

impl Default for TokenState {
    fn default() -> Self {
        let (phase, _) = watch::channel(TokenPhase::Idle);
        Self { phase }
    }
}

/// Withdraws an abandoned request. A grant nobody observed is released
/// so the token keeps moving.
struct PendingRequest<'a> {
    phase: &'a watch::Sender<TokenPhase>,
    armed: bool,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.phase.send_if_modified(|phase| {
            if *phase == TokenPhase::Idle {
                return false;
            }
            *phase = TokenPhase::Idle;
            true
        });
    }
}

impl TokenState {
    pub fn is_wanting(&self) -> bool {
        *self.phase.borrow() == TokenPhase::Wanting
    }

    pub fn is_holding(&self) -> bool {
        *self.phase.borrow() == TokenPhase::Holding
    }

    /// Mark the critical section as wanted and wait for the token.
    ///
    /// Dropping the returned future before it completes withdraws the
    /// request.
    pub async fn request(&self) -> Result<()> {
        let mut current = TokenPhase::Idle;
        self.phase.send_if_modified(|phase| {
            current = *phase;
            if *phase != TokenPhase::Idle {
                return false;
            }
            *phase = TokenPhase::Wanting;
            true
        });
        match current {
            TokenPhase::Idle => {}
            TokenPhase::Wanting => {
                return Err(protocol_error!("critical section already requested"))
            }
            TokenPhase::Holding => return Err(protocol_error!("critical section already held")),
        }

        let mut guard = PendingRequest {
            phase: &self.phase,
            armed: true,
        };
        let mut rx = self.phase.subscribe();
        let granted = rx
            .wait_for(|phase| *phase == TokenPhase::Holding)
            .await
            .is_ok();
        guard.armed = false;
        if granted {
            Ok(())
        } else {
            Err(protocol_error!("token state dropped while waiting"))
        }
    }

    /// Signal the token handler that the critical section is over
    pub fn release(&self) -> Result<()> {
        let released = self.phase.send_if_modified(|phase| {
            if *phase != TokenPhase::Holding {
                return false;
            }
            *phase = TokenPhase::Idle;
            true
        });
        if !released {
            return Err(protocol_error!("critical section not held"));
        }
        Ok(())
    }

    /// Called on token receipt. If the token is wanted, grant it and wait
    /// for the release. Returns whether the token was held.
    pub async fn hold_if_wanted(&self) -> bool {
        let mut rx = self.phase.subscribe();
        let granted = self.phase.send_if_modified(|phase| {
            if *phase != TokenPhase::Wanting {
                return false;
            }
            *phase = TokenPhase::Holding;
            true
        });
        if !granted {
            return false;
        }
        let _ = rx.wait_for(|phase| *phase != TokenPhase::Holding).await;
        true
    }
}

/// Barrier arrivals, counted per rank so that a peer already one round
/// ahead does not get merged into the current round.
#[derive(Debug)]
pub struct Barrier {
    joined: Mutex<HashMap<Rank, usize>>,
    rounds: watch::Sender<u64>,
}

impl Default for Barrier {
    fn default() -> Self {
        let (rounds, _) = watch::channel(0);
        Self {
            joined: Mutex::new(HashMap::new()),
            rounds,
        }
    }
}

impl Barrier {
    /// Record an arrival. Returns true if it completed the round.
    pub fn join(&self, rank: Rank, group_size: usize) -> bool {
        let mut joined = locked(&self.joined);
        *joined.entry(rank).or_insert(0) += 1;
        if joined.len() < group_size {
            return false;
        }
        joined.retain(|_, count| {
            *count -= 1;
            *count > 0
        });
        self.rounds.send_modify(|round| *round += 1);
        true
    }

    /// Ranks already arrived for the current round
    pub fn arrived(&self) -> usize {
        locked(&self.joined).len()
    }

    /// Number of completed rounds
    pub fn round(&self) -> u64 {
        *self.rounds.borrow()
    }

    /// Wait until a round later than `round` has completed
    pub async fn wait_past(&self, round: u64) {
        let mut rx = self.rounds.subscribe();
        let _ = rx.wait_for(|completed| *completed > round).await;
    }
}

/// Last heartbeat seen from every peer
#[derive(Debug, Default)]
pub struct HeartbeatTable {
    last_seen: DashMap<Rank, DateTime<Utc>>,
}

impl HeartbeatTable {
    pub fn record(&self, rank: Rank) {
        self.last_seen.insert(rank, Utc::now());
    }

    pub fn last_seen(&self, rank: Rank) -> Option<DateTime<Utc>> {
        self.last_seen.get(&rank).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    /// Remove and return the ranks silent for longer than `max_age`
    pub fn take_stale(&self, max_age: Duration) -> Vec<Rank> {
        let now = Utc::now();
        let mut stale: Vec<Rank> = self
            .last_seen
            .iter()
            .filter(|entry| (now - *entry.value()).to_std().unwrap_or_default() > max_age)
            .map(|entry| *entry.key())
            .collect();
        for rank in &stale {
            self.last_seen.remove(rank);
        }
        stale.sort();
        stale
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, rank: Rank, by: Duration) {
        if let Ok(by) = chrono::Duration::from_std(by) {
            self.last_seen.insert(rank, Utc::now() - by);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_flag_wait() {
        let flag = Arc::new(Flag::new(false));
        let raiser = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            raiser.raise();
        });
        tokio::time::timeout(WAIT, flag.wait_raised()).await.unwrap();
        assert!(flag.is_raised());
    }

    #[tokio::test]
    async fn test_gate_reopens_when_suspects_heard() {
        let gate = ReorgGate::default();
        assert!(gate.is_open());
        assert!(!gate.close(&[]));
        assert!(gate.is_open());

        assert!(gate.close(&[Rank::new(1), Rank::new(2)]));
        assert!(!gate.is_open());
        assert_eq!(gate.suspects(), vec![Rank::new(1), Rank::new(2)]);

        assert!(!gate.heard_from(Rank::new(0)));
        assert!(!gate.heard_from(Rank::new(1)));
        assert!(!gate.is_open());
        assert!(gate.heard_from(Rank::new(2)));
        assert!(gate.is_open());
        tokio::time::timeout(WAIT, gate.wait_open()).await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_counter_releases_at_zero() {
        let acks = AckCounter::default();
        assert_eq!(acks.acknowledge(4), None);

        acks.arm(3, 4);
        assert_eq!(acks.acknowledge(4), Some(2));
        assert_eq!(acks.acknowledge(4), Some(1));
        assert_eq!(acks.pending(), 1);
        // acknowledges some other message
        assert_eq!(acks.acknowledge(3), None);
        assert_eq!(acks.acknowledge(4), Some(0));
        // never negative
        assert_eq!(acks.acknowledge(4), None);

        // the completion happened before anyone waited
        tokio::time::timeout(WAIT, acks.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_ack_wait_leaves_nothing_behind() {
        let acks = AckCounter::default();
        acks.arm(1, 1);
        let abandoned = tokio::time::timeout(Duration::from_millis(20), acks.wait()).await;
        assert!(abandoned.is_err());
        // the late acknowledgment of the abandoned operation
        assert_eq!(acks.acknowledge(1), Some(0));

        acks.arm(1, 2);
        let early = tokio::time::timeout(Duration::from_millis(50), acks.wait()).await;
        assert!(early.is_err(), "wait returned with an acknowledgment still pending");
        assert_eq!(acks.acknowledge(2), Some(0));
        tokio::time::timeout(WAIT, acks.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_late_ack_of_previous_message_ignored() {
        let acks = AckCounter::default();
        acks.arm(1, 1);
        acks.arm(1, 2);
        assert_eq!(acks.acknowledge(1), None);
        assert_eq!(acks.pending(), 1);
        let early = tokio::time::timeout(Duration::from_millis(50), acks.wait()).await;
        assert!(early.is_err());
    }

    #[tokio::test]
    async fn test_token_grant_and_release() {
        let token = Arc::new(TokenState::default());

        // nobody wants it: passes straight through
        assert!(!token.hold_if_wanted().await);

        let requester = token.clone();
        let request = tokio::spawn(async move { requester.request().await });
        while !token.is_wanting() {
            tokio::task::yield_now().await;
        }

        let handler_side = token.clone();
        let handler = tokio::spawn(async move { handler_side.hold_if_wanted().await });

        tokio::time::timeout(WAIT, request).await.unwrap().unwrap().unwrap();
        assert!(token.is_holding());
        assert!(!handler.is_finished());

        token.release().unwrap();
        assert!(tokio::time::timeout(WAIT, handler).await.unwrap().unwrap());
        assert!(!token.is_holding());
        assert!(token.release().is_err());
    }

    #[tokio::test]
    async fn test_abandoned_request_is_withdrawn() {
        let token = TokenState::default();
        let abandoned = tokio::time::timeout(Duration::from_millis(20), token.request()).await;
        assert!(abandoned.is_err());
        assert!(!token.is_wanting());

        // the token passes through instead of waiting for a release
        let passed = tokio::time::timeout(WAIT, token.hold_if_wanted()).await.unwrap();
        assert!(!passed);

        // a fresh request is accepted and waits for the next token
        let again = tokio::time::timeout(Duration::from_millis(20), token.request()).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_unobserved_grant_is_released() {
        let token = Arc::new(TokenState::default());
        let mut request = Box::pin(token.request());
        // poll until the request is registered
        assert!(tokio::time::timeout(Duration::from_millis(20), &mut request)
            .await
            .is_err());
        assert!(token.is_wanting());

        let handler_side = token.clone();
        let handler = tokio::spawn(async move { handler_side.hold_if_wanted().await });
        while !token.is_holding() {
            tokio::task::yield_now().await;
        }

        // the requester goes away before seeing the grant
        drop(request);
        assert!(tokio::time::timeout(WAIT, handler).await.unwrap().unwrap());
        assert!(!token.is_holding());
        assert!(!token.is_wanting());
    }

    #[tokio::test]
    async fn test_double_request_rejected() {
        let token = Arc::new(TokenState::default());
        let first = token.clone();
        let _pending = tokio::spawn(async move { first.request().await });
        while !token.is_wanting() {
            tokio::task::yield_now().await;
        }
        assert!(token.request().await.is_err());
    }

    #[tokio::test]
    async fn test_barrier_keeps_early_joins() {
        let barrier = Barrier::default();
        assert!(!barrier.join(Rank::new(0), 2));
        // rank 0 is already in the next round
        assert!(!barrier.join(Rank::new(0), 2));
        assert!(barrier.join(Rank::new(1), 2));
        tokio::time::timeout(WAIT, barrier.wait_past(0)).await.unwrap();

        assert_eq!(barrier.arrived(), 1);
        assert!(barrier.join(Rank::new(1), 2));
        assert_eq!(barrier.arrived(), 0);
        assert_eq!(barrier.round(), 2);
    }

    #[tokio::test]
    async fn test_unobserved_round_does_not_pass_next_wait() {
        let barrier = Barrier::default();
        // a round completes while nobody waits
        barrier.join(Rank::new(0), 2);
        barrier.join(Rank::new(1), 2);

        let round = barrier.round();
        assert_eq!(round, 1);
        let early = tokio::time::timeout(Duration::from_millis(50), barrier.wait_past(round)).await;
        assert!(early.is_err());

        barrier.join(Rank::new(1), 2);
        barrier.join(Rank::new(0), 2);
        tokio::time::timeout(WAIT, barrier.wait_past(round)).await.unwrap();
    }

    #[test]
    fn test_heartbeat_staleness() {
        let table = HeartbeatTable::default();
        table.record(Rank::new(0));
        table.record(Rank::new(1));
        table.backdate(Rank::new(1), Duration::from_secs(10));

        assert_eq!(table.take_stale(Duration::from_secs(5)), vec![Rank::new(1)]);
        assert_eq!(table.len(), 1);
        assert!(table.last_seen(Rank::new(0)).is_some());
        assert!(table.last_seen(Rank::new(1)).is_none());
        assert!(table.take_stale(Duration::from_secs(5)).is_empty());
    }
}
