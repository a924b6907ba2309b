use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::naming::{Claim, ClaimBook, Identity};
use super::state::{AckCounter, Barrier, Flag, HeartbeatTable, ReorgGate, TokenState};
use crate::clock::LamportClock;
use crate::error::{ComError, Result};
use crate::mailbox::Mailbox;
use crate::{peer_error, transport_error};
use crate::messages::{Message, MessageType, Payload};
use crate::rank::Rank;
use crate::scheduler::PeriodicTask;
use crate::settings::ComConfig;
use crate::transport::{Bus, Subscriber, SubscriptionId};

/// State shared between the application-facing [`Com`] handle and the
/// message handlers running on bus delivery tasks.
pub(crate) struct ComInner {
    pub(crate) name: String,
    pub(crate) config: ComConfig,
    pub(crate) bus: Arc<dyn Bus>,
    pub(crate) clock: LamportClock,
    pub(crate) mailbox: Mailbox,
    pub(crate) identity: OnceLock<Identity>,
    pub(crate) claims: Mutex<ClaimBook>,
    pub(crate) initialized: Flag,
    pub(crate) alive: Flag,
    pub(crate) gate: ReorgGate,
    pub(crate) acks: AckCounter,
    // serializes the operations that own the single acknowledgment slot
    pub(crate) ack_slot: tokio::sync::Mutex<()>,
    pub(crate) rendezvous_tx: mpsc::Sender<Message>,
    pub(crate) rendezvous_rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    pub(crate) token: TokenState,
    pub(crate) barrier: Barrier,
    pub(crate) heartbeats: HeartbeatTable,
}

impl ComInner {
    fn new(name: String, bus: Arc<dyn Bus>, config: ComConfig) -> Self {
        // capacity 1: a second rendezvous message waits until the first is consumed
        let (rendezvous_tx, rendezvous_rx) = mpsc::channel(1);
        Self {
            name,
            config,
            bus,
            clock: LamportClock::new(),
            mailbox: Mailbox::new(),
            identity: OnceLock::new(),
            claims: Mutex::new(ClaimBook::new()),
            initialized: Flag::new(false),
            alive: Flag::new(true),
            gate: ReorgGate::default(),
            acks: AckCounter::default(),
            ack_slot: tokio::sync::Mutex::new(()),
            rendezvous_tx,
            rendezvous_rx: tokio::sync::Mutex::new(rendezvous_rx),
            token: TokenState::default(),
            barrier: Barrier::default(),
            heartbeats: HeartbeatTable::default(),
        }
    }

    /// `name:rank` prefix for log lines
    pub(crate) fn label(&self) -> String {
        match self.identity.get() {
            Some(identity) => format!("{}:{}", self.name, identity.rank),
            None => format!("{}:?", self.name),
        }
    }

    /// Wait for initialization; `None` once the coordinator is stopped
    pub(crate) async fn ready(&self) -> Option<&Identity> {
        if !self.alive.is_raised() {
            return None;
        }
        self.initialized.wait_raised().await;
        self.identity.get()
    }

    pub(crate) fn record_claim(&self, claim: Claim) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(claim);
    }

    /// Collision-and-retry naming: claim a random number until a round
    /// shows no duplicate, then rank by sorted candidate.
    async fn assign_identity(&self) -> Result<Identity> {
        let settle = self.config.settle_timeout;
        tokio::time::sleep(settle).await;

        let mut candidate: Option<u32> = None;
        let mut rounds = 0u32;
        let mine = loop {
            let current = match candidate {
                Some(current) => current,
                None => {
                    let drawn = rand::thread_rng().gen_range(0..=self.config.max_candidate);
                    debug!("[{}] claiming candidate {}", self.label(), drawn);
                    self.bus
                        .publish(Message::identity_claim(drawn, self.name.clone()))
                        .await?;
                    candidate = Some(drawn);
                    drawn
                }
            };
            tokio::time::sleep(settle).await;
            rounds += 1;

            let duplicates = {
                let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
                let duplicates = claims.duplicates();
                claims.discard(&duplicates);
                duplicates
            };
            if duplicates.is_empty() {
                break current;
            }
            debug!(
                "[{}] naming round {} found duplicate candidates {:?}",
                self.label(),
                rounds,
                duplicates
            );
            if duplicates.contains(&current) {
                candidate = None;
            }
        };

        let identity = self
            .claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(mine, &self.name)?;
        Ok(identity)
    }

    /// The highest rank injects the token, addressed to rank 0
    async fn seed_token(&self, identity: &Identity) -> Result<()> {
        if !identity.rank.is_last(identity.group_size) {
            return Ok(());
        }
        tokio::time::sleep(self.config.settle_timeout).await;
        info!("[{}] seeding the token", self.label());
        self.bus
            .publish(Message::token(identity.rank, Rank::new(0)))
            .await
    }

    pub(crate) async fn emit_heartbeat(&self) {
        let Some(identity) = self.identity.get() else {
            return;
        };
        if let Err(e) = self.bus.publish(Message::heartbeat(identity.rank)).await {
            debug!("[{}] failed to publish heartbeat: {}", self.label(), e);
        }
    }

    pub(crate) async fn check_heartbeats(&self) {
        let Some(identity) = self.identity.get() else {
            return;
        };
        let stale = self
            .heartbeats
            .take_stale(self.config.heartbeat_check_interval);
        if stale.is_empty() {
            return;
        }
        warn!(
            "[{}] no heartbeat from {:?} for over {}ms, requesting reorganization",
            self.label(),
            stale,
            self.config.heartbeat_check_interval.as_millis()
        );
        if let Err(e) = self
            .bus
            .publish(Message::reorg_notice(identity.rank, stale))
            .await
        {
            warn!("[{}] failed to publish reorganization notice: {}", self.label(), e);
        }
    }
}

/// Communication endpoint of one process in the group.
///
/// Construction runs the naming protocol and returns once this process
/// knows its rank, the group size and every peer's name. All operations
/// suspend the calling task until their protocol condition holds.
pub struct Com {
    inner: Arc<ComInner>,
    identity: Identity,
    subscription: Mutex<Option<SubscriptionId>>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl std::fmt::Debug for Com {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Com")
            .field("name", &self.inner.name)
            .field("rank", &self.identity.rank)
            .field("group_size", &self.identity.group_size)
            .field("clock", &self.inner.clock.now())
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Com {
    pub async fn new(name: impl Into<String>, bus: Arc<dyn Bus>, config: ComConfig) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new(ComInner::new(name.into(), bus.clone(), config));

        let subscriber: Arc<dyn Subscriber> = inner.clone();
        let subscription = bus.subscribe(&MessageType::ALL, subscriber)?;

        let identity = match Self::initialize(&inner).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("[{}] initialization failed: {}", inner.label(), e);
                inner.alive.lower();
                bus.unsubscribe(subscription);
                return Err(e);
            }
        };

        let heartbeat = {
            let inner = inner.clone();
            PeriodicTask::spawn(
                format!("{}-heartbeat", inner.name),
                inner.config.heartbeat_interval,
                inner.alive.subscribe(),
                move || {
                    let inner = inner.clone();
                    async move { inner.emit_heartbeat().await }
                },
            )
        };
        let checker = {
            let inner = inner.clone();
            PeriodicTask::spawn(
                format!("{}-liveness", inner.name),
                inner.config.heartbeat_check_interval,
                inner.alive.subscribe(),
                move || {
                    let inner = inner.clone();
                    async move { inner.check_heartbeats().await }
                },
            )
        };

        Ok(Self {
            inner,
            identity,
            subscription: Mutex::new(Some(subscription)),
            tasks: Mutex::new(vec![heartbeat, checker]),
        })
    }

    async fn initialize(inner: &ComInner) -> Result<Identity> {
        let identity = inner.assign_identity().await?;
        // set exactly once, right here
        let _ = inner.identity.set(identity.clone());
        info!(
            "[{}] joined a group of {} with name table {:?}",
            inner.label(),
            identity.group_size,
            identity.name_table
        );
        inner.initialized.raise();

        inner.seed_token(&identity).await?;
        Ok(identity)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn rank(&self) -> Rank {
        self.identity.rank
    }

    pub fn group_size(&self) -> usize {
        self.identity.group_size
    }

    pub fn name_table(&self) -> &HashMap<String, Rank> {
        &self.identity.name_table
    }

    /// Current logical time
    pub fn clock(&self) -> u64 {
        self.inner.clock.now()
    }

    /// Inbox of received application messages
    pub fn mailbox(&self) -> &Mailbox {
        &self.inner.mailbox
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.is_raised()
    }

    pub fn is_gate_open(&self) -> bool {
        self.inner.gate.is_open()
    }

    /// Ranks reported failed and not heard from since
    pub fn suspects(&self) -> Vec<Rank> {
        self.inner.gate.suspects()
    }

    pub fn is_holding_token(&self) -> bool {
        self.inner.token.is_holding()
    }

    fn resolve(&self, name: &str) -> Result<Rank> {
        self.identity.resolve(name).ok_or_else(|| {
            warn!("[{}] unknown peer '{}'", self.inner.label(), name);
            peer_error!(name)
        })
    }

    /// Fail on a stopped coordinator, then wait for the reorganization gate
    async fn enter(&self) -> Result<()> {
        if !self.is_alive() {
            return Err(ComError::Stopped(self.inner.name.clone()));
        }
        if !self.inner.gate.is_open() {
            debug!(
                "[{}] waiting for reorganization of {:?}",
                self.inner.label(),
                self.inner.gate.suspects()
            );
        }
        self.inner.gate.wait_open().await;
        Ok(())
    }

    /// Asynchronous point-to-point message, delivered to `dest`'s inbox
    pub async fn send_to(&self, payload: impl Into<Payload>, dest: &str) -> Result<()> {
        let recipient = self.resolve(dest)?;
        self.enter().await?;
        let timestamp = self.inner.clock.increment();
        debug!(
            "[{}] sending to {}:{} with clock {}",
            self.inner.label(),
            dest,
            recipient,
            timestamp
        );
        self.inner
            .bus
            .publish(Message::user(
                self.rank(),
                Some(recipient),
                payload.into(),
                timestamp,
                false,
            ))
            .await
    }

    /// Rendezvous send: returns once `dest` has consumed the message and
    /// acknowledged it.
    pub async fn send_to_sync(&self, payload: impl Into<Payload>, dest: &str) -> Result<()> {
        let recipient = self.resolve(dest)?;
        self.enter().await?;
        let _slot = self.inner.ack_slot.lock().await;
        let timestamp = self.inner.clock.increment();
        self.inner.acks.arm(1, timestamp);
        debug!(
            "[{}] rendezvous send to {}:{} with clock {}",
            self.inner.label(),
            dest,
            recipient,
            timestamp
        );
        self.inner
            .bus
            .publish(Message::rendezvous(
                self.rank(),
                recipient,
                payload.into(),
                timestamp,
            ))
            .await?;
        self.inner.acks.wait().await;
        debug!("[{}] rendezvous with {} acknowledged", self.inner.label(), dest);
        Ok(())
    }

    /// Rendezvous receive: waits for a synchronous message addressed to us,
    /// merges its timestamp and acknowledges it to its sender.
    pub async fn recv_from_sync(&self, src: &str) -> Result<Message> {
        let expected = self.resolve(src)?;
        self.enter().await?;
        let message = {
            let mut slot = self.inner.rendezvous_rx.lock().await;
            slot.recv().await
        }
        .ok_or_else(|| transport_error!("rendezvous slot closed"))?;

        let now = self.inner.clock.merge(message.timestamp);
        let sender = message.sender.unwrap_or(expected);
        if sender != expected {
            warn!(
                "[{}] expected a rendezvous from {}:{}, captured one from rank {}",
                self.inner.label(),
                src,
                expected,
                sender
            );
        }
        debug!(
            "[{}] rendezvous received from rank {} with clock {}",
            self.inner.label(),
            sender,
            now
        );
        self.inner
            .bus
            .publish(Message::ack(self.rank(), sender, message.timestamp))
            .await?;
        Ok(message)
    }

    /// Asynchronous message to every process, ourselves included
    pub async fn broadcast(&self, payload: impl Into<Payload>) -> Result<()> {
        self.enter().await?;
        let timestamp = self.inner.clock.increment();
        debug!("[{}] broadcasting with clock {}", self.inner.label(), timestamp);
        self.inner
            .bus
            .publish(Message::user(
                self.rank(),
                None,
                payload.into(),
                timestamp,
                false,
            ))
            .await
    }

    /// Broadcast that returns once every process, ourselves included, has
    /// acknowledged it.
    pub async fn ack_needed_broadcast(&self, payload: impl Into<Payload>) -> Result<()> {
        self.enter().await?;
        let _slot = self.inner.ack_slot.lock().await;
        let timestamp = self.inner.clock.increment();
        self.inner.acks.arm(self.group_size(), timestamp);
        debug!(
            "[{}] broadcasting with clock {}, expecting {} acknowledgments",
            self.inner.label(),
            timestamp,
            self.group_size()
        );
        self.inner
            .bus
            .publish(Message::user(
                self.rank(),
                None,
                payload.into(),
                timestamp,
                true,
            ))
            .await?;
        self.inner.acks.wait().await;
        Ok(())
    }

    /// Barrier: returns once every process of the group has joined this round
    pub async fn synchronize(&self) -> Result<()> {
        self.enter().await?;
        info!("[{}] is synchronizing", self.inner.label());
        // rounds completed so far; ours is a later one
        let round = self.inner.barrier.round();
        self.inner
            .bus
            .publish(Message::barrier_join(self.rank()))
            .await?;
        self.inner.barrier.wait_past(round).await;
        info!(
            "[{}] synchronized with {} others",
            self.inner.label(),
            self.group_size() - 1
        );
        Ok(())
    }

    /// Wait for the ring token; returns holding the critical section
    pub async fn request_critical_section(&self) -> Result<()> {
        self.enter().await?;
        info!("[{}] is requesting the critical section", self.inner.label());
        self.inner.token.request().await?;
        info!("[{}] got the token", self.inner.label());
        Ok(())
    }

    /// Leave the critical section; the token handler forwards the token
    pub async fn release_critical_section(&self) -> Result<()> {
        self.enter().await?;
        self.inner.token.release()?;
        info!("[{}] released the critical section", self.inner.label());
        Ok(())
    }

    /// Stop heartbeats and liveness checks and leave the bus.
    ///
    /// Peers currently waiting on this process are not released.
    pub async fn stop(&self) {
        if !self.is_alive() {
            return;
        }
        self.inner.alive.lower();
        self.leave_bus();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.join().await;
        }
        info!("[{}] stopped", self.inner.label());
    }

    fn leave_bus(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            self.inner.bus.unsubscribe(subscription);
        }
    }
}

impl Drop for Com {
    fn drop(&mut self) {
        self.inner.alive.lower();
        self.leave_bus();
    }
}
