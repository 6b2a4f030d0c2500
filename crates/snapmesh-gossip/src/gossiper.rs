//! Membership and event mesh runtime.
//!
//! A [`Gossiper`] owns one UDP socket and three background tasks: a receive
//! loop, a probe loop that detects failed members, and a reap loop that forgets
//! them and persists known peers. A member that misses a direct probe is probed
//! through up to `indirect_probes` relays, then suspected, and declared failed
//! only if it stays silent for the suspicion timeout. User events are de-duplicated by
//! `(origin, ltime)`, forwarded once to a random fan-out of peers and pushed
//! onto a bounded channel drained by the event loop.

use crate::config::GossipConfig;
use crate::error::{GossipError, Result};
use crate::handler::{EventHandler, HandlerRegistry};
use crate::member::{MemberEvent, MemberRecord, MemberStatus, Membership};
use crate::message::{GossipMessage, UserEvent};
use crate::snapshot::{PeerSnapshot, SnapshotFile};
use crate::transport::UdpTransport;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace, warn};

/// How long `(origin, ltime)` pairs are remembered for de-duplication.
const SEEN_RETENTION: Duration = Duration::from_secs(600);

/// A payload that can be sent as a user event.
pub trait EventPayload: Send + Sync {
    /// Bytes put on the wire.
    fn encode(&self) -> Vec<u8>;
}

impl EventPayload for Vec<u8> {
    fn encode(&self) -> Vec<u8> {
        self.clone()
    }
}

/// Events surfaced to the event loop.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// Membership change.
    Member(MemberEvent),
    /// Query received.
    Query(UserEvent),
    /// User event received.
    User(UserEvent),
}

/// Lifecycle of a mesh member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshState {
    /// Bound, not joined yet.
    Unjoined,
    /// Join in progress.
    Joining,
    /// At least one seed answered.
    Joined,
    /// Event loop started.
    Running,
    /// Left the mesh; background tasks stopped.
    Left,
}

/// Membership and event dissemination as seen by the agent.
#[async_trait]
pub trait EventMesh: Send + Sync {
    /// Contacts `seeds` concurrently. Returns how many acknowledged.
    async fn join(&self, seeds: &[String]) -> Result<usize>;
    /// IP addresses of alive members, the local one included.
    fn alive_members(&self) -> Vec<String>;
    /// Appends a handler for events named `name`.
    fn register_event_handler(&self, name: &str, handler: Arc<dyn EventHandler>);
    /// Broadcasts an event to every member, this one included.
    async fn send_event(&self, name: &str, payload: &dyn EventPayload) -> Result<()>;
    /// Broadcasts a query to every member, this one included.
    async fn send_query(&self, name: &str, payload: &dyn EventPayload) -> Result<()>;
    /// Starts the single consumer of mesh events.
    fn spawn_event_loop(&self) -> Result<JoinHandle<()>>;
    /// Announces departure and stops background work.
    async fn leave(&self) -> Result<()>;
}

struct Inner {
    config: GossipConfig,
    membership: Membership,
    transport: UdpTransport,
    handlers: Arc<HandlerRegistry>,
    pending: DashMap<u64, oneshot::Sender<()>>,
    seen: DashMap<(String, u64), Instant>,
    clock: AtomicU64,
    seq: AtomicU64,
    learn_addr: AtomicBool,
    events_tx: mpsc::Sender<MeshEvent>,
    state: Mutex<MeshState>,
    snapshot: Option<SnapshotFile>,
}

/// Gossip mesh member.
pub struct Gossiper {
    inner: Arc<Inner>,
    events_rx: Mutex<Option<mpsc::Receiver<MeshEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Gossiper {
    /// Binds the mesh socket and starts the background tasks.
    pub async fn bind(config: GossipConfig) -> Result<Self> {
        let transport = UdpTransport::bind(config.bind_addr, config.max_packet_size).await?;
        let bound = transport.local_addr()?;
        let advertise = config.advertise_addr.unwrap_or(bound);
        let name = config.resolved_node_name();
        let snapshot = match &config.snapshot_path {
            Some(path) => Some(SnapshotFile::open(path)?),
            None => None,
        };
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity.max(1));

        // Starting from wall time keeps a restarted member from reusing an ltime.
        let clock = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let inner = Arc::new(Inner {
            membership: Membership::new(
                MemberRecord::alive(name.clone(), advertise),
                config.suspicion_timeout(),
            ),
            transport,
            handlers: Arc::new(HandlerRegistry::new()),
            pending: DashMap::new(),
            seen: DashMap::new(),
            clock: AtomicU64::new(clock),
            seq: AtomicU64::new(0),
            learn_addr: AtomicBool::new(advertise.ip().is_unspecified()),
            events_tx,
            state: Mutex::new(MeshState::Unjoined),
            snapshot,
            config,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(Inner::recv_loop(Arc::clone(&inner), shutdown_rx.clone())),
            tokio::spawn(Inner::probe_loop(Arc::clone(&inner), shutdown_rx.clone())),
            tokio::spawn(Inner::reap_loop(Arc::clone(&inner), shutdown_rx)),
        ];
        info!(node = %name, addr = %advertise, "gossip mesh bound");

        Ok(Self {
            inner,
            events_rx: Mutex::new(Some(events_rx)),
            tasks: Mutex::new(tasks),
            shutdown_tx,
        })
    }

    /// Name of the local member.
    pub fn name(&self) -> String {
        self.inner.membership.local().name
    }

    /// Address announced to peers.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.membership.local().addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MeshState {
        self.inner.state()
    }

    /// Every known member, whatever its status.
    pub fn members(&self) -> Vec<MemberRecord> {
        self.inner.membership.records()
    }
}

#[async_trait]
impl EventMesh for Gossiper {
    async fn join(&self, seeds: &[String]) -> Result<usize> {
        if seeds.is_empty() {
            return Ok(0);
        }
        self.inner.ensure_active()?;
        self.inner.advance(MeshState::Unjoined, MeshState::Joining);

        let port = self.inner.config.bind_addr.port();
        let port = if port == 0 { self.local_addr().port() } else { port };
        let mut targets = Vec::with_capacity(seeds.len());
        let mut last_error = None;
        for seed in seeds {
            match resolve_seed(seed, port).await {
                Ok(addr) => targets.push(addr),
                Err(e) => {
                    warn!(seed = %seed, error = %e, "skipping seed");
                    last_error = Some(e.to_string());
                }
            }
        }
        if let Some(file) = self.inner.snapshot.clone() {
            match tokio::task::spawn_blocking(move || file.load()).await {
                Ok(Ok(Some(snapshot))) => targets.extend(snapshot.peers),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(error = %e, "ignoring unreadable gossip snapshot"),
                Err(e) => warn!(error = %e, "gossip snapshot task failed"),
            }
        }
        targets.sort();
        targets.dedup();
        let attempted = targets.len().max(seeds.len());

        let attempts = targets.iter().map(|addr| self.inner.join_one(*addr));
        let mut joined = 0;
        for result in futures::future::join_all(attempts).await {
            match result {
                Ok(()) => joined += 1,
                Err(e) => {
                    debug!(error = %e, "seed did not answer");
                    last_error = Some(e.to_string());
                }
            }
        }

        if joined == 0 {
            self.inner.advance(MeshState::Joining, MeshState::Unjoined);
            return Err(GossipError::JoinFailed {
                attempted,
                last_error: last_error.unwrap_or_else(|| "no seed resolved".to_string()),
            });
        }
        self.inner.advance(MeshState::Joining, MeshState::Joined);
        self.inner.persist_snapshot().await;
        info!(joined, attempted, "joined gossip mesh");
        Ok(joined)
    }

    fn alive_members(&self) -> Vec<String> {
        self.inner
            .membership
            .alive()
            .into_iter()
            .map(|m| m.addr.ip().to_string())
            .collect()
    }

    fn register_event_handler(&self, name: &str, handler: Arc<dyn EventHandler>) {
        self.inner.handlers.register(name, handler);
    }

    async fn send_event(&self, name: &str, payload: &dyn EventPayload) -> Result<()> {
        self.inner.publish(name, payload.encode(), false).await
    }

    async fn send_query(&self, name: &str, payload: &dyn EventPayload) -> Result<()> {
        self.inner.publish(name, payload.encode(), true).await
    }

    fn spawn_event_loop(&self) -> Result<JoinHandle<()>> {
        self.inner.ensure_active()?;
        let rx = lock(&self.events_rx)
            .take()
            .ok_or(GossipError::EventLoopAlreadyRunning)?;
        let shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(Inner::event_loop(Arc::clone(&self.inner), rx, shutdown));
        *lock(&self.inner.state) = MeshState::Running;
        Ok(handle)
    }

    async fn leave(&self) -> Result<()> {
        if self.inner.state() == MeshState::Left {
            return Ok(());
        }
        self.inner.persist_snapshot().await;
        let peers = self.inner.membership.random_alive_peers(usize::MAX, &[]);
        let record = self.inner.membership.set_local_status(MemberStatus::Leaving);
        let message = GossipMessage::Leave { from: record };
        for peer in &peers {
            if let Err(e) = self.inner.transport.send(&message, peer.addr).await {
                warn!(peer = %peer.name, error = %e, "failed to announce leave");
            }
        }
        self.inner.membership.set_local_status(MemberStatus::Left);
        *lock(&self.inner.state) = MeshState::Left;

        let _ = self.shutdown_tx.send(true);
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            let _ = task.await;
        }
        info!(peers = peers.len(), "left gossip mesh");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn state(&self) -> MeshState {
        *lock(&self.state)
    }

    fn advance(&self, from: MeshState, to: MeshState) {
        let mut state = lock(&self.state);
        if *state == from {
            *state = to;
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state() == MeshState::Left {
            return Err(GossipError::Left);
        }
        Ok(())
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn register_pending(&self, seq: u64) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(seq, tx);
        rx
    }

    fn complete_pending(&self, seq: u64) {
        if let Some((_, tx)) = self.pending.remove(&seq) {
            let _ = tx.send(());
        }
    }

    fn emit(&self, event: MeshEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(?event, "mesh event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("mesh event channel closed");
            }
        }
    }

    fn emit_member(&self, change: Option<MemberEvent>) {
        if let Some(change) = change {
            debug!(member = %change.member.name, kind = ?change.kind, "membership changed");
            self.emit(MeshEvent::Member(change));
        }
    }

    fn on_contact(&self, from: MemberRecord, src: SocketAddr) {
        self.on_alive(MemberRecord { addr: src, ..from });
    }

    fn on_alive(&self, record: MemberRecord) {
        let change = if record.status == MemberStatus::Alive {
            self.membership.observe_alive(record, Instant::now())
        } else {
            self.membership.merge(record, Instant::now())
        };
        self.emit_member(change);
    }

    fn on_rumors(&self, rumors: Vec<MemberRecord>) {
        let now = Instant::now();
        for rumor in rumors {
            self.emit_member(self.membership.merge(rumor, now));
        }
    }

    async fn persist_snapshot(&self) {
        let Some(file) = self.snapshot.clone() else {
            return;
        };
        let peers: Vec<SocketAddr> = self
            .membership
            .random_alive_peers(usize::MAX, &[])
            .into_iter()
            .map(|m| m.addr)
            .collect();
        if peers.is_empty() {
            return;
        }
        let snapshot = PeerSnapshot::now(self.membership.local().name, peers);
        match tokio::task::spawn_blocking(move || file.store(&snapshot)).await {
            Ok(Ok(())) => trace!("gossip snapshot persisted"),
            Ok(Err(e)) => warn!(error = %e, "failed to persist gossip snapshot"),
            Err(e) => warn!(error = %e, "gossip snapshot task failed"),
        }
    }

    async fn join_one(&self, addr: SocketAddr) -> Result<()> {
        let seq = self.next_seq();
        let rx = self.register_pending(seq);
        let message = GossipMessage::Join {
            from: self.membership.local(),
            seq,
        };
        if let Err(e) = self.transport.send(&message, addr).await {
            self.pending.remove(&seq);
            return Err(e);
        }
        let timeout = self.config.join_timeout();
        match time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            _ => {
                self.pending.remove(&seq);
                Err(GossipError::JoinTimeout {
                    addr,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn publish(&self, name: &str, payload: Vec<u8>, query: bool) -> Result<()> {
        self.ensure_active()?;
        if payload.len() > self.config.max_event_size {
            return Err(GossipError::PayloadTooLarge {
                size: payload.len(),
                max_size: self.config.max_event_size,
            });
        }
        let event = UserEvent {
            origin: self.membership.local().name,
            ltime: self.clock.fetch_add(1, Ordering::SeqCst) + 1,
            name: name.to_string(),
            payload,
            broadcast: true,
        };
        self.seen
            .insert((event.origin.clone(), event.ltime), Instant::now());

        let message = wrap(event.clone(), query);
        for peer in self.membership.random_alive_peers(usize::MAX, &[]) {
            if let Err(e) = self.transport.send(&message, peer.addr).await {
                warn!(peer = %peer.name, event = %event.name, error = %e, "failed to send event");
            }
        }
        debug!(event = %event.name, ltime = event.ltime, query, "event published");
        self.emit(unwrap_event(event, query));
        Ok(())
    }

    async fn relay(&self, event: UserEvent, src: SocketAddr, query: bool) {
        self.clock.fetch_max(event.ltime, Ordering::SeqCst);
        let key = (event.origin.clone(), event.ltime);
        if self.seen.insert(key, Instant::now()).is_some() {
            trace!(event = %event.name, origin = %event.origin, "duplicate event");
            return;
        }
        let message = wrap(event.clone(), query);
        let peers = self
            .membership
            .random_alive_peers(self.config.gossip_fanout, &[event.origin.as_str()]);
        for peer in peers.iter().filter(|p| p.addr != src) {
            if let Err(e) = self.transport.send(&message, peer.addr).await {
                warn!(peer = %peer.name, error = %e, "failed to forward event");
            }
        }
        self.emit(unwrap_event(event, query));
    }

    async fn handle_message(
        self: &Arc<Self>,
        message: GossipMessage,
        src: SocketAddr,
    ) -> Result<()> {
        let local = self.membership.local();
        match message {
            GossipMessage::Join { from, seq } => {
                trace!(peer = %from.name, %src, "received join");
                if from.name != local.name {
                    self.on_contact(from, src);
                }
                let reply = GossipMessage::JoinAck {
                    from: self.membership.local(),
                    seq,
                    observed: src,
                    members: self.membership.records(),
                };
                self.transport.send(&reply, src).await?;
            }
            GossipMessage::JoinAck {
                from,
                seq,
                observed,
                members,
            } => {
                if self.learn_addr.swap(false, Ordering::SeqCst) {
                    let addr = SocketAddr::new(observed.ip(), local.addr.port());
                    info!(%addr, "learned advertise address from seed");
                    self.membership.set_local_addr(addr);
                }
                if from.name != local.name {
                    self.on_contact(from, src);
                }
                self.on_rumors(members);
                self.complete_pending(seq);
            }
            GossipMessage::Ping { from, seq, rumors } => {
                trace!(peer = %from.name, "received ping");
                self.on_contact(from, src);
                self.on_rumors(rumors);
                let ack = GossipMessage::Ack {
                    from: self.membership.local(),
                    seq,
                    rumors: self.membership.recent_rumors(self.config.max_rumors),
                };
                self.transport.send(&ack, src).await?;
            }
            GossipMessage::Ack { from, seq, rumors } => {
                trace!(peer = %from.name, "received ack");
                self.on_contact(from, src);
                self.on_rumors(rumors);
                self.complete_pending(seq);
            }
            GossipMessage::Event(event) => self.relay(event, src, false).await,
            GossipMessage::Query(event) => self.relay(event, src, true).await,
            GossipMessage::Leave { from } => {
                info!(peer = %from.name, "member is leaving");
                self.emit_member(self.membership.mark_left(from, Instant::now()));
            }
            GossipMessage::PingReq { from, seq, target } => {
                trace!(peer = %from.name, member = %target.name, "received ping request");
                self.on_contact(from, src);
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    match inner.ping(target.addr).await {
                        Ok(true) => {
                            let ack = GossipMessage::IndirectAck {
                                from: inner.membership.local(),
                                seq,
                                target: MemberRecord {
                                    status: MemberStatus::Alive,
                                    ..target
                                },
                            };
                            if let Err(e) = inner.transport.send(&ack, src).await {
                                debug!(%src, error = %e, "failed to return indirect ack");
                            }
                        }
                        Ok(false) => trace!(member = %target.name, "indirect ping unanswered"),
                        Err(e) => {
                            debug!(member = %target.name, error = %e, "indirect ping failed")
                        }
                    }
                });
            }
            GossipMessage::IndirectAck { from, seq, target } => {
                trace!(peer = %from.name, member = %target.name, "received indirect ack");
                self.on_contact(from, src);
                if target.name != local.name {
                    self.on_alive(target);
                }
                self.complete_pending(seq);
            }
        }
        Ok(())
    }

    /// Pings `addr` directly. `Ok(false)` when no ack arrived in time.
    async fn ping(&self, addr: SocketAddr) -> Result<bool> {
        let seq = self.next_seq();
        let rx = self.register_pending(seq);
        let ping = GossipMessage::Ping {
            from: self.membership.local(),
            seq,
            rumors: self.membership.recent_rumors(self.config.max_rumors),
        };
        if let Err(e) = self.transport.send(&ping, addr).await {
            self.pending.remove(&seq);
            return Err(e);
        }
        Ok(self.await_ack(seq, rx, self.config.probe_timeout()).await)
    }

    async fn await_ack(&self, seq: u64, rx: oneshot::Receiver<()>, timeout: Duration) -> bool {
        match time::timeout(timeout, rx).await {
            Ok(Ok(())) => true,
            _ => {
                self.pending.remove(&seq);
                false
            }
        }
    }

    async fn run_probe_cycle(&self) -> Result<()> {
        let target = {
            let candidates = self.membership.probe_candidates();
            match candidates.choose(&mut rand::thread_rng()) {
                Some(target) => target.clone(),
                None => return Ok(()),
            }
        };
        if self.ping(target.addr).await? {
            return Ok(());
        }

        let relays = self
            .membership
            .random_alive_peers(self.config.indirect_probes, &[target.name.as_str()]);
        if !relays.is_empty() {
            let seq = self.next_seq();
            let rx = self.register_pending(seq);
            let request = GossipMessage::PingReq {
                from: self.membership.local(),
                seq,
                target: target.clone(),
            };
            for relay in &relays {
                if let Err(e) = self.transport.send(&request, relay.addr).await {
                    debug!(relay = %relay.name, error = %e, "failed to send ping request");
                }
            }
            // A relay needs a full round trip to the target before it answers.
            if self.await_ack(seq, rx, self.config.probe_timeout() * 2).await {
                debug!(
                    member = %target.name,
                    relays = relays.len(),
                    "member answered through a relay"
                );
                return Ok(());
            }
        }

        let change = self.membership.mark_suspect(&target.name, Instant::now());
        if change.is_some() {
            warn!(
                member = %target.name,
                addr = %target.addr,
                relays = relays.len(),
                "member missed probe, suspecting"
            );
        }
        self.emit_member(change);
        Ok(())
    }

    fn expire_suspects(&self) {
        for change in self.membership.expire_suspects(Instant::now()) {
            warn!(
                member = %change.member.name,
                addr = %change.member.addr,
                "suspected member did not refute, marking failed"
            );
            self.emit_member(Some(change));
        }
    }

    async fn recv_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.transport.recv() => {
                    match received {
                        Ok((message, src)) => {
                            if let Err(err) = self.handle_message(message, src).await {
                                warn!("failed to handle gossip message from {src}: {err}");
                            }
                        }
                        Err(err) => warn!("gossip recv error: {err}"),
                    }
                }
            }
        }
    }

    async fn probe_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.config.probe_interval());
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.run_probe_cycle().await {
                        warn!("probe cycle failed: {err}");
                    }
                    self.expire_suspects();
                }
            }
        }
    }

    async fn reap_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let reap_after = self.config.reap_after();
        let mut ticker = time::interval((reap_after / 2).max(Duration::from_millis(100)));
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.expire_suspects();
                    let now = Instant::now();
                    for change in self.membership.reap(now, reap_after) {
                        self.emit_member(Some(change));
                    }
                    self.seen
                        .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < SEEN_RETENTION);
                    self.persist_snapshot().await;
                }
            }
        }
    }

    async fn event_loop(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<MeshEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("mesh event loop started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = rx.recv() => match event {
                    None => break,
                    Some(MeshEvent::Member(change)) => {
                        info!(
                            member = %change.member.name,
                            addr = %change.member.addr,
                            kind = ?change.kind,
                            "member event"
                        );
                    }
                    Some(MeshEvent::Query(query)) => {
                        info!(query = %query.name, origin = %query.origin, "query received");
                    }
                    Some(MeshEvent::User(event)) => {
                        debug!(event = %event.name, origin = %event.origin, "user event received");
                        let handlers = Arc::clone(&self.handlers);
                        tokio::spawn(async move {
                            handlers.dispatch(&event).await;
                        });
                    }
                },
            }
        }
        info!("mesh event loop stopped");
    }
}

fn wrap(event: UserEvent, query: bool) -> GossipMessage {
    if query {
        GossipMessage::Query(event)
    } else {
        GossipMessage::Event(event)
    }
}

fn unwrap_event(event: UserEvent, query: bool) -> MeshEvent {
    if query {
        MeshEvent::Query(event)
    } else {
        MeshEvent::User(event)
    }
}

/// Parses `host`, `ip` or `host:port`, filling in `default_port` when absent.
pub(crate) async fn resolve_seed(seed: &str, default_port: u16) -> Result<SocketAddr> {
    let seed = seed.trim();
    if let Ok(addr) = seed.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = seed.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }
    if seed.is_empty() {
        return Err(GossipError::InvalidSeed {
            seed: seed.to_string(),
            reason: "empty".to_string(),
        });
    }
    let target = if seed.contains(':') {
        seed.to_string()
    } else {
        format!("{seed}:{default_port}")
    };
    let mut addrs = tokio::net::lookup_host(target)
        .await
        .map_err(|e| GossipError::InvalidSeed {
            seed: seed.to_string(),
            reason: e.to_string(),
        })?;
    addrs.next().ok_or_else(|| GossipError::InvalidSeed {
        seed: seed.to_string(),
        reason: "no address found".to_string(),
    })
}
