//! The discovery node runtime.
//!
//! One task owns the [`Orchestrator`] and with it every piece of mutable
//! node state. Connection tasks decode frames and hand them over as
//! [`Event`]s; the loop feeds each to the backend and carries out the
//! effects it returns:
//!
//! ```text
//!   accept loop ──► connection tasks ──► event loop ──► links ──► peers
//!                        ▲                    │
//!                        └──── replies ◄──────┘
//! ```
//!
//! Peer traffic is acknowledged as soon as it is queued, so no connection
//! ever waits on another node's progress. A client connection waits for its
//! reply up to the operation timeout.

mod link;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use corelib::{HashAlgorithm, NodeRef};
use protocol::{
    request, Connection, ErrorKind, FrameCodec, LeaderHandoff, Message, RetryPolicy, RingParams, TransportError,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::backend::{CentralizedRegistry, DiscoveryBackend, Effect, ReadinessTarget, RingNode, Token};
use crate::error::{DiscoveryError, Result};
use crate::failover::{Coordinator, CoordinatorError, Election, Standing, Version};
use crate::orchestrator::{DiscoveryStrategy, LeaderState, Orchestrator};

use link::{Links, Target};

/// Prune abandoned client slots every this many requests.
const PRUNE_EVERY: Token = 256;

#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Listen address.
    pub bind: String,
    /// `address:port` peers and clients use to reach this node. Defaults to
    /// the bound address.
    pub advertise: Option<String>,
    pub strategy: DiscoveryStrategy,
    pub target: ReadinessTarget,
    pub ring: RingParams,
    /// Any ring member to join through; `None` starts a new ring.
    pub bootstrap: Option<String>,
    pub codec: FrameCodec,
    /// Timeout and retries for one peer hop.
    pub hop: RetryPolicy,
    /// How long a client request may take end to end.
    pub op_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5555".to_string(),
            advertise: None,
            strategy: DiscoveryStrategy::default(),
            target: ReadinessTarget::default(),
            ring: RingParams {
                bits: 48,
                algorithm: HashAlgorithm::default(),
            },
            bootstrap: None,
            codec: FrameCodec::default(),
            hop: RetryPolicy::default(),
            op_timeout: Duration::from_secs(10),
        }
    }
}

/// What connection and link tasks tell the event loop.
pub(crate) enum Event {
    Client {
        msg: Message,
        reply: oneshot::Sender<Message>,
    },
    Peer(Message),
    Undeliverable {
        to: Target,
        message: Message,
    },
}

pub struct DiscoveryNode {
    config: NodeConfig,
    listener: TcpListener,
    advertised: String,
    coordinator: Option<Arc<dyn Coordinator>>,
}

impl DiscoveryNode {
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind).await?;
        let advertised = match &config.advertise {
            Some(addr) => addr.clone(),
            None => listener.local_addr()?.to_string(),
        };
        Ok(Self {
            config,
            listener,
            advertised,
            coordinator: None,
        })
    }

    /// Runs under failover, electing a leader through `coordinator`.
    pub fn with_coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn advertised(&self) -> &str {
        &self.advertised
    }

    /// Runs the node on its own task.
    pub fn spawn(self) -> Result<NodeHandle> {
        let addr = self.local_addr()?;
        let advertised = self.advertised.clone();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(self.run(async move {
            let _ = rx.await;
        }));
        Ok(NodeHandle {
            addr,
            advertised,
            shutdown: Some(tx),
            task,
        })
    }

    /// Serves until `shutdown` resolves. A failover leader hands off before
    /// returning.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let DiscoveryNode {
            config,
            listener,
            advertised,
            coordinator,
        } = self;
        if coordinator.is_some() && config.strategy == DiscoveryStrategy::Distributed {
            return Err(DiscoveryError::Config(
                "failover runs on the centralized strategy only".into(),
            ));
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        tasks.spawn(accept_loop(listener, events_tx.clone(), config.codec, config.op_timeout));

        let (backend, me) = build_backend(&config, &advertised).await?;
        let mut orch = Orchestrator::new(config.strategy, backend);
        let mut links = Links::new(events_tx.clone(), config.codec, config.hop);
        let mut failover = match coordinator {
            Some(coord) => Some(Failover::start(coord, &advertised, &mut orch).await?),
            None => None,
        };
        info!(node = %advertised, strategy = %config.strategy, "discovery node running");

        let mut waiting: HashMap<Token, oneshot::Sender<Message>> = HashMap::new();
        let mut next_token: Token = 0;
        tokio::pin!(shutdown);
        let outcome = 'events: loop {
            let effects = tokio::select! {
                _ = &mut shutdown => break 'events Ok(()),
                Some(event) = events_rx.recv() => match event {
                    Event::Client { msg, reply } => {
                        next_token += 1;
                        if next_token % PRUNE_EVERY == 0 {
                            waiting.retain(|_, tx| !tx.is_closed());
                        }
                        waiting.insert(next_token, reply);
                        orch.handle_client(next_token, msg)
                    }
                    Event::Peer(msg) => orch.handle_peer(msg),
                    Event::Undeliverable { to: Target::Peer(node), message } => {
                        orch.handle_undeliverable(&node, message)
                    }
                    Event::Undeliverable { to: Target::Standby(addr), message } => {
                        warn!(standby = %addr, msg_type = ?message.msg_type(), "replica not delivered");
                        Vec::new()
                    }
                },
                standing = next_standing(&mut failover) => match standing {
                    Ok(standing) => {
                        orch.set_leadership(standing.state.clone());
                        if let Some(f) = failover.as_mut() {
                            f.observe(standing);
                        }
                        Vec::new()
                    }
                    Err(err) => break 'events Err(err),
                },
            };
            execute(effects, &mut orch, me.as_ref(), &mut waiting, &mut links);
            if let Some(f) = failover.as_mut() {
                f.sync(&orch, &mut links);
            }
        };

        if let Err(err) = &outcome {
            error!(error = %err, "discovery node failed");
        }
        if let Some(f) = failover {
            // The backend is not Sync; take what the exit needs up front.
            let leadership = orch.leadership().clone();
            let handoff = orch.handoff(f.epoch());
            f.stop(leadership, handoff, config.codec, &config.hop).await;
        }
        debug!(links = links.active(), "closing peer links");
        links.shutdown().await;
        tasks.shutdown().await;
        info!(node = %advertised, "discovery node stopped");
        outcome
    }
}

/// A node running on its own task.
pub struct NodeHandle {
    addr: SocketAddr,
    advertised: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl NodeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn advertised(&self) -> &str {
        &self.advertised
    }

    /// Stops the node gracefully and waits for it.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.map_err(|_| DiscoveryError::Stopped)?
    }

    /// Kills the node without any handoff, as a crash would.
    pub fn abort(self) {
        self.task.abort();
    }
}

async fn build_backend(config: &NodeConfig, advertised: &str) -> Result<(Box<dyn DiscoveryBackend>, Option<NodeRef>)> {
    match config.strategy {
        DiscoveryStrategy::Centralized => Ok((Box::new(CentralizedRegistry::new(config.target)), None)),
        DiscoveryStrategy::Distributed => {
            let (address, port) = split_endpoint(advertised)?;
            let mut node = RingNode::new(address, port, config.ring, config.target)?;
            if let Some(bootstrap) = &config.bootstrap {
                info!(%bootstrap, me = %node.identity(), "joining ring");
                // The contact may forward the join around the ring, so allow
                // a whole operation rather than one hop.
                let policy = RetryPolicy {
                    timeout: config.op_timeout,
                    ..config.hop
                };
                let reply: Message = request(bootstrap, &node.join_request(), config.codec, &policy).await?;
                node.complete_join(reply)?;
            }
            let me = node.identity().clone();
            Ok((Box::new(node), Some(me)))
        }
    }
}

fn split_endpoint(endpoint: &str) -> Result<(&str, u16)> {
    let bad = || DiscoveryError::Config(format!("expected address:port, got {endpoint:?}"));
    let (address, port) = endpoint.rsplit_once(':').ok_or_else(bad)?;
    let port = port.parse().map_err(|_| bad())?;
    Ok((address, port))
}

fn execute(
    effects: Vec<Effect>,
    orch: &mut Orchestrator,
    me: Option<&NodeRef>,
    waiting: &mut HashMap<Token, oneshot::Sender<Message>>,
    links: &mut Links,
) {
    let mut queue = VecDeque::from(effects);
    while let Some(effect) = queue.pop_front() {
        match effect {
            Effect::Reply { token, message } => match waiting.remove(&token) {
                Some(tx) => {
                    if tx.send(message).is_err() {
                        debug!(token, "client left before its reply");
                    }
                }
                None => debug!(token, "no client waiting"),
            },
            Effect::Send { to, message } if me.is_some_and(|me| me.same_node(&to)) => {
                queue.extend(orch.handle_peer(message));
            }
            Effect::Send { to, message } => links.send(Target::Peer(to), message),
        }
    }
}

/// Failover state the event loop carries alongside the orchestrator.
struct Failover {
    election: Arc<Election>,
    standing: watch::Receiver<Standing>,
    brokers: mpsc::UnboundedSender<String>,
    follower: JoinHandle<std::result::Result<(), CoordinatorError>>,
    standbys: Vec<String>,
    /// Record version at which this node last became leader.
    term: Option<Version>,
    published_broker: Option<String>,
    replicated: Option<(LeaderHandoff, Vec<String>)>,
}

impl Failover {
    async fn start(coord: Arc<dyn Coordinator>, me: &str, orch: &mut Orchestrator) -> Result<Self> {
        let election = Arc::new(Election::join(coord, me).await?);
        let initial = election.reconcile().await?;
        orch.set_leadership(initial.state.clone());
        let published_broker = election.record().await?.and_then(|(record, _)| record.broker);

        let standbys = initial.standbys.clone();
        let term = (initial.state == LeaderState::Leader).then_some(initial.version);
        let (state_tx, standing) = watch::channel(initial);
        let (brokers, brokers_rx) = mpsc::unbounded_channel();
        let follower = {
            let election = Arc::clone(&election);
            tokio::spawn(async move { election.follow(state_tx, brokers_rx).await })
        };
        Ok(Self {
            election,
            standing,
            brokers,
            follower,
            standbys,
            term,
            published_broker,
            replicated: None,
        })
    }

    async fn next(&mut self) -> Result<Standing> {
        if self.standing.changed().await.is_ok() {
            return Ok(self.standing.borrow_and_update().clone());
        }
        // The follower dropped its sender; find out why.
        match (&mut self.follower).await {
            Ok(Ok(())) => Err(DiscoveryError::Stopped),
            Ok(Err(err)) => Err(err.into()),
            Err(join) => Err(CoordinatorError::Unavailable(join.to_string()).into()),
        }
    }

    fn observe(&mut self, standing: Standing) {
        match standing.state {
            LeaderState::Leader => {
                self.term.get_or_insert(standing.version);
            }
            _ => self.term = None,
        }
        self.standbys = standing.standbys;
    }

    fn epoch(&self) -> u64 {
        self.term.unwrap_or_default()
    }

    /// Publishes a newly registered broker and pushes the registry to every
    /// standby whenever it or the standby list changes.
    fn sync(&mut self, orch: &Orchestrator, links: &mut Links) {
        if *orch.leadership() != LeaderState::Leader {
            return;
        }
        if let Some(broker) = orch.broker_address() {
            if self.published_broker.as_deref() != Some(broker.as_str()) {
                let _ = self.brokers.send(broker.clone());
                self.published_broker = Some(broker);
            }
        }
        let Some(handoff) = orch.handoff(self.epoch()) else {
            return;
        };
        if self
            .replicated
            .as_ref()
            .is_some_and(|(last, to)| *last == handoff && *to == self.standbys)
        {
            return;
        }
        for standby in &self.standbys {
            links.send(Target::Standby(standby.clone()), Message::LeaderHandoff(handoff.clone()));
        }
        self.replicated = Some((handoff, self.standbys.clone()));
    }

    /// Leaves the group: a leader hands off, a standby resigns.
    async fn stop(
        self,
        leadership: LeaderState,
        handoff: Option<LeaderHandoff>,
        codec: FrameCodec,
        policy: &RetryPolicy,
    ) {
        // The follower would otherwise re-enlist this node once the record
        // names someone else.
        self.follower.abort();
        let result = match leadership {
            LeaderState::Leader => match handoff {
                Some(handoff) => self.election.hand_off(&handoff, codec, policy).await.map(|next| {
                    if next.is_none() {
                        warn!("leaving without a successor; registry is lost");
                    }
                }),
                None => Ok(()),
            },
            _ => self.election.resign().await,
        };
        if let Err(err) = result {
            warn!(error = %err, "failover exit incomplete");
        }
        if let Err(err) = self.election.close().await {
            debug!(error = %err, "closing coordinator session");
        }
    }
}

impl Drop for Failover {
    fn drop(&mut self) {
        self.follower.abort();
    }
}

async fn next_standing(failover: &mut Option<Failover>) -> Result<Standing> {
    match failover {
        Some(f) => f.next().await,
        None => std::future::pending().await,
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::UnboundedSender<Event>,
    codec: FrameCodec,
    op_timeout: Duration,
) {
    let mut conns = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%peer, error = %err, "set_nodelay failed");
                    }
                    let conn = Connection::new(stream, codec);
                    conns.spawn(serve_connection(conn, peer, events.clone(), op_timeout));
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
        }
    }
}

async fn serve_connection(
    mut conn: Connection,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<Event>,
    op_timeout: Duration,
) {
    loop {
        let msg: Message = match conn.recv().await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(TransportError::Codec(err)) => {
                warn!(%peer, error = %err, "undecodable request");
                let _ = conn.send(&Message::error(ErrorKind::Protocol, err.to_string())).await;
                break;
            }
            Err(err) => {
                debug!(%peer, error = %err, "connection dropped");
                break;
            }
        };
        let reply = if msg.is_peer_traffic() {
            if events.send(Event::Peer(msg)).is_err() {
                break;
            }
            Message::Ack
        } else {
            let (tx, rx) = oneshot::channel();
            if events.send(Event::Client { msg, reply: tx }).is_err() {
                break;
            }
            match tokio::time::timeout(op_timeout, rx).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(_)) => Message::error(ErrorKind::Protocol, "request dropped by node"),
                Err(_) => Message::error(ErrorKind::Timeout, format!("no answer within {op_timeout:?}")),
            }
        };
        if let Err(err) = conn.send(&reply).await {
            debug!(%peer, error = %err, "reply not sent");
            break;
        }
    }
}
