//! Consistent-hashing ring backend.
//!
//! Every discovery node sits on a ring ordered by the hash of its
//! `address:port` and knows only its predecessor and successor. A node owns
//! the topics hashing into `(predecessor, self]`.
//!
//! # Algorithm
//!
//! 1. A request for topic `t` enters at any node and is hashed to `h`
//! 2. If `h` is owned locally the node answers
//! 3. If `h` falls in `(self, successor]` the request goes to the successor
//!    flagged so it answers without re-checking
//! 4. Otherwise the request walks toward the owner: to the predecessor while
//!    `h` lies below both this node and its predecessor, else to the
//!    successor
//!
//! Each forwarder pushes its own hop onto the request's chain; the reply pops
//! one hop per step on the way back and completes the pending request at the
//! entry node. Readiness and lookup-all walk the ring exactly once through
//! successors and end at the node whose successor started the walk.
//!
//! Joins are placed the same way through `LocateNewNode`, with a pending
//! entry per hop instead of a chain.

mod pending;
mod table;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use corelib::{HashSpace, NodeRef, Partitioner, RingRange, RingToken};
use protocol::{
    Chain, Endpoint, ErrorKind, ErrorResp, ExitReq, Hop, IsReadyReq, IsReadyResp, LocateNewNode,
    LocateNewNodeResp, LookupAllPubsReq, LookupByTopicReq, LookupResp, Message, Neighbor,
    RegisterReq, RegisterResp, RegisterResult, RingParams, Role, TopicTransfer, UpdateNeighbor,
};
use tracing::{debug, error, info, warn};

use crate::backend::centralized::dedup_endpoints;
use crate::backend::{DiscoveryBackend, Dissemination, Effect, ReadinessTarget, Token, BROKER_TOPIC};
use crate::error::DiscoveryError;
use crate::telemetry;

pub use table::{TopicEntry, TopicTable};

use pending::{Accumulator, JoinOrigin, Pending, PendingTable};

/// Token carried by hops that have no request filed under them.
const RELAY_TOKEN: u64 = 0;

/// Where a request for some hash goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Local,
    Forward { to: NodeRef, successor_flag: bool },
}

/// Registrants that entered the ring through this node. Readiness unions
/// the ids over one revolution, so each registrant counts once however many
/// topics it has and however many nodes it registered through.
///
/// Publisher endpoints are kept too: a publisher with no topics is stored in
/// no topic table, and lookup-all still has to report it.
#[derive(Debug, Default)]
struct Registrants {
    publishers: BTreeMap<String, Endpoint>,
    subscribers: BTreeSet<String>,
    broker: Option<String>,
}

impl Registrants {
    fn record(&mut self, req: &RegisterReq) {
        match req.role {
            Role::Publisher => {
                self.publishers.insert(req.id.clone(), req.endpoint());
            }
            Role::Subscriber => {
                self.subscribers.insert(req.id.clone());
            }
            Role::Broker => self.broker = Some(req.id.clone()),
            Role::RingNode => {}
        }
    }

    fn forget(&mut self, role: Role, id: &str) {
        match role {
            Role::Publisher => {
                self.publishers.remove(id);
            }
            Role::Subscriber => {
                self.subscribers.remove(id);
            }
            Role::Broker => {
                if self.broker.as_deref() == Some(id) {
                    self.broker = None;
                }
            }
            Role::RingNode => {}
        }
    }

    /// Folds this node's registrants into a readiness walk.
    fn tally_into(&self, req: &mut IsReadyReq) {
        req.publisher_ids = union_ids(
            std::mem::take(&mut req.publisher_ids),
            self.publishers.keys(),
        );
        req.subscriber_ids = union_ids(
            std::mem::take(&mut req.subscriber_ids),
            self.subscribers.iter(),
        );
        req.num_pubs = req.publisher_ids.len() as u32;
        req.num_subs = req.subscriber_ids.len() as u32;
        req.broker_flag |= self.broker.is_some();
    }

    fn publisher_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.publishers.values()
    }
}

fn union_ids<'a>(seen: Vec<String>, local: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut all: BTreeSet<String> = seen.into_iter().collect();
    all.extend(local.cloned());
    all.into_iter().collect()
}

/// One ring member.
pub struct RingNode {
    me: NodeRef,
    predecessor: NodeRef,
    successor: NodeRef,
    partitioner: Arc<dyn Partitioner>,
    params: RingParams,
    target: ReadinessTarget,
    table: TopicTable,
    registrants: Registrants,
    pending: PendingTable,
}

impl std::fmt::Debug for RingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingNode")
            .field("me", &self.me)
            .field("predecessor", &self.predecessor)
            .field("successor", &self.successor)
            .field("params", &self.params)
            .field("topics", &self.table.len())
            .finish()
    }
}

impl RingNode {
    /// A ring of one, hashing with `params`.
    pub fn new(
        address: impl Into<String>,
        port: u16,
        params: RingParams,
        target: ReadinessTarget,
    ) -> Result<Self, DiscoveryError> {
        let space = HashSpace::new(params.bits)?;
        Ok(Self::with_partitioner(
            address,
            port,
            params.algorithm.partitioner(space),
            target,
        ))
    }

    pub fn with_partitioner(
        address: impl Into<String>,
        port: u16,
        partitioner: Arc<dyn Partitioner>,
        target: ReadinessTarget,
    ) -> Self {
        let me = NodeRef::new(address, port, &*partitioner);
        let params = RingParams {
            bits: partitioner.space().bits(),
            algorithm: partitioner.algorithm(),
        };
        Self {
            predecessor: me.clone(),
            successor: me.clone(),
            me,
            partitioner,
            params,
            target,
            table: TopicTable::new(),
            registrants: Registrants::default(),
            pending: PendingTable::default(),
        }
    }

    pub fn identity(&self) -> &NodeRef {
        &self.me
    }

    pub fn predecessor(&self) -> &NodeRef {
        &self.predecessor
    }

    pub fn successor(&self) -> &NodeRef {
        &self.successor
    }

    pub fn params(&self) -> RingParams {
        self.params
    }

    pub fn table(&self) -> &TopicTable {
        &self.table
    }

    /// `(predecessor, self]`
    pub fn owned_range(&self) -> RingRange {
        RingRange::new(self.predecessor.hash, self.me.hash)
    }

    pub fn is_alone(&self) -> bool {
        self.successor.same_node(&self.me)
    }

    /// Requests and joins still waiting on peers.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn hash_topic(&self, topic: &str) -> RingToken {
        self.partitioner.partition_str(topic)
    }

    /// The registration this node sends to a bootstrap peer to join.
    pub fn join_request(&self) -> Message {
        Message::Register(RegisterReq {
            role: Role::RingNode,
            id: self.me.to_string(),
            address: self.me.address.clone(),
            port: self.me.port,
            topics: Vec::new(),
            successor_flag: false,
            chain: Chain::new(),
            ring_params: Some(self.params),
        })
    }

    /// Applies the bootstrap peer's answer to [`Self::join_request`].
    pub fn complete_join(&mut self, reply: Message) -> Result<(), DiscoveryError> {
        let resp = match reply {
            Message::RegisterResp(resp) => resp,
            Message::Error(err) => return Err(DiscoveryError::JoinRejected(err.message)),
            other => return Err(DiscoveryError::UnexpectedReply(other.msg_type())),
        };
        match (resp.result, resp.predecessor, resp.successor) {
            (RegisterResult::Success, Some(pred), Some(succ)) => {
                self.adopt_neighbors(pred, succ);
                Ok(())
            }
            (RegisterResult::Success, _, _) => Err(DiscoveryError::JoinRejected(
                "bootstrap peer did not name neighbors".into(),
            )),
            (RegisterResult::Failure(reason), _, _) => Err(DiscoveryError::JoinRejected(reason)),
        }
    }

    pub fn adopt_neighbors(&mut self, predecessor: NodeRef, successor: NodeRef) {
        info!(
            me = %self.me,
            predecessor = %predecessor,
            successor = %successor,
            "joined ring"
        );
        self.predecessor = predecessor;
        self.successor = successor;
    }

    fn route(&self, h: RingToken) -> Route {
        if self.owned_range().contains(h) {
            return Route::Local;
        }
        if RingRange::new(self.me.hash, self.successor.hash).contains(h) {
            return Route::Forward {
                to: self.successor.clone(),
                successor_flag: true,
            };
        }
        Route::Forward {
            to: self.next_hop(h).clone(),
            successor_flag: false,
        }
    }

    /// Neighbor to walk toward when neither this node nor its successor owns
    /// `h`.
    fn next_hop(&self, h: RingToken) -> &NodeRef {
        if h < self.me.hash && self.predecessor.hash < self.me.hash {
            &self.predecessor
        } else {
            &self.successor
        }
    }

    // ---- client entry points -------------------------------------------------

    fn client_register(&mut self, token: Token, req: RegisterReq) -> Vec<Effect> {
        self.registrants.record(&req);
        let topics = if req.role == Role::Broker {
            vec![BROKER_TOPIC.to_string()]
        } else {
            distinct(req.topics.clone())
        };
        info!(role = %req.role, id = %req.id, topics = ?topics, "registration entered ring");

        let id = self.pending.open(Pending::new(
            token,
            topics.len(),
            Accumulator::Register { failure: None },
        ));
        let mut effects = Vec::new();
        for topic in topics {
            let sub = RegisterReq {
                topics: vec![topic],
                successor_flag: false,
                chain: Chain::new(),
                ring_params: None,
                ..req.clone()
            };
            self.dispatch(id, Message::Register(sub), &mut effects);
        }
        self.settle(id, &mut effects);
        effects
    }

    fn client_lookup(&mut self, token: Token, topics: Vec<String>) -> Vec<Effect> {
        let topics = match self.target.dissemination {
            Dissemination::Broker => vec![BROKER_TOPIC.to_string()],
            Dissemination::Direct => distinct(topics),
        };
        let id = self.pending.open(Pending::new(
            token,
            topics.len(),
            Accumulator::Lookup {
                addresses: Vec::new(),
            },
        ));
        let mut effects = Vec::new();
        for topic in topics {
            let sub = LookupByTopicReq {
                topics: vec![topic],
                successor_flag: false,
                chain: Chain::new(),
            };
            self.dispatch(id, Message::LookupByTopic(sub), &mut effects);
        }
        self.settle(id, &mut effects);
        effects
    }

    fn client_is_ready(&mut self, token: Token) -> Vec<Effect> {
        let mut walk = IsReadyReq::default();
        self.registrants.tally_into(&mut walk);
        if self.is_alone() {
            let ready = self.target.is_met(walk.num_pubs, walk.num_subs, walk.broker_flag);
            return vec![Effect::Reply {
                token,
                message: Message::IsReadyResp(IsReadyResp {
                    ready,
                    ..Default::default()
                }),
            }];
        }
        let id = self.pending.open(Pending::new(token, 1, Accumulator::Relay));
        walk.initiator = Some(self.me.clone());
        walk.chain.push(Hop::new(self.me.clone(), id));
        telemetry::hop_forwarded(protocol::MsgType::IsReady);
        vec![Effect::Send {
            to: self.successor.clone(),
            message: Message::IsReady(walk),
        }]
    }

    fn client_lookup_all(&mut self, token: Token) -> Vec<Effect> {
        let known: Vec<_> = self
            .table
            .all_publishers()
            .chain(self.registrants.publisher_endpoints())
            .cloned()
            .collect();
        if self.is_alone() {
            return vec![Effect::Reply {
                token,
                message: Message::LookupResp(LookupResp {
                    addresses: dedup_endpoints(known),
                    ..Default::default()
                }),
            }];
        }
        let id = self.pending.open(Pending::new(token, 1, Accumulator::Relay));
        let mut chain = Chain::new();
        chain.push(Hop::new(self.me.clone(), id));
        let walk = LookupAllPubsReq {
            known_addresses: known,
            initiator: Some(self.me.clone()),
            chain,
        };
        telemetry::hop_forwarded(protocol::MsgType::LookupAllPubs);
        vec![Effect::Send {
            to: self.successor.clone(),
            message: Message::LookupAllPubs(walk),
        }]
    }

    fn client_exit(&mut self, token: Token, req: ExitReq) -> Vec<Effect> {
        self.evict(&req);
        let mut effects = vec![Effect::Reply {
            token,
            message: Message::Ack,
        }];
        if !self.is_alone() {
            effects.push(Effect::Send {
                to: self.successor.clone(),
                message: Message::Exit(ExitReq {
                    origin: Some(self.me.clone()),
                    ..req
                }),
            });
        }
        effects
    }

    /// Serves or forwards one single-topic sub-request of pending `id`.
    fn dispatch(&mut self, id: u64, mut msg: Message, effects: &mut Vec<Effect>) {
        let Some(h) = single_topic(&msg).map(|t| self.hash_topic(t)) else {
            return;
        };
        match self.route(h) {
            Route::Local => {
                let reply = self.serve_local(msg, h);
                if let Some((token, message)) = self.pending.absorb(id, reply) {
                    effects.push(Effect::Reply { token, message });
                }
            }
            Route::Forward { to, successor_flag } => {
                set_successor_flag(&mut msg, successor_flag);
                if let Some(chain) = msg.chain_mut() {
                    chain.push(Hop::new(self.me.clone(), id));
                }
                debug!(hash = %h, %to, successor_flag, "forwarding to peer");
                telemetry::hop_forwarded(msg.msg_type());
                effects.push(Effect::Send { to, message: msg });
            }
        }
    }

    fn settle(&mut self, id: u64, effects: &mut Vec<Effect>) {
        if let Some((token, message)) = self.pending.settle(id) {
            effects.push(Effect::Reply { token, message });
        }
    }

    /// Answers a single-topic request owned here. The reply keeps the
    /// request's chain.
    fn serve_local(&mut self, msg: Message, h: RingToken) -> Message {
        match msg {
            Message::Register(req) => {
                let endpoint = req.endpoint();
                for topic in &req.topics {
                    self.table.insert(topic, h, req.role, endpoint.clone());
                }
                info!(me = %self.me, role = %req.role, id = %req.id, topics = ?req.topics, "stored registration");
                Message::RegisterResp(RegisterResp {
                    chain: req.chain,
                    ..RegisterResp::success()
                })
            }
            Message::LookupByTopic(req) => {
                let addresses = req
                    .topics
                    .iter()
                    .flat_map(|t| self.table.publishers(t))
                    .collect();
                Message::LookupResp(LookupResp {
                    addresses,
                    chain: req.chain,
                })
            }
            other => {
                let chain = other.chain().cloned().unwrap_or_default();
                Message::Error(ErrorResp {
                    chain,
                    ..ErrorResp::new(ErrorKind::Protocol, "not a placement request")
                })
            }
        }
    }

    // ---- peer traffic ---------------------------------------------------------

    fn forwarded_request(&mut self, mut msg: Message) -> Vec<Effect> {
        let Some(h) = single_topic(&msg).map(|t| self.hash_topic(t)) else {
            let chain = msg.chain().cloned().unwrap_or_default();
            return self.route_reply(Message::Error(ErrorResp {
                chain,
                ..ErrorResp::new(ErrorKind::Protocol, "forwarded request must name one topic")
            }));
        };
        let route = if successor_flag(&msg) {
            Route::Local
        } else {
            self.route(h)
        };
        match route {
            Route::Local => {
                let reply = self.serve_local(msg, h);
                self.route_reply(reply)
            }
            Route::Forward { to, successor_flag } => {
                set_successor_flag(&mut msg, successor_flag);
                if let Some(chain) = msg.chain_mut() {
                    chain.push(Hop::new(self.me.clone(), RELAY_TOKEN));
                }
                debug!(hash = %h, %to, successor_flag, "relaying to peer");
                telemetry::hop_forwarded(msg.msg_type());
                vec![Effect::Send { to, message: msg }]
            }
        }
    }

    /// Moves a reply one step back along its chain.
    fn route_reply(&mut self, mut reply: Message) -> Vec<Effect> {
        let Some(top) = reply.chain().and_then(|c| c.top()).cloned() else {
            warn!(msg_type = ?reply.msg_type(), "reply without a chain dropped");
            return Vec::new();
        };
        if !top.node.same_node(&self.me) {
            return vec![Effect::Send {
                to: top.node,
                message: reply,
            }];
        }
        let next = match reply.chain_mut() {
            Some(chain) => {
                chain.pop();
                chain.top().map(|h| h.node.clone())
            }
            None => None,
        };
        match next {
            Some(to) => vec![Effect::Send { to, message: reply }],
            None => match self.pending.absorb(top.token, reply) {
                Some((token, message)) => vec![Effect::Reply { token, message }],
                None => {
                    debug!(pending = top.token, "reply for unknown or finished request");
                    Vec::new()
                }
            },
        }
    }

    fn walk_is_ready(&mut self, mut req: IsReadyReq) -> Vec<Effect> {
        let Some(initiator) = req.initiator.clone() else {
            return self.route_reply(walk_error(req.chain, "readiness walk without initiator"));
        };
        self.registrants.tally_into(&mut req);

        if self.successor.same_node(&initiator) || self.me.same_node(&initiator) {
            let ready = self.target.is_met(req.num_pubs, req.num_subs, req.broker_flag);
            debug!(pubs = req.num_pubs, subs = req.num_subs, broker = req.broker_flag, ready, "readiness walk complete");
            return self.route_reply(Message::IsReadyResp(IsReadyResp {
                ready,
                chain: req.chain,
            }));
        }
        req.chain.push(Hop::new(self.me.clone(), RELAY_TOKEN));
        telemetry::hop_forwarded(protocol::MsgType::IsReady);
        vec![Effect::Send {
            to: self.successor.clone(),
            message: Message::IsReady(req),
        }]
    }

    fn walk_lookup_all(&mut self, mut req: LookupAllPubsReq) -> Vec<Effect> {
        let Some(initiator) = req.initiator.clone() else {
            return self.route_reply(walk_error(req.chain, "lookup walk without initiator"));
        };
        req.known_addresses
            .extend(self.table.all_publishers().cloned());
        req.known_addresses
            .extend(self.registrants.publisher_endpoints().cloned());

        if self.successor.same_node(&initiator) || self.me.same_node(&initiator) {
            return self.route_reply(Message::LookupResp(LookupResp {
                addresses: dedup_endpoints(req.known_addresses),
                chain: req.chain,
            }));
        }
        req.chain.push(Hop::new(self.me.clone(), RELAY_TOKEN));
        telemetry::hop_forwarded(protocol::MsgType::LookupAllPubs);
        vec![Effect::Send {
            to: self.successor.clone(),
            message: Message::LookupAllPubs(req),
        }]
    }

    fn walk_exit(&mut self, req: ExitReq) -> Vec<Effect> {
        let Some(origin) = req.origin.clone() else {
            return Vec::new();
        };
        if origin.same_node(&self.me) {
            return Vec::new();
        }
        self.evict(&req);
        if self.successor.same_node(&origin) {
            return Vec::new();
        }
        vec![Effect::Send {
            to: self.successor.clone(),
            message: Message::Exit(req),
        }]
    }

    fn evict(&mut self, req: &ExitReq) {
        self.registrants.forget(req.role, &req.id);
        let touched = self.table.evict(req.role, &req.id);
        if touched > 0 {
            info!(me = %self.me, role = %req.role, id = %req.id, topics = touched, "evicted registrant");
        }
    }

    // ---- joins ----------------------------------------------------------------

    fn place_joiner(&mut self, origin: JoinOrigin, req: RegisterReq) -> Vec<Effect> {
        if req.ring_params != Some(self.params) {
            warn!(joiner = %req.id, theirs = ?req.ring_params, ours = ?self.params, "ring parameter mismatch");
            return self.answer_join(
                origin,
                RegisterResult::Failure(format!(
                    "ring parameter mismatch: ring uses {} bits with {}",
                    self.params.bits, self.params.algorithm
                )),
                None,
                None,
            );
        }
        let candidate = NodeRef::new(req.address, req.port, &*self.partitioner);
        self.locate(origin, candidate)
    }

    fn locate(&mut self, origin: JoinOrigin, candidate: NodeRef) -> Vec<Effect> {
        let h = candidate.hash;
        if h == self.me.hash || h == self.predecessor.hash || h == self.successor.hash {
            warn!(%candidate, "hash collision on join");
            return self.answer_join(
                origin,
                RegisterResult::Failure(format!("hash collision at {h}")),
                None,
                None,
            );
        }

        let mut effects = Vec::new();
        let (pred, succ) = if self.is_alone() {
            self.predecessor = candidate.clone();
            self.successor = candidate.clone();
            effects.extend(self.hand_off_range(&candidate));
            (self.me.clone(), self.me.clone())
        } else if RingRange::new(self.predecessor.hash, self.me.hash).contains_open(h) {
            let old = std::mem::replace(&mut self.predecessor, candidate.clone());
            effects.push(Effect::Send {
                to: old.clone(),
                message: Message::UpdateNeighbor(UpdateNeighbor {
                    which: Neighbor::Successor,
                    node: candidate.clone(),
                }),
            });
            effects.extend(self.hand_off_range(&candidate));
            (old, self.me.clone())
        } else if RingRange::new(self.me.hash, self.successor.hash).contains_open(h) {
            let old = std::mem::replace(&mut self.successor, candidate.clone());
            effects.push(Effect::Send {
                to: old.clone(),
                message: Message::UpdateNeighbor(UpdateNeighbor {
                    which: Neighbor::Predecessor,
                    node: candidate.clone(),
                }),
            });
            (self.me.clone(), old)
        } else {
            let to = self.next_hop(h).clone();
            let request_id = self.pending.open_join(origin);
            debug!(%candidate, %to, "forwarding join placement");
            telemetry::hop_forwarded(protocol::MsgType::LocateNewNode);
            return vec![Effect::Send {
                to,
                message: Message::LocateNewNode(LocateNewNode {
                    candidate,
                    request_id,
                    reply_to: self.me.clone(),
                }),
            }];
        };

        info!(
            me = %self.me,
            joiner = %candidate,
            predecessor = %pred,
            successor = %succ,
            "placed joining node"
        );
        telemetry::ring_join();
        effects.extend(self.answer_join(origin, RegisterResult::Success, Some(pred), Some(succ)));
        effects
    }

    fn answer_join(
        &mut self,
        origin: JoinOrigin,
        result: RegisterResult,
        predecessor: Option<NodeRef>,
        successor: Option<NodeRef>,
    ) -> Vec<Effect> {
        match origin {
            JoinOrigin::Client(token) => vec![Effect::Reply {
                token,
                message: Message::RegisterResp(RegisterResp {
                    result,
                    predecessor,
                    successor,
                    chain: Chain::new(),
                }),
            }],
            JoinOrigin::Peer {
                reply_to,
                request_id,
            } => vec![Effect::Send {
                to: reply_to,
                message: Message::LocateNewNodeResp(LocateNewNodeResp {
                    result,
                    predecessor,
                    successor,
                    request_id,
                }),
            }],
        }
    }

    fn join_answered(&mut self, resp: LocateNewNodeResp) -> Vec<Effect> {
        match self.pending.close_join(resp.request_id) {
            Some(origin) => self.answer_join(origin, resp.result, resp.predecessor, resp.successor),
            None => {
                warn!(request_id = resp.request_id, "join answer for unknown request");
                Vec::new()
            }
        }
    }

    fn update_neighbor(&mut self, update: UpdateNeighbor) -> Vec<Effect> {
        match update.which {
            Neighbor::Successor => {
                info!(me = %self.me, successor = %update.node, "successor changed");
                self.successor = update.node;
                Vec::new()
            }
            Neighbor::Predecessor => {
                info!(me = %self.me, predecessor = %update.node, "predecessor changed");
                self.predecessor = update.node.clone();
                self.hand_off_range(&update.node).into_iter().collect()
            }
        }
    }

    /// Ships topics this node no longer owns to `to`, which now does.
    fn hand_off_range(&mut self, to: &NodeRef) -> Option<Effect> {
        let owned = self.owned_range();
        let records = self.table.split_off(|h| owned.contains(h));
        if records.is_empty() {
            return None;
        }
        info!(me = %self.me, %to, topics = records.len(), "handing off topics");
        Some(Effect::Send {
            to: to.clone(),
            message: Message::TopicTransfer(TopicTransfer { records }),
        })
    }

    fn accept_transfer(&mut self, transfer: TopicTransfer) -> Vec<Effect> {
        info!(me = %self.me, topics = transfer.records.len(), "took over topics");
        for record in transfer.records {
            let h = self.hash_topic(&record.topic);
            self.table.merge(record, h);
        }
        Vec::new()
    }
}

impl DiscoveryBackend for RingNode {
    fn name(&self) -> &'static str {
        "ring"
    }

    fn handle_client(&mut self, token: Token, msg: Message) -> Vec<Effect> {
        telemetry::request(msg.msg_type());
        match msg {
            Message::Register(req) if req.role == Role::RingNode => {
                self.place_joiner(JoinOrigin::Client(token), req)
            }
            Message::Register(req) => self.client_register(token, req),
            Message::LookupByTopic(req) => self.client_lookup(token, req.topics),
            Message::IsReady(_) => self.client_is_ready(token),
            Message::LookupAllPubs(_) => self.client_lookup_all(token),
            Message::Exit(req) => self.client_exit(token, req),
            other => {
                warn!(msg_type = ?other.msg_type(), "unexpected client request");
                vec![Effect::Reply {
                    token,
                    message: Message::error(
                        ErrorKind::Protocol,
                        format!("unexpected request {:?}", other.msg_type()),
                    ),
                }]
            }
        }
    }

    fn handle_peer(&mut self, msg: Message) -> Vec<Effect> {
        match msg {
            Message::Ack => Vec::new(),
            Message::LocateNewNodeResp(resp) => self.join_answered(resp),
            reply if reply.is_reply() => self.route_reply(reply),
            Message::Register(req) if req.role != Role::RingNode => {
                self.forwarded_request(Message::Register(req))
            }
            msg @ Message::LookupByTopic(_) => self.forwarded_request(msg),
            Message::IsReady(req) => self.walk_is_ready(req),
            Message::LookupAllPubs(req) => self.walk_lookup_all(req),
            Message::LocateNewNode(req) => self.locate(
                JoinOrigin::Peer {
                    reply_to: req.reply_to,
                    request_id: req.request_id,
                },
                req.candidate,
            ),
            Message::UpdateNeighbor(update) => self.update_neighbor(update),
            Message::Exit(req) => self.walk_exit(req),
            Message::TopicTransfer(transfer) => self.accept_transfer(transfer),
            other => {
                warn!(msg_type = ?other.msg_type(), "unexpected peer message");
                Vec::new()
            }
        }
    }

    fn handle_undeliverable(&mut self, to: &NodeRef, msg: Message) -> Vec<Effect> {
        telemetry::delivery_failure();
        match msg {
            Message::Register(_)
            | Message::LookupByTopic(_)
            | Message::IsReady(_)
            | Message::LookupAllPubs(_) => {
                error!(%to, msg_type = ?msg.msg_type(), "route exhausted, failing request");
                let chain = msg.chain().cloned().unwrap_or_default();
                self.route_reply(Message::Error(ErrorResp {
                    chain,
                    ..ErrorResp::new(ErrorKind::RoutingFailure, format!("{to} unreachable"))
                }))
            }
            Message::LocateNewNode(req) => {
                error!(%to, candidate = %req.candidate, "join placement unreachable");
                match self.pending.close_join(req.request_id) {
                    Some(origin) => self.answer_join(
                        origin,
                        RegisterResult::Failure(format!("{to} unreachable")),
                        None,
                        None,
                    ),
                    None => Vec::new(),
                }
            }
            other => {
                error!(%to, msg_type = ?other.msg_type(), "peer message lost");
                Vec::new()
            }
        }
    }
}

fn distinct(topics: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    topics
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn single_topic(msg: &Message) -> Option<&str> {
    let topics = match msg {
        Message::Register(req) => &req.topics,
        Message::LookupByTopic(req) => &req.topics,
        _ => return None,
    };
    match topics.as_slice() {
        [topic] => Some(topic.as_str()),
        _ => None,
    }
}

fn successor_flag(msg: &Message) -> bool {
    match msg {
        Message::Register(req) => req.successor_flag,
        Message::LookupByTopic(req) => req.successor_flag,
        _ => false,
    }
}

fn set_successor_flag(msg: &mut Message, flag: bool) {
    match msg {
        Message::Register(req) => req.successor_flag = flag,
        Message::LookupByTopic(req) => req.successor_flag = flag,
        _ => {}
    }
}

fn walk_error(chain: Chain, message: &str) -> Message {
    Message::Error(ErrorResp {
        chain,
        ..ErrorResp::new(ErrorKind::Protocol, message)
    })
}
