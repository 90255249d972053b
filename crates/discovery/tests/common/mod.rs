//! Shared fixtures: a partitioner with pinned positions and an in-memory
//! network that drives ring nodes without sockets.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use corelib::partitioner::{Blake3Partitioner, HashAlgorithm, Partitioner};
use corelib::token::{HashSpace, RingToken};
use corelib::NodeRef;
use discovery::{DiscoveryBackend, Effect, ReadinessTarget, RingNode, Token};
use protocol::{Endpoint, Message, MsgType, RegisterReq, Role};

pub const ADDRESS: &str = "127.0.0.1";

/// Port a test node at ring position `hash` listens on.
pub fn port_for(hash: u64) -> u16 {
    6000 + hash as u16
}

pub fn endpoint_for(hash: u64) -> String {
    format!("{ADDRESS}:{}", port_for(hash))
}

/// Places listed keys at fixed positions; everything else hashes normally.
pub struct FixedPartitioner {
    space: HashSpace,
    fixed: HashMap<String, u64>,
    fallback: Blake3Partitioner,
}

impl FixedPartitioner {
    /// An 8-bit space with nodes at `nodes` and topics at `topics`.
    pub fn new(nodes: &[u64], topics: &[(&str, u64)]) -> Arc<Self> {
        let space = HashSpace::new(8).unwrap();
        let mut fixed: HashMap<String, u64> = nodes.iter().map(|h| (endpoint_for(*h), *h)).collect();
        fixed.extend(topics.iter().map(|(t, h)| (t.to_string(), *h)));
        Arc::new(Self {
            space,
            fixed,
            fallback: Blake3Partitioner::new(space),
        })
    }
}

impl Partitioner for FixedPartitioner {
    fn partition(&self, key: &[u8]) -> RingToken {
        let pinned = std::str::from_utf8(key).ok().and_then(|k| self.fixed.get(k));
        match pinned {
            Some(h) => RingToken(*h),
            None => self.fallback.partition(key),
        }
    }

    fn space(&self) -> HashSpace {
        self.space
    }

    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Blake3
    }

    fn name(&self) -> &'static str {
        "FixedPartitioner"
    }
}

/// Ring nodes wired together through a message queue.
pub struct SimNet {
    partitioner: Arc<dyn Partitioner>,
    target: ReadinessTarget,
    nodes: BTreeMap<String, RingNode>,
    in_flight: VecDeque<(String, NodeRef, Message)>,
    replies: HashMap<(String, Token), Message>,
    down: HashSet<String>,
    trace: Vec<(String, MsgType)>,
    next_token: Token,
}

impl SimNet {
    pub fn new(partitioner: Arc<dyn Partitioner>, target: ReadinessTarget) -> Self {
        Self {
            partitioner,
            target,
            nodes: BTreeMap::new(),
            in_flight: VecDeque::new(),
            replies: HashMap::new(),
            down: HashSet::new(),
            trace: Vec::new(),
            next_token: 0,
        }
    }

    /// A ring with members at `hashes`, each joining through the first.
    pub fn ring(hashes: &[u64], topics: &[(&str, u64)], target: ReadinessTarget) -> Self {
        let mut net = Self::new(FixedPartitioner::new(hashes, topics), target);
        let first = net.start(hashes[0]);
        for h in &hashes[1..] {
            net.join(*h, &first);
        }
        net.take_trace();
        net
    }

    /// Starts a ring of one at `hash`.
    pub fn start(&mut self, hash: u64) -> String {
        self.start_port(port_for(hash))
    }

    pub fn start_port(&mut self, port: u16) -> String {
        let node = self.make(port);
        let ep = node.identity().endpoint();
        self.nodes.insert(ep.clone(), node);
        ep
    }

    fn make(&self, port: u16) -> RingNode {
        RingNode::with_partitioner(ADDRESS, port, self.partitioner.clone(), self.target)
    }

    /// Joins a new node at `hash` through `via`; returns the contact's answer.
    pub fn join(&mut self, hash: u64, via: &str) -> Message {
        self.join_port(port_for(hash), via)
    }

    /// Joins the node listening on `port`, wherever it hashes to.
    pub fn join_port(&mut self, port: u16, via: &str) -> Message {
        let joiner = self.make(port);
        let request = joiner.join_request();
        let ep = joiner.identity().endpoint();
        self.nodes.insert(ep.clone(), joiner);
        let reply = self.request(via, request);
        let joined = self.nodes.get_mut(&ep).unwrap().complete_join(reply.clone());
        if joined.is_err() {
            self.nodes.remove(&ep);
        }
        reply
    }

    /// Sends a client request to `at` and runs the network until quiet.
    pub fn request(&mut self, at: &str, msg: Message) -> Message {
        self.next_token += 1;
        let token = self.next_token;
        let effects = self.nodes.get_mut(at).unwrap().handle_client(token, msg);
        self.apply(at, effects);
        self.run();
        self.replies
            .remove(&(at.to_string(), token))
            .unwrap_or_else(|| panic!("no reply at {at} for token {token}"))
    }

    fn apply(&mut self, from: &str, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Reply { token, message } => {
                    let previous = self.replies.insert((from.to_string(), token), message);
                    assert!(previous.is_none(), "two replies for token {token} at {from}");
                }
                Effect::Send { to, message } => {
                    self.in_flight.push_back((from.to_string(), to, message));
                }
            }
        }
    }

    pub fn run(&mut self) {
        let mut delivered = 0;
        while let Some((from, to, msg)) = self.in_flight.pop_front() {
            delivered += 1;
            assert!(delivered < 10_000, "message storm");
            let dest = to.endpoint();
            if self.down.contains(&dest) || !self.nodes.contains_key(&dest) {
                let effects = self.nodes.get_mut(&from).unwrap().handle_undeliverable(&to, msg);
                self.apply(&from, effects);
                continue;
            }
            self.trace.push((dest.clone(), msg.msg_type()));
            let effects = self.nodes.get_mut(&dest).unwrap().handle_peer(msg);
            self.apply(&dest, effects);
        }
    }

    pub fn set_down(&mut self, hash: u64) {
        self.down.insert(endpoint_for(hash));
    }

    pub fn node(&self, hash: u64) -> &RingNode {
        &self.nodes[&endpoint_for(hash)]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RingNode> {
        self.nodes.values()
    }

    /// Positions of nodes whose table holds `topic`.
    pub fn holders(&self, topic: &str) -> Vec<u64> {
        self.nodes
            .values()
            .filter(|n| n.table().get(topic).is_some())
            .map(|n| n.identity().hash.value())
            .collect()
    }

    /// Peer deliveries since the last call, as `(receiver, kind)`.
    pub fn take_trace(&mut self) -> Vec<(String, MsgType)> {
        std::mem::take(&mut self.trace)
    }
}

pub fn endpoint(id: &str, port: u16) -> Endpoint {
    Endpoint::new(id, "10.0.0.1", port)
}

pub fn register(role: Role, id: &str, port: u16, topics: &[&str]) -> Message {
    Message::Register(RegisterReq {
        role,
        id: id.into(),
        address: "10.0.0.1".into(),
        port,
        topics: topics.iter().map(|t| t.to_string()).collect(),
        successor_flag: false,
        chain: Default::default(),
        ring_params: None,
    })
}
