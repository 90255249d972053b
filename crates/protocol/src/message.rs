//! Protocol message definitions.
//!
//! A single envelope carries every request and reply exchanged between
//! clients and discovery nodes, and between ring peers. `Message` is a closed
//! enum; the variant is the `msg_type` discriminant on the wire.

use std::fmt;

use corelib::{HashAlgorithm, NodeRef};
use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::snapshot::{RegistrySnapshot, TopicRecord};

/// What a registrant is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Publisher,
    Subscriber,
    Broker,
    RingNode,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Publisher => "publisher",
            Role::Subscriber => "subscriber",
            Role::Broker => "broker",
            Role::RingNode => "ring-node",
        };
        f.write_str(name)
    }
}

/// A registrant's advertised endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
        }
    }

    /// `address:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}:{}", self.id, self.address, self.port)
    }
}

/// Hash parameters a joining ring node must share with the ring.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingParams {
    pub bits: u8,
    pub algorithm: HashAlgorithm,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterResult {
    Success,
    Failure(String),
}

impl RegisterResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RegisterResult::Success)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Neighbor {
    Predecessor,
    Successor,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterReq {
    pub role: Role,
    pub id: String,
    pub address: String,
    pub port: u16,
    pub topics: Vec<String>,
    /// Set by the hop that knows the receiver owns the topic.
    pub successor_flag: bool,
    pub chain: Chain,
    /// Present on `RingNode` registrations only.
    #[serde(default)]
    pub ring_params: Option<RingParams>,
}

impl RegisterReq {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.id.clone(), self.address.clone(), self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResp {
    pub result: RegisterResult,
    /// Filled in for `RingNode` registrations: the joiner's new neighbors.
    pub predecessor: Option<NodeRef>,
    pub successor: Option<NodeRef>,
    pub chain: Chain,
}

impl RegisterResp {
    pub fn success() -> Self {
        Self {
            result: RegisterResult::Success,
            predecessor: None,
            successor: None,
            chain: Chain::new(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            result: RegisterResult::Failure(reason.into()),
            predecessor: None,
            successor: None,
            chain: Chain::new(),
        }
    }
}

/// Readiness check. Clients send it with zeroed tallies and no initiator;
/// the ring fills those in as it walks.
///
/// The walk carries the registrant ids seen so far, so a registrant that
/// entered through several nodes is counted once; `num_pubs` and `num_subs`
/// are the sizes of those sets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsReadyReq {
    pub num_pubs: u32,
    pub num_subs: u32,
    pub broker_flag: bool,
    pub initiator: Option<NodeRef>,
    pub chain: Chain,
    #[serde(default)]
    pub publisher_ids: Vec<String>,
    #[serde(default)]
    pub subscriber_ids: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsReadyResp {
    pub ready: bool,
    pub chain: Chain,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupByTopicReq {
    pub topics: Vec<String>,
    pub successor_flag: bool,
    pub chain: Chain,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupAllPubsReq {
    /// Accumulator filled in hop by hop.
    pub known_addresses: Vec<Endpoint>,
    pub initiator: Option<NodeRef>,
    pub chain: Chain,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResp {
    pub addresses: Vec<Endpoint>,
    pub chain: Chain,
}

/// Join placement request, forwarded hop by hop until a node adjacent to the
/// candidate is found. `reply_to` and `request_id` name the pending entry at
/// the previous hop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocateNewNode {
    pub candidate: NodeRef,
    pub request_id: u64,
    pub reply_to: NodeRef,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocateNewNodeResp {
    pub result: RegisterResult,
    pub predecessor: Option<NodeRef>,
    pub successor: Option<NodeRef>,
    pub request_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNeighbor {
    pub which: Neighbor,
    pub node: NodeRef,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitReq {
    pub role: Role,
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub port: u16,
    /// Set once the exit starts walking the ring.
    #[serde(default)]
    pub origin: Option<NodeRef>,
}

/// Topic entries handed to a node that took over part of the sender's range.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicTransfer {
    pub records: Vec<TopicRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderHandoff {
    pub registry_snapshot: RegistrySnapshot,
    pub broker_address: Option<String>,
    /// The sender's leadership term. Receivers drop snapshots from a term
    /// older than one they already adopted.
    #[serde(default)]
    pub epoch: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or unexpected message.
    Protocol,
    /// A ring hop could not reach its neighbor.
    RoutingFailure,
    /// Sent to a standby; the message names the leader.
    NotLeader,
    /// The operation did not complete in time.
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Protocol => "protocol error",
            ErrorKind::RoutingFailure => "routing failure",
            ErrorKind::NotLeader => "not leader",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResp {
    pub kind: ErrorKind,
    pub message: String,
    pub chain: Chain,
}

impl ErrorResp {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            chain: Chain::new(),
        }
    }
}

/// Discriminant of a [`Message`].
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MsgType {
    Register = 1,
    RegisterResp,
    IsReady,
    IsReadyResp,
    LookupByTopic,
    LookupAllPubs,
    LookupResp,
    LocateNewNode,
    LocateNewNodeResp,
    UpdateNeighbor,
    Exit,
    TopicTransfer,
    LeaderHandoff,
    Ack,
    Error,
}

/// The envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Register(RegisterReq),
    RegisterResp(RegisterResp),
    IsReady(IsReadyReq),
    IsReadyResp(IsReadyResp),
    LookupByTopic(LookupByTopicReq),
    LookupAllPubs(LookupAllPubsReq),
    LookupResp(LookupResp),
    LocateNewNode(LocateNewNode),
    LocateNewNodeResp(LocateNewNodeResp),
    UpdateNeighbor(UpdateNeighbor),
    Exit(ExitReq),
    TopicTransfer(TopicTransfer),
    LeaderHandoff(LeaderHandoff),
    /// Receipt for one-way peer traffic.
    Ack,
    Error(ErrorResp),
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Register(_) => MsgType::Register,
            Message::RegisterResp(_) => MsgType::RegisterResp,
            Message::IsReady(_) => MsgType::IsReady,
            Message::IsReadyResp(_) => MsgType::IsReadyResp,
            Message::LookupByTopic(_) => MsgType::LookupByTopic,
            Message::LookupAllPubs(_) => MsgType::LookupAllPubs,
            Message::LookupResp(_) => MsgType::LookupResp,
            Message::LocateNewNode(_) => MsgType::LocateNewNode,
            Message::LocateNewNodeResp(_) => MsgType::LocateNewNodeResp,
            Message::UpdateNeighbor(_) => MsgType::UpdateNeighbor,
            Message::Exit(_) => MsgType::Exit,
            Message::TopicTransfer(_) => MsgType::TopicTransfer,
            Message::LeaderHandoff(_) => MsgType::LeaderHandoff,
            Message::Ack => MsgType::Ack,
            Message::Error(_) => MsgType::Error,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Message::Error(ErrorResp::new(kind, message))
    }

    /// The hop chain, for message kinds that carry one.
    pub fn chain(&self) -> Option<&Chain> {
        match self {
            Message::Register(m) => Some(&m.chain),
            Message::RegisterResp(m) => Some(&m.chain),
            Message::IsReady(m) => Some(&m.chain),
            Message::IsReadyResp(m) => Some(&m.chain),
            Message::LookupByTopic(m) => Some(&m.chain),
            Message::LookupAllPubs(m) => Some(&m.chain),
            Message::LookupResp(m) => Some(&m.chain),
            Message::Error(m) => Some(&m.chain),
            _ => None,
        }
    }

    pub fn chain_mut(&mut self) -> Option<&mut Chain> {
        match self {
            Message::Register(m) => Some(&mut m.chain),
            Message::RegisterResp(m) => Some(&mut m.chain),
            Message::IsReady(m) => Some(&mut m.chain),
            Message::IsReadyResp(m) => Some(&mut m.chain),
            Message::LookupByTopic(m) => Some(&mut m.chain),
            Message::LookupAllPubs(m) => Some(&mut m.chain),
            Message::LookupResp(m) => Some(&mut m.chain),
            Message::Error(m) => Some(&mut m.chain),
            _ => None,
        }
    }

    /// Replies travel back along a chain; requests travel forward.
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            Message::RegisterResp(_)
                | Message::IsReadyResp(_)
                | Message::LookupResp(_)
                | Message::LocateNewNodeResp(_)
                | Message::Ack
                | Message::Error(_)
        )
    }

    /// True for node-to-node traffic, which the receiver acknowledges at once
    /// instead of holding the connection for a reply.
    pub fn is_peer_traffic(&self) -> bool {
        match self {
            Message::LocateNewNode(_)
            | Message::LocateNewNodeResp(_)
            | Message::UpdateNeighbor(_)
            | Message::TopicTransfer(_)
            | Message::LeaderHandoff(_)
            | Message::Ack => true,
            Message::Exit(m) => m.origin.is_some(),
            other => other.chain().is_some_and(|c| !c.is_empty()),
        }
    }
}
