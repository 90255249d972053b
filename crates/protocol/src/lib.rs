//! Wire protocol for the discovery service.
//!
//! This crate provides the envelope and codecs shared by clients and ring
//! nodes:
//! - The discriminated request/response union (`Message`)
//! - Chains of hop identities for multi-hop reply routing
//! - Registry snapshots carried by leader handoff
//! - Length-prefixed frame codec (JSON or bincode payloads)
//! - A request/reply transport over TCP with per-attempt timeout and retry

pub mod chain;
pub mod codec;
pub mod error;
pub mod message;
pub mod snapshot;
pub mod transport;

pub use chain::{Chain, Hop};
pub use codec::{FrameCodec, WireFormat, DEFAULT_MAX_FRAME};
pub use error::{CodecError, TransportError};
pub use message::{
    Endpoint, ErrorKind, ErrorResp, ExitReq, IsReadyReq, IsReadyResp, LeaderHandoff,
    LocateNewNode, LocateNewNodeResp, LookupAllPubsReq, LookupByTopicReq, LookupResp, Message,
    MsgType, Neighbor, RegisterReq, RegisterResp, RegisterResult, RingParams, Role,
    TopicTransfer, UpdateNeighbor,
};
pub use snapshot::{Registration, RegistrySnapshot, TopicRecord};
pub use transport::{request, Connection, RetryPolicy};
