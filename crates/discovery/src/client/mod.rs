//! Client-side discovery stub.
//!
//! What a publisher, subscriber or broker links against to talk to the
//! discovery service. A client either targets one fixed node (centralized or
//! any ring member) or follows the failover leader through a
//! [`LeaderWatch`], retrying against the new leader when the old one goes
//! away.

mod leader;
pub mod requests;

use std::time::Duration;

use protocol::{request, Endpoint, ErrorKind, FrameCodec, Message, MsgType, RetryPolicy, Role, TransportError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::failover::CoordinatorError;

pub use leader::LeaderWatch;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("registration rejected: {0}")]
    Rejected(String),

    /// The node answered with an error reply.
    #[error("{kind}: {message}")]
    Server { kind: ErrorKind, message: String },

    #[error("unexpected reply {0:?}")]
    UnexpectedReply(MsgType),

    #[error("no discovery leader known")]
    NoLeader,

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

enum Target {
    Fixed(String),
    Leader(LeaderWatch),
}

pub struct DiscoveryClient {
    target: Target,
    codec: FrameCodec,
    policy: RetryPolicy,
}

impl DiscoveryClient {
    /// A client for the node at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            target: Target::Fixed(addr.into()),
            codec: FrameCodec::default(),
            policy: RetryPolicy::default(),
        }
    }

    /// A client that always talks to the current failover leader.
    pub fn following(leader: LeaderWatch) -> Self {
        Self {
            target: Target::Leader(leader),
            codec: FrameCodec::default(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn register(&self, role: Role, endpoint: &Endpoint, topics: &[String]) -> Result<(), ClientError> {
        let reply = self.call(requests::register(role, endpoint, topics)).await?;
        requests::register_result(reply)?;
        info!(%role, %endpoint, "registered");
        Ok(())
    }

    pub async fn is_ready(&self) -> Result<bool, ClientError> {
        requests::ready_result(self.call(requests::is_ready()).await?)
    }

    /// Polls readiness every `poll` until the system is ready.
    pub async fn wait_until_ready(&self, poll: Duration) -> Result<(), ClientError> {
        loop {
            match self.is_ready().await {
                Ok(true) => return Ok(()),
                Ok(false) => debug!("discovery not ready yet"),
                Err(ClientError::Server { kind, message }) if kind == ErrorKind::RoutingFailure => {
                    warn!(%message, "readiness check failed, retrying");
                }
                Err(err) => return Err(err),
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub async fn lookup_by_topic(&self, topics: &[String]) -> Result<Vec<Endpoint>, ClientError> {
        requests::lookup_result(self.call(requests::lookup_by_topic(topics)).await?)
    }

    pub async fn lookup_all_pubs(&self) -> Result<Vec<Endpoint>, ClientError> {
        requests::lookup_result(self.call(requests::lookup_all_pubs()).await?)
    }

    pub async fn exit(&self, role: Role, endpoint: &Endpoint) -> Result<(), ClientError> {
        requests::ack_result(self.call(requests::exit(role, endpoint)).await?)
    }

    async fn call(&self, msg: Message) -> Result<Message, ClientError> {
        let watch = match &self.target {
            Target::Fixed(addr) => {
                return Ok(request(addr, &msg, self.codec, &self.policy).await?);
            }
            Target::Leader(watch) => watch,
        };

        // One try per leader, plus a bounded number of leader changes.
        let mut leader = watch.current();
        for _ in 0..self.policy.attempts.max(1) {
            let Some(addr) = leader.clone() else {
                leader = watch.next_after(None, self.policy.timeout).await;
                continue;
            };
            let outcome = request::<Message, Message>(&addr, &msg, self.codec, &self.policy).await;
            match outcome {
                Ok(Message::Error(err)) if err.kind == ErrorKind::NotLeader => {
                    // The record may name a node that has not caught up yet.
                    debug!(%addr, "asked a standby");
                    tokio::time::sleep(self.policy.backoff).await;
                    leader = watch.current();
                }
                Ok(reply) => return Ok(reply),
                Err(TransportError::Codec(err)) => return Err(TransportError::Codec(err).into()),
                Err(err) => {
                    warn!(%addr, error = %err, "leader unreachable");
                    leader = watch.next_after(Some(&addr), self.policy.timeout).await;
                }
            }
        }
        Err(ClientError::NoLeader)
    }
}
