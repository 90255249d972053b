//! Requests waiting on replies from the ring.
//!
//! The entry node files every client request it cannot answer locally under
//! a fresh id; that id travels as the token of the first chain hop. A
//! multi-topic request fans out into one sub-request per topic and is
//! answered when the last sub-reply arrives.

use std::collections::HashMap;

use corelib::NodeRef;
use protocol::{Endpoint, ErrorResp, LookupResp, Message, RegisterResp, RegisterResult};

use crate::backend::centralized::dedup_endpoints;
use crate::backend::Token;

/// How sub-replies combine into the client's reply.
#[derive(Debug)]
pub(super) enum Accumulator {
    /// All sub-registrations must succeed.
    Register { failure: Option<String> },
    /// Union of returned addresses.
    Lookup { addresses: Vec<Endpoint> },
    /// One reply, passed through as is.
    Relay,
}

#[derive(Debug)]
pub(super) struct Pending {
    client: Token,
    outstanding: usize,
    acc: Accumulator,
    error: Option<ErrorResp>,
}

impl Pending {
    pub(super) fn new(client: Token, outstanding: usize, acc: Accumulator) -> Self {
        Self {
            client,
            outstanding,
            acc,
            error: None,
        }
    }

    fn absorb(&mut self, reply: Message) -> Option<Message> {
        self.outstanding = self.outstanding.saturating_sub(1);
        match (&mut self.acc, reply) {
            (_, Message::Error(mut err)) => {
                err.chain = Default::default();
                self.error.get_or_insert(err);
            }
            (Accumulator::Register { failure }, Message::RegisterResp(resp)) => {
                if let RegisterResult::Failure(reason) = resp.result {
                    failure.get_or_insert(reason);
                }
            }
            (Accumulator::Lookup { addresses }, Message::LookupResp(resp)) => {
                addresses.extend(resp.addresses);
            }
            (Accumulator::Relay, mut other) => {
                if let Some(chain) = other.chain_mut() {
                    *chain = Default::default();
                }
                return Some(other);
            }
            (_, other) => {
                self.error.get_or_insert(ErrorResp::new(
                    protocol::ErrorKind::Protocol,
                    format!("unexpected sub-reply {:?}", other.msg_type()),
                ));
            }
        }
        (self.outstanding == 0).then(|| self.finish())
    }

    fn finish(&mut self) -> Message {
        if let Some(err) = self.error.take() {
            return Message::Error(err);
        }
        match &mut self.acc {
            Accumulator::Register { failure } => match failure.take() {
                Some(reason) => Message::RegisterResp(RegisterResp::failure(reason)),
                None => Message::RegisterResp(RegisterResp::success()),
            },
            Accumulator::Lookup { addresses } => Message::LookupResp(LookupResp {
                addresses: dedup_endpoints(std::mem::take(addresses)),
                ..Default::default()
            }),
            Accumulator::Relay => Message::error(protocol::ErrorKind::Protocol, "no reply"),
        }
    }
}

/// Where the answer to a join placement must go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum JoinOrigin {
    /// The joiner itself is waiting on this node.
    Client(Token),
    /// The previous hop filed it under `request_id`.
    Peer { reply_to: NodeRef, request_id: u64 },
}

#[derive(Debug, Default)]
pub(super) struct PendingTable {
    next_id: u64,
    requests: HashMap<u64, Pending>,
    joins: HashMap<u64, JoinOrigin>,
}

impl PendingTable {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(super) fn open(&mut self, pending: Pending) -> u64 {
        let id = self.next();
        self.requests.insert(id, pending);
        id
    }

    /// Feeds one sub-reply. Returns the client reply once the request is
    /// complete.
    pub(super) fn absorb(&mut self, id: u64, reply: Message) -> Option<(Token, Message)> {
        let pending = self.requests.get_mut(&id)?;
        let done = pending.absorb(reply)?;
        let client = pending.client;
        self.requests.remove(&id);
        Some((client, done))
    }

    /// Completes `id` right away if nothing was sent out for it.
    pub(super) fn settle(&mut self, id: u64) -> Option<(Token, Message)> {
        if self.requests.get(&id)?.outstanding > 0 {
            return None;
        }
        let mut pending = self.requests.remove(&id)?;
        Some((pending.client, pending.finish()))
    }

    pub(super) fn open_join(&mut self, origin: JoinOrigin) -> u64 {
        let id = self.next();
        self.joins.insert(id, origin);
        id
    }

    pub(super) fn close_join(&mut self, id: u64) -> Option<JoinOrigin> {
        self.joins.remove(&id)
    }

    pub(super) fn len(&self) -> usize {
        self.requests.len() + self.joins.len()
    }
}
