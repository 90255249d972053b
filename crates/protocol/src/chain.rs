//! Hop chains for multi-hop reply routing.
//!
//! Ring forwarding is one-way per hop, so a reply cannot unwind a call
//! stack. Instead every forwarding node pushes its own hop before passing a
//! request on, and the reply pops exactly one hop per step on the way back.
//! The first hop is the node the client is waiting on; its token names the
//! pending request there.

use corelib::NodeRef;
use serde::{Deserialize, Serialize};

/// One forwarding step: who forwarded, and the token they filed it under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub node: NodeRef,
    pub token: u64,
}

impl Hop {
    pub fn new(node: NodeRef, token: u64) -> Self {
        Self { node, token }
    }
}

/// Ordered stack of hops; `len()` equals the number of forwards taken.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain(Vec<Hop>);

impl Chain {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, hop: Hop) {
        self.0.push(hop);
    }

    pub fn pop(&mut self) -> Option<Hop> {
        self.0.pop()
    }

    /// The most recent forwarder; the next reply goes here.
    pub fn top(&self) -> Option<&Hop> {
        self.0.last()
    }

    /// The node holding the waiting client.
    pub fn origin(&self) -> Option<&Hop> {
        self.0.first()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hops(&self) -> &[Hop] {
        &self.0
    }
}
