//! Discovery backend abstractions.
//!
//! A backend decides how registrations are stored and how requests are
//! answered. Both backends answer the same external request set:
//!
//! - **CentralizedRegistry**: one node holds every registration
//! - **RingNode**: registrations are spread over a hash ring and requests are
//!   forwarded between peers until the owner answers

pub mod centralized;
pub mod ring;

use std::fmt;
use std::str::FromStr;

use corelib::NodeRef;
use protocol::{Message, RegistrySnapshot};

use crate::error::DiscoveryError;

pub use centralized::CentralizedRegistry;
pub use ring::RingNode;

/// Identifies a client request waiting on this node for a reply.
pub type Token = u64;

/// Reserved topic under which the broker registers.
pub const BROKER_TOPIC: &str = "__broker__";

/// Something a backend wants done after handling a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Answer the client waiting under `token`.
    Reply { token: Token, message: Message },
    /// Deliver `message` to a ring peer.
    Send { to: NodeRef, message: Message },
}

/// How subscribers reach publishers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Dissemination {
    /// Subscribers connect straight to publishers.
    #[default]
    Direct,
    /// All traffic goes through one broker.
    Broker,
}

impl fmt::Display for Dissemination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dissemination::Direct => f.write_str("direct"),
            Dissemination::Broker => f.write_str("broker"),
        }
    }
}

impl FromStr for Dissemination {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Dissemination::Direct),
            "broker" | "viabroker" => Ok(Dissemination::Broker),
            other => Err(DiscoveryError::Config(format!("unknown dissemination: {other}"))),
        }
    }
}

/// Expected registrant counts before the system may start.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadinessTarget {
    pub num_pubs: u32,
    pub num_subs: u32,
    pub dissemination: Dissemination,
}

impl ReadinessTarget {
    pub fn new(num_pubs: u32, num_subs: u32, dissemination: Dissemination) -> Self {
        Self {
            num_pubs,
            num_subs,
            dissemination,
        }
    }

    /// Counts at or above the target, plus the broker in broker mode.
    ///
    /// Extra registrants never flip a ready system back to not ready.
    pub fn is_met(&self, pubs: u32, subs: u32, broker_seen: bool) -> bool {
        pubs >= self.num_pubs
            && subs >= self.num_subs
            && (self.dissemination == Dissemination::Direct || broker_seen)
    }
}

/// Trait for discovery backends.
///
/// A backend is a synchronous state machine: it consumes one message and
/// returns the effects the runtime must carry out. It never performs I/O, so
/// the same backend runs unchanged under the TCP runtime and under the
/// in-memory network the tests use.
///
/// # Thread Safety
///
/// Backends are owned by a single event-loop task and never shared, so only
/// `Send` is required.
pub trait DiscoveryBackend: Send + 'static {
    /// Backend name (for logging/debugging).
    fn name(&self) -> &'static str;

    /// A client request. Any reply must carry `token`.
    fn handle_client(&mut self, token: Token, msg: Message) -> Vec<Effect>;

    /// Traffic from another discovery node.
    fn handle_peer(&mut self, msg: Message) -> Vec<Effect>;

    /// `msg` could not be delivered to `to` within the retry policy.
    fn handle_undeliverable(&mut self, to: &NodeRef, msg: Message) -> Vec<Effect>;

    /// Full registry state, for backends that can hand it over.
    fn snapshot(&self) -> Option<RegistrySnapshot> {
        None
    }

    /// Replaces the registry state with `snapshot`.
    fn restore(&mut self, _snapshot: RegistrySnapshot) -> Result<(), DiscoveryError> {
        Err(DiscoveryError::Unsupported("registry restore"))
    }

    /// `address:port` of the registered broker, if any.
    fn broker_address(&self) -> Option<String> {
        None
    }
}
