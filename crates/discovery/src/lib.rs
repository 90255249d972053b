//! Discovery service for a publish/subscribe system.
//!
//! Publishers, subscribers and an optional broker find each other through a
//! discovery node. Three backends answer the same request set:
//!
//! - **Centralized**: one registry holds every registration
//! - **Ring**: registrations are placed by topic hash on a self-organizing
//!   ring of nodes, and requests are forwarded hop by hop to the owner
//! - **Failover**: the centralized registry behind a leader that hands its
//!   state to a standby through a coordination service
//!
//! Backends are synchronous state machines ([`DiscoveryBackend`]); the
//! [`runtime`] executes the messages they emit.

pub mod backend;
pub mod client;
pub mod error;
pub mod failover;
pub mod orchestrator;
pub mod runtime;
pub mod telemetry;

pub use backend::centralized::CentralizedRegistry;
pub use backend::ring::RingNode;
pub use backend::{DiscoveryBackend, Dissemination, Effect, ReadinessTarget, Token, BROKER_TOPIC};
pub use client::{ClientError, DiscoveryClient, LeaderWatch};
pub use error::{DiscoveryError, Result};
pub use orchestrator::{DiscoveryStrategy, LeaderState, Orchestrator};
pub use runtime::{DiscoveryNode, NodeConfig, NodeHandle};
