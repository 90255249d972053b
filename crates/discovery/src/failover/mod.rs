//! Leader election and failover.
//!
//! A group of centralized discovery nodes shares one record in a
//! coordination service naming the leader, the broker and an ordered list of
//! standbys. Only the leader serves; on a clean shutdown it hands its
//! registry to the first standby and rewrites the record, and when it dies
//! the first live standby claims the record itself.
//!
//! - [`Coordinator`]: the coordination primitive (atomic create,
//!   compare-and-set, ephemeral entries, watches)
//! - [`MemoryCoordinator`]: in-process implementation
//! - [`CoordinatorServer`] / [`RemoteCoordinator`]: the same over TCP
//! - [`Election`]: the protocol each discovery node runs

pub mod coordinator;
pub mod election;
pub mod memory;
pub mod record;
pub mod remote;

pub use coordinator::{Coordinator, CoordinatorError, SessionId, Version, Versioned, Watch};
pub use election::{Election, Standing, MEMBERS_PATH, RECORD_PATH};
pub use memory::MemoryCoordinator;
pub use record::LeaderRecord;
pub use remote::{CoordinatorServer, RemoteCoordinator};
