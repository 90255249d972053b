//! The coordination primitive failover is built on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Monotonic per-entry write counter; 0 on create.
pub type Version = u64;

/// A client's liveness scope. Ephemeral entries die with it.
pub type SessionId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    pub value: String,
    pub version: Version,
}

/// Follows one entry; `None` while it does not exist.
pub type Watch = tokio::sync::watch::Receiver<Option<Versioned>>;

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CoordinatorError {
    #[error("{0} already exists")]
    Exists(String),

    #[error("{0} does not exist")]
    NoEntry(String),

    #[error("version conflict on {path}: expected {expected}, found {actual}")]
    BadVersion {
        path: String,
        expected: Version,
        actual: Version,
    },

    #[error("session {0} is not open")]
    SessionClosed(SessionId),

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("coordinator unavailable: {0}")]
    Unavailable(String),
}

/// Trait for coordination services.
///
/// The contract mirrors what failover needs and nothing more: an atomic
/// create that fails if the entry exists, versioned reads and
/// compare-and-set writes, entries tied to a session, listing one level of
/// children, and change notification.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    async fn open_session(&self) -> Result<SessionId, CoordinatorError>;

    /// Ends `session` and removes every ephemeral entry it created.
    async fn close_session(&self, session: SessionId) -> Result<(), CoordinatorError>;

    /// Creates a persistent entry; fails with [`CoordinatorError::Exists`].
    async fn create(&self, path: &str, value: &str) -> Result<Version, CoordinatorError>;

    async fn create_ephemeral(
        &self,
        session: SessionId,
        path: &str,
        value: &str,
    ) -> Result<Version, CoordinatorError>;

    async fn get(&self, path: &str) -> Result<Option<Versioned>, CoordinatorError>;

    /// Writes only if the entry is still at `expected`.
    async fn set(&self, path: &str, value: &str, expected: Version) -> Result<Version, CoordinatorError>;

    /// Names of the entries directly under `prefix`.
    async fn children(&self, prefix: &str) -> Result<Vec<String>, CoordinatorError>;

    async fn watch(&self, path: &str) -> Result<Watch, CoordinatorError>;
}

pub(crate) fn child_name<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?.strip_prefix('/')?;
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}
