//! In-process coordinator.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::failover::coordinator::{child_name, Coordinator, CoordinatorError, SessionId, Version, Versioned, Watch};

#[derive(Debug)]
struct Entry {
    value: String,
    version: Version,
    owner: Option<SessionId>,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    sessions: HashSet<SessionId>,
    next_session: SessionId,
    watchers: HashMap<String, watch::Sender<Option<Versioned>>>,
}

impl State {
    fn current(&self, path: &str) -> Option<Versioned> {
        self.entries.get(path).map(|e| Versioned {
            value: e.value.clone(),
            version: e.version,
        })
    }

    fn notify(&self, path: &str) {
        if let Some(tx) = self.watchers.get(path) {
            tx.send_replace(self.current(path));
        }
    }

    fn insert(&mut self, path: &str, value: &str, owner: Option<SessionId>) -> Result<Version, CoordinatorError> {
        if self.entries.contains_key(path) {
            return Err(CoordinatorError::Exists(path.to_string()));
        }
        self.entries.insert(
            path.to_string(),
            Entry {
                value: value.to_string(),
                version: 0,
                owner,
            },
        );
        self.notify(path);
        Ok(0)
    }
}

/// Coordinator state behind a mutex; every operation is atomic.
///
/// Sessions end only through [`Coordinator::close_session`], which is how
/// tests simulate a process dying.
#[derive(Debug, Default)]
pub struct MemoryCoordinator {
    state: Mutex<State>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn open_session(&self) -> Result<SessionId, CoordinatorError> {
        let mut state = self.state.lock();
        state.next_session += 1;
        let id = state.next_session;
        state.sessions.insert(id);
        Ok(id)
    }

    async fn close_session(&self, session: SessionId) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock();
        if !state.sessions.remove(&session) {
            return Err(CoordinatorError::SessionClosed(session));
        }
        let owned: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            state.entries.remove(&path);
            state.notify(&path);
        }
        debug!(session, "session closed");
        Ok(())
    }

    async fn create(&self, path: &str, value: &str) -> Result<Version, CoordinatorError> {
        self.state.lock().insert(path, value, None)
    }

    async fn create_ephemeral(
        &self,
        session: SessionId,
        path: &str,
        value: &str,
    ) -> Result<Version, CoordinatorError> {
        let mut state = self.state.lock();
        if !state.sessions.contains(&session) {
            return Err(CoordinatorError::SessionClosed(session));
        }
        state.insert(path, value, Some(session))
    }

    async fn get(&self, path: &str) -> Result<Option<Versioned>, CoordinatorError> {
        Ok(self.state.lock().current(path))
    }

    async fn set(&self, path: &str, value: &str, expected: Version) -> Result<Version, CoordinatorError> {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .get_mut(path)
            .ok_or_else(|| CoordinatorError::NoEntry(path.to_string()))?;
        if entry.version != expected {
            return Err(CoordinatorError::BadVersion {
                path: path.to_string(),
                expected,
                actual: entry.version,
            });
        }
        entry.value = value.to_string();
        entry.version += 1;
        let version = entry.version;
        state.notify(path);
        Ok(version)
    }

    async fn children(&self, prefix: &str) -> Result<Vec<String>, CoordinatorError> {
        let state = self.state.lock();
        Ok(state
            .entries
            .keys()
            .filter_map(|path| child_name(prefix, path))
            .map(str::to_string)
            .collect())
    }

    async fn watch(&self, path: &str) -> Result<Watch, CoordinatorError> {
        let mut state = self.state.lock();
        let current = state.current(path);
        let tx = state
            .watchers
            .entry(path.to_string())
            .or_insert_with(|| watch::channel(current).0);
        Ok(tx.subscribe())
    }
}
