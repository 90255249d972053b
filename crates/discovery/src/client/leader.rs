//! Following the failover leader from the client side.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::failover::{Coordinator, CoordinatorError, LeaderRecord, Versioned, RECORD_PATH};

fn leader_of(value: &Option<Versioned>) -> Option<String> {
    value
        .as_ref()
        .and_then(|v| v.value.parse::<LeaderRecord>().ok())
        .map(|record| record.leader)
}

/// The current leader address, kept up to date from the shared record.
///
/// Dropping the watch stops following.
pub struct LeaderWatch {
    leader: watch::Receiver<Option<String>>,
    task: JoinHandle<()>,
}

impl LeaderWatch {
    pub async fn follow(coord: Arc<dyn Coordinator>) -> Result<Self, CoordinatorError> {
        let mut record = coord.watch(RECORD_PATH).await?;
        let initial = leader_of(&record.borrow_and_update());
        let (tx, leader) = watch::channel(initial);
        let task = tokio::spawn(async move {
            // Held so an in-process coordinator outlives the watch.
            let _coord = coord;
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    changed = record.changed() => {
                        if changed.is_err() {
                            tx.send_replace(None);
                            break;
                        }
                        let next = leader_of(&record.borrow_and_update());
                        tx.send_if_modified(|current| {
                            if *current == next {
                                return false;
                            }
                            info!(leader = ?next, "discovery leader changed");
                            *current = next;
                            true
                        });
                    }
                }
            }
            debug!("stopped following leader");
        });
        Ok(Self { leader, task })
    }

    pub fn current(&self) -> Option<String> {
        self.leader.borrow().clone()
    }

    /// Waits up to `within` for a leader other than `stale`.
    pub async fn next_after(&self, stale: Option<&str>, within: Duration) -> Option<String> {
        let mut rx = self.leader.clone();
        let found = tokio::time::timeout(
            within,
            rx.wait_for(|leader| leader.is_some() && leader.as_deref() != stale),
        )
        .await;
        match found {
            Ok(Ok(leader)) => leader.clone(),
            _ => None,
        }
    }
}

impl Drop for LeaderWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}
