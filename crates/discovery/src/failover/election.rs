//! The election protocol each failover node runs.
//!
//! Every node keeps an ephemeral entry under [`MEMBERS_PATH`] for as long as
//! it lives. The node that creates [`RECORD_PATH`] first leads; the others
//! append themselves to its standby list. Leadership only ever changes by a
//! confirmed create or compare-and-set on the record:
//!
//! - clean shutdown: the leader sends its registry to the first live standby
//!   and rewrites the record to name it
//! - crash: the leader's member entry vanishes and the first live standby
//!   claims the record for itself

use std::collections::HashSet;
use std::sync::Arc;

use protocol::{request, FrameCodec, LeaderHandoff, Message, RetryPolicy};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::failover::coordinator::{Coordinator, CoordinatorError, SessionId, Version, Watch};
use crate::failover::record::LeaderRecord;
use crate::orchestrator::LeaderState;

pub const RECORD_PATH: &str = "/discovery";
pub const MEMBERS_PATH: &str = "/members";

fn member_path(addr: &str) -> String {
    format!("{MEMBERS_PATH}/{addr}")
}

fn watch_lost() -> CoordinatorError {
    CoordinatorError::Unavailable("watch closed".into())
}

/// This node's role plus the standby list it last read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Standing {
    pub state: LeaderState,
    pub standbys: Vec<String>,
    /// Record version this was read at. Every change of leader is a write
    /// to the record, so a leader's first version orders it after all
    /// earlier leaders.
    pub version: Version,
}

impl Standing {
    fn new(state: LeaderState, standbys: Vec<String>, version: Version) -> Self {
        Self {
            state,
            standbys,
            version,
        }
    }
}

/// A node's membership in the failover group.
pub struct Election {
    coord: Arc<dyn Coordinator>,
    me: String,
    session: SessionId,
}

impl Election {
    /// Opens a session and registers `me` (`address:port`) as a live member.
    pub async fn join(coord: Arc<dyn Coordinator>, me: impl Into<String>) -> Result<Self, CoordinatorError> {
        let me = me.into();
        let session = coord.open_session().await?;
        coord.create_ephemeral(session, &member_path(&me), &me).await?;
        info!(%me, session, "joined failover group");
        Ok(Self { coord, me, session })
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub async fn record(&self) -> Result<Option<(LeaderRecord, Version)>, CoordinatorError> {
        match self.coord.get(RECORD_PATH).await? {
            Some(v) => Ok(Some((v.value.parse()?, v.version))),
            None => Ok(None),
        }
    }

    pub async fn live_members(&self) -> Result<HashSet<String>, CoordinatorError> {
        Ok(self.coord.children(MEMBERS_PATH).await?.into_iter().collect())
    }

    /// Brings this node's role in line with the record, claiming or
    /// enlisting as needed.
    pub async fn reconcile(&self) -> Result<Standing, CoordinatorError> {
        self.settle().await.map(|(standing, _)| standing)
    }

    /// Like [`reconcile`](Self::reconcile), also naming the member whose
    /// departure should trigger the next check.
    async fn settle(&self) -> Result<(Standing, Option<String>), CoordinatorError> {
        loop {
            let Some((record, version)) = self.record().await? else {
                let fresh = LeaderRecord::new(self.me.clone());
                match self.coord.create(RECORD_PATH, &fresh.to_string()).await {
                    Ok(created) => {
                        info!(me = %self.me, "elected leader");
                        return Ok((Standing::new(LeaderState::Leader, Vec::new(), created), None));
                    }
                    Err(CoordinatorError::Exists(_)) => continue,
                    Err(err) => return Err(err),
                }
            };
            if record.leader == self.me {
                return Ok((Standing::new(LeaderState::Leader, record.standbys, version), None));
            }

            let live = self.live_members().await?;
            if live.contains(&record.leader) {
                let standing = Standing::new(
                    LeaderState::Standby {
                        leader: Some(record.leader.clone()),
                    },
                    record.standbys.clone(),
                    version,
                );
                if record.standbys.contains(&self.me) {
                    return Ok((standing, Some(record.leader)));
                }
                let mut enlisted = record.clone();
                enlisted.standbys.push(self.me.clone());
                match self.coord.set(RECORD_PATH, &enlisted.to_string(), version).await {
                    Ok(written) => {
                        info!(leader = %record.leader, me = %self.me, "enlisted as standby");
                        let standing = Standing::new(standing.state, enlisted.standbys, written);
                        return Ok((standing, Some(record.leader)));
                    }
                    Err(CoordinatorError::BadVersion { .. }) => continue,
                    Err(err) => return Err(err),
                }
            }

            // The leader is gone. The first live standby takes over; everyone
            // else waits for it.
            if let Some(first) = record.standbys.iter().find(|s| live.contains(*s)) {
                if *first != self.me {
                    debug!(dead = %record.leader, next = %first, "waiting for standby to claim");
                    let standing = Standing::new(
                        LeaderState::Standby { leader: None },
                        record.standbys.clone(),
                        version,
                    );
                    return Ok((standing, Some(first.clone())));
                }
            }
            let claim = LeaderRecord {
                leader: self.me.clone(),
                broker: record.broker.clone(),
                standbys: record
                    .standbys
                    .iter()
                    .filter(|s| **s != self.me && live.contains(*s))
                    .cloned()
                    .collect(),
            };
            match self.coord.set(RECORD_PATH, &claim.to_string(), version).await {
                Ok(claimed) => {
                    warn!(dead = %record.leader, me = %self.me, "leader lost, claimed leadership");
                    return Ok((Standing::new(LeaderState::Leader, claim.standbys, claimed), None));
                }
                Err(CoordinatorError::BadVersion { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Publishes the broker address. Only the leader writes it.
    pub async fn set_broker(&self, broker: &str) -> Result<(), CoordinatorError> {
        loop {
            let Some((mut record, version)) = self.record().await? else {
                return Err(CoordinatorError::NoEntry(RECORD_PATH.to_string()));
            };
            if record.leader != self.me {
                debug!(%broker, "not the leader, broker address not published");
                return Ok(());
            }
            if record.broker.as_deref() == Some(broker) {
                return Ok(());
            }
            record.broker = Some(broker.to_string());
            match self.coord.set(RECORD_PATH, &record.to_string(), version).await {
                Ok(_) => {
                    info!(%broker, "broker address published");
                    return Ok(());
                }
                Err(CoordinatorError::BadVersion { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Passes leadership to the first live standby that accepts `handoff`.
    ///
    /// Returns the new leader, or `None` if no standby could take over (or
    /// this node no longer leads).
    pub async fn hand_off(
        &self,
        handoff: &LeaderHandoff,
        codec: FrameCodec,
        policy: &RetryPolicy,
    ) -> Result<Option<String>, CoordinatorError> {
        let mut refused = HashSet::new();
        loop {
            let Some((record, version)) = self.record().await? else {
                return Ok(None);
            };
            if record.leader != self.me {
                return Ok(None);
            }
            let live = self.live_members().await?;
            let Some(next) = record
                .standbys
                .iter()
                .find(|s| **s != self.me && live.contains(*s) && !refused.contains(*s))
                .cloned()
            else {
                warn!("no live standby to hand off to");
                return Ok(None);
            };

            let msg = Message::LeaderHandoff(handoff.clone());
            match request::<Message, Message>(&next, &msg, codec, policy).await {
                Ok(Message::Ack) => {}
                Ok(other) => {
                    warn!(standby = %next, reply = ?other.msg_type(), "standby refused handoff");
                    refused.insert(next);
                    continue;
                }
                Err(err) => {
                    warn!(standby = %next, error = %err, "standby unreachable");
                    refused.insert(next);
                    continue;
                }
            }

            let updated = LeaderRecord {
                leader: next.clone(),
                broker: handoff.broker_address.clone().or(record.broker),
                standbys: record
                    .standbys
                    .into_iter()
                    .filter(|s| *s != next && *s != self.me)
                    .collect(),
            };
            match self.coord.set(RECORD_PATH, &updated.to_string(), version).await {
                Ok(_) => {
                    info!(new_leader = %next, "leadership handed off");
                    return Ok(Some(next));
                }
                // Someone enlisted meanwhile; the snapshot is resent on retry.
                Err(CoordinatorError::BadVersion { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Leaves the standby list.
    pub async fn resign(&self) -> Result<(), CoordinatorError> {
        loop {
            let Some((mut record, version)) = self.record().await? else {
                return Ok(());
            };
            if !record.standbys.contains(&self.me) {
                return Ok(());
            }
            record.standbys.retain(|s| *s != self.me);
            match self.coord.set(RECORD_PATH, &record.to_string(), version).await {
                Ok(_) => return Ok(()),
                Err(CoordinatorError::BadVersion { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Ends the session; the member entry goes with it.
    pub async fn close(&self) -> Result<(), CoordinatorError> {
        self.coord.close_session(self.session).await
    }

    /// Keeps `standing` current until `brokers` closes or every receiver of
    /// `standing` is gone.
    ///
    /// Re-checks on every record change and whenever the member this node is
    /// waiting on disappears. Broker addresses sent on `brokers` are
    /// published while this node leads. Any coordinator error ends the loop;
    /// the node can no longer take part safely.
    pub async fn follow(
        &self,
        standing: watch::Sender<Standing>,
        mut brokers: mpsc::UnboundedReceiver<String>,
    ) -> Result<(), CoordinatorError> {
        let mut record_watch = self.coord.watch(RECORD_PATH).await?;
        let mut member: Option<(String, Watch)> = None;
        loop {
            let (current, waiting_on) = self.settle().await?;
            standing.send_if_modified(|prev| {
                if *prev == current {
                    return false;
                }
                *prev = current;
                true
            });
            if standing.is_closed() {
                return Ok(());
            }

            if member.as_ref().map(|(addr, _)| addr) != waiting_on.as_ref() {
                member = match waiting_on {
                    Some(addr) => {
                        let w = self.coord.watch(&member_path(&addr)).await?;
                        if w.borrow().is_none() {
                            // Gone before the watch was set.
                            member = None;
                            continue;
                        }
                        Some((addr, w))
                    }
                    None => None,
                };
            }

            tokio::select! {
                changed = record_watch.changed() => changed.map_err(|_| watch_lost())?,
                changed = member_changed(&mut member) => changed?,
                broker = brokers.recv() => match broker {
                    Some(addr) => self.set_broker(&addr).await?,
                    None => return Ok(()),
                },
                _ = standing.closed() => return Ok(()),
            }
        }
    }
}

async fn member_changed(member: &mut Option<(String, Watch)>) -> Result<(), CoordinatorError> {
    match member {
        Some((_, w)) => w.changed().await.map_err(|_| watch_lost()),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failover::MemoryCoordinator;
    use protocol::{Connection, Registration, RegistrySnapshot};
    use tokio::net::TcpListener;

    fn coordinator() -> Arc<dyn Coordinator> {
        Arc::new(MemoryCoordinator::new())
    }

    async fn stored(coord: &Arc<dyn Coordinator>) -> LeaderRecord {
        coord.get(RECORD_PATH).await.unwrap().unwrap().value.parse().unwrap()
    }

    #[tokio::test]
    async fn test_first_creator_leads_others_enlist() {
        let coord = coordinator();
        let a = Election::join(coord.clone(), "a:1").await.unwrap();
        let b = Election::join(coord.clone(), "b:1").await.unwrap();
        let c = Election::join(coord.clone(), "c:1").await.unwrap();

        assert_eq!(a.reconcile().await.unwrap().state, LeaderState::Leader);
        let standby = LeaderState::Standby {
            leader: Some("a:1".into()),
        };
        assert_eq!(b.reconcile().await.unwrap().state, standby);
        assert_eq!(c.reconcile().await.unwrap().state, standby);
        // Enlisting twice is a no-op.
        b.reconcile().await.unwrap();

        let record = stored(&coord).await;
        assert_eq!(record.leader, "a:1");
        assert_eq!(record.standbys, vec!["b:1".to_string(), "c:1".to_string()]);
        assert_eq!(a.reconcile().await.unwrap().standbys, record.standbys);
    }

    #[tokio::test]
    async fn test_only_leader_publishes_broker() {
        let coord = coordinator();
        let a = Election::join(coord.clone(), "a:1").await.unwrap();
        let b = Election::join(coord.clone(), "b:1").await.unwrap();
        a.reconcile().await.unwrap();
        b.reconcile().await.unwrap();

        b.set_broker("10.0.0.9:5560").await.unwrap();
        assert_eq!(stored(&coord).await.broker, None);
        a.set_broker("10.0.0.9:5560").await.unwrap();
        assert_eq!(stored(&coord).await.broker.as_deref(), Some("10.0.0.9:5560"));
    }

    #[tokio::test]
    async fn test_crash_promotes_first_live_standby() {
        let coord = coordinator();
        let a = Election::join(coord.clone(), "a:1").await.unwrap();
        let b = Election::join(coord.clone(), "b:1").await.unwrap();
        let c = Election::join(coord.clone(), "c:1").await.unwrap();
        a.reconcile().await.unwrap();
        b.reconcile().await.unwrap();
        c.reconcile().await.unwrap();
        a.set_broker("10.0.0.9:5560").await.unwrap();

        a.close().await.unwrap();
        // c sees the dead leader first but must leave the claim to b.
        assert_eq!(
            c.reconcile().await.unwrap().state,
            LeaderState::Standby { leader: None }
        );
        assert_eq!(b.reconcile().await.unwrap().state, LeaderState::Leader);
        assert_eq!(
            c.reconcile().await.unwrap().state,
            LeaderState::Standby {
                leader: Some("b:1".into())
            }
        );

        let record = stored(&coord).await;
        assert_eq!(record.leader, "b:1");
        assert_eq!(record.broker.as_deref(), Some("10.0.0.9:5560"));
        assert_eq!(record.standbys, vec!["c:1".to_string()]);
    }

    #[tokio::test]
    async fn test_hand_off_to_live_standby() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let standby_addr = listener.local_addr().unwrap().to_string();
        let received = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(stream, FrameCodec::default());
            let msg: Message = conn.recv().await.unwrap().unwrap();
            conn.send(&Message::Ack).await.unwrap();
            msg
        });

        let coord = coordinator();
        let leader = Election::join(coord.clone(), "a:1").await.unwrap();
        let dead = Election::join(coord.clone(), "dead:1").await.unwrap();
        let standby = Election::join(coord.clone(), standby_addr.clone()).await.unwrap();
        leader.reconcile().await.unwrap();
        dead.reconcile().await.unwrap();
        standby.reconcile().await.unwrap();
        dead.close().await.unwrap();

        let handoff = LeaderHandoff {
            registry_snapshot: RegistrySnapshot {
                publishers: vec![Registration::new(
                    protocol::Role::Publisher,
                    protocol::Endpoint::new("pub1", "10.0.0.1", 7000),
                    vec!["temp".into()],
                )],
                ..Default::default()
            },
            broker_address: Some("10.0.0.9:5560".into()),
            epoch: 1,
        };
        let next = leader
            .hand_off(&handoff, FrameCodec::default(), &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(next.as_deref(), Some(standby_addr.as_str()));
        assert_eq!(received.await.unwrap(), Message::LeaderHandoff(handoff));

        let record = stored(&coord).await;
        assert_eq!(record.leader, standby_addr);
        assert_eq!(record.broker.as_deref(), Some("10.0.0.9:5560"));
        assert_eq!(record.standbys, vec!["dead:1".to_string()]);
        assert_eq!(standby.reconcile().await.unwrap().state, LeaderState::Leader);
    }

    #[tokio::test]
    async fn test_each_new_leader_starts_at_a_later_version() {
        let coord = coordinator();
        let a = Election::join(coord.clone(), "a:1").await.unwrap();
        let b = Election::join(coord.clone(), "b:1").await.unwrap();
        let first = a.reconcile().await.unwrap();
        b.reconcile().await.unwrap();
        let seen_by_a = a.reconcile().await.unwrap();
        assert!(seen_by_a.version > first.version);

        a.close().await.unwrap();
        let promoted = b.reconcile().await.unwrap();
        assert_eq!(promoted.state, LeaderState::Leader);
        assert!(promoted.version > seen_by_a.version);
    }

    #[tokio::test]
    async fn test_resign_leaves_standby_list() {
        let coord = coordinator();
        let a = Election::join(coord.clone(), "a:1").await.unwrap();
        let b = Election::join(coord.clone(), "b:1").await.unwrap();
        a.reconcile().await.unwrap();
        b.reconcile().await.unwrap();
        b.resign().await.unwrap();
        assert!(stored(&coord).await.standbys.is_empty());
    }

    #[tokio::test]
    async fn test_follow_promotes_on_crash() {
        let coord = coordinator();
        let a = Election::join(coord.clone(), "a:1").await.unwrap();
        let b = Election::join(coord.clone(), "b:1").await.unwrap();
        a.reconcile().await.unwrap();
        let initial = b.reconcile().await.unwrap();

        let (tx, mut rx) = watch::channel(initial);
        let (_brokers_tx, brokers_rx) = mpsc::unbounded_channel();
        let follower = tokio::spawn(async move { b.follow(tx, brokers_rx).await });

        a.close().await.unwrap();
        let promoted = rx
            .wait_for(|s| s.state == LeaderState::Leader)
            .await
            .map(|s| s.clone())
            .unwrap();
        assert!(promoted.standbys.is_empty());
        drop(rx);
        follower.await.unwrap().unwrap();
    }
}
