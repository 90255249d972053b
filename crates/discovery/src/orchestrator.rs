//! Backend selection and leadership gating.
//!
//! The orchestrator is the only component that knows more than one backend
//! exists. It picks one at startup and passes every inbound message to it.
//! In failover mode it also holds this node's leadership state: a standby
//! turns client requests away with `NotLeader` and adopts the registry a
//! departing leader hands it. Snapshots reaching a node that already leads,
//! or carrying an older term than one already adopted, are dropped.

use std::fmt;
use std::str::FromStr;

use corelib::NodeRef;
use protocol::{ErrorKind, LeaderHandoff, Message, RegistrySnapshot};
use tracing::{info, warn};

use crate::backend::{DiscoveryBackend, Effect, Token};
use crate::error::DiscoveryError;

/// Which backend serves requests.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DiscoveryStrategy {
    #[default]
    Centralized,
    Distributed,
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryStrategy::Centralized => f.write_str("centralized"),
            DiscoveryStrategy::Distributed => f.write_str("distributed"),
        }
    }
}

impl FromStr for DiscoveryStrategy {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "centralized" | "central" => Ok(DiscoveryStrategy::Centralized),
            "distributed" | "ring" | "dht" => Ok(DiscoveryStrategy::Distributed),
            other => Err(DiscoveryError::Config(format!("unknown discovery strategy: {other}"))),
        }
    }
}

/// Leadership as seen by one failover participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaderState {
    /// Not running under failover; always serve.
    Solo,
    Leader,
    Standby { leader: Option<String> },
}

pub struct Orchestrator {
    strategy: DiscoveryStrategy,
    backend: Box<dyn DiscoveryBackend>,
    leadership: LeaderState,
    adopted_epoch: Option<u64>,
}

impl Orchestrator {
    pub fn new(strategy: DiscoveryStrategy, backend: Box<dyn DiscoveryBackend>) -> Self {
        info!(%strategy, backend = backend.name(), "discovery backend selected");
        Self {
            strategy,
            backend,
            leadership: LeaderState::Solo,
            adopted_epoch: None,
        }
    }

    pub fn strategy(&self) -> DiscoveryStrategy {
        self.strategy
    }

    pub fn backend(&self) -> &dyn DiscoveryBackend {
        self.backend.as_ref()
    }

    pub fn leadership(&self) -> &LeaderState {
        &self.leadership
    }

    pub fn set_leadership(&mut self, state: LeaderState) {
        if state != self.leadership {
            info!(from = ?self.leadership, to = ?state, "leadership changed");
            if state == LeaderState::Leader {
                crate::telemetry::leader_change();
            }
            self.leadership = state;
        }
    }

    pub fn handle_client(&mut self, token: Token, msg: Message) -> Vec<Effect> {
        if let LeaderState::Standby { leader } = &self.leadership {
            let message = match leader {
                Some(addr) => format!("not the leader; leader is {addr}"),
                None => "not the leader; no leader known".to_string(),
            };
            return vec![Effect::Reply {
                token,
                message: Message::error(ErrorKind::NotLeader, message),
            }];
        }
        self.backend.handle_client(token, msg)
    }

    pub fn handle_peer(&mut self, msg: Message) -> Vec<Effect> {
        match msg {
            Message::LeaderHandoff(handoff) => {
                self.accept_handoff(handoff);
                Vec::new()
            }
            other => self.backend.handle_peer(other),
        }
    }

    pub fn handle_undeliverable(&mut self, to: &NodeRef, msg: Message) -> Vec<Effect> {
        self.backend.handle_undeliverable(to, msg)
    }

    /// Registry state plus broker address, for handing to a successor.
    /// `epoch` is this node's leadership term.
    pub fn handoff(&self, epoch: u64) -> Option<LeaderHandoff> {
        let registry_snapshot = self.backend.snapshot()?;
        Some(LeaderHandoff {
            registry_snapshot,
            broker_address: self.backend.broker_address(),
            epoch,
        })
    }

    pub fn broker_address(&self) -> Option<String> {
        self.backend.broker_address()
    }

    fn accept_handoff(&mut self, handoff: LeaderHandoff) {
        let LeaderHandoff {
            registry_snapshot,
            broker_address,
            epoch,
        } = handoff;
        if self.leadership == LeaderState::Leader {
            warn!(epoch, "ignoring registry snapshot while leading");
            return;
        }
        if let Some(adopted) = self.adopted_epoch.filter(|adopted| epoch < *adopted) {
            warn!(epoch, adopted, "ignoring registry snapshot from an earlier term");
            return;
        }
        let registrants = registry_snapshot.len();
        match self.backend.restore(registry_snapshot) {
            Ok(()) => {
                self.adopted_epoch = Some(epoch);
                info!(registrants, epoch, broker = ?broker_address, "adopted registry from leader");
            }
            Err(err) => warn!(error = %err, "cannot adopt handed-off registry"),
        }
    }

    /// Replaces the registry outright.
    pub fn restore(&mut self, snapshot: RegistrySnapshot) -> Result<(), DiscoveryError> {
        self.backend.restore(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CentralizedRegistry, Dissemination, ReadinessTarget};
    use protocol::{Endpoint, IsReadyReq, Registration, Role};

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            DiscoveryStrategy::Centralized,
            Box::new(CentralizedRegistry::new(ReadinessTarget::new(1, 0, Dissemination::Direct))),
        )
    }

    #[test]
    fn test_standby_refuses_clients() {
        let mut orch = orchestrator();
        orch.set_leadership(LeaderState::Standby {
            leader: Some("10.0.0.5:5555".into()),
        });
        let effects = orch.handle_client(1, Message::IsReady(IsReadyReq::default()));
        match &effects[0] {
            Effect::Reply {
                message: Message::Error(err),
                ..
            } => {
                assert_eq!(err.kind, ErrorKind::NotLeader);
                assert!(err.message.contains("10.0.0.5:5555"));
            }
            other => panic!("unexpected {other:?}"),
        }

        orch.set_leadership(LeaderState::Leader);
        let effects = orch.handle_client(2, Message::IsReady(IsReadyReq::default()));
        assert!(matches!(
            &effects[0],
            Effect::Reply { message: Message::IsReadyResp(_), .. }
        ));
    }

    #[test]
    fn test_handoff_is_adopted() {
        let mut leader = orchestrator();
        leader.handle_client(
            1,
            Message::Register(protocol::RegisterReq {
                role: Role::Publisher,
                id: "pub1".into(),
                address: "10.0.0.1".into(),
                port: 7000,
                topics: vec!["temp".into()],
                successor_flag: false,
                chain: Default::default(),
                ring_params: None,
            }),
        );
        let handoff = leader.handoff(3).unwrap();

        let mut standby = orchestrator();
        standby.handle_peer(Message::LeaderHandoff(handoff.clone()));
        assert_eq!(standby.handoff(3).unwrap(), handoff);
        assert_eq!(
            handoff.registry_snapshot.publishers,
            vec![Registration::new(
                Role::Publisher,
                Endpoint::new("pub1", "10.0.0.1", 7000),
                vec!["temp".into()]
            )]
        );
    }

    fn publisher(id: &str, port: u16) -> Message {
        Message::Register(protocol::RegisterReq {
            role: Role::Publisher,
            id: id.into(),
            address: "10.0.0.1".into(),
            port,
            topics: vec!["temp".into()],
            successor_flag: false,
            chain: Default::default(),
            ring_params: None,
        })
    }

    fn publisher_ids(orch: &Orchestrator) -> Vec<String> {
        orch.handoff(0)
            .unwrap()
            .registry_snapshot
            .publishers
            .into_iter()
            .map(|r| r.endpoint.id)
            .collect()
    }

    #[test]
    fn test_leader_ignores_late_snapshot() {
        let mut old = orchestrator();
        old.handle_client(1, publisher("pub1", 7000));
        let late = old.handoff(1).unwrap();

        let mut promoted = orchestrator();
        promoted.set_leadership(LeaderState::Leader);
        promoted.handle_client(1, publisher("pub2", 7001));
        promoted.handle_peer(Message::LeaderHandoff(late));
        assert_eq!(publisher_ids(&promoted), vec!["pub2".to_string()]);
    }

    #[test]
    fn test_standby_drops_snapshot_from_earlier_term() {
        let mut first = orchestrator();
        first.handle_client(1, publisher("pub1", 7000));
        let stale = first.handoff(1).unwrap();

        let mut second = orchestrator();
        second.handle_client(1, publisher("pub2", 7001));
        let current = second.handoff(4).unwrap();

        let mut standby = orchestrator();
        standby.set_leadership(LeaderState::Standby {
            leader: Some("10.0.0.5:5555".into()),
        });
        standby.handle_peer(Message::LeaderHandoff(current));
        standby.handle_peer(Message::LeaderHandoff(stale));
        assert_eq!(publisher_ids(&standby), vec!["pub2".to_string()]);

        // Later snapshots in the same term still apply.
        second.handle_client(2, publisher("pub3", 7002));
        standby.handle_peer(Message::LeaderHandoff(second.handoff(4).unwrap()));
        assert_eq!(publisher_ids(&standby), vec!["pub2".to_string(), "pub3".to_string()]);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "Distributed".parse::<DiscoveryStrategy>().unwrap(),
            DiscoveryStrategy::Distributed
        );
        assert!("gossip".parse::<DiscoveryStrategy>().is_err());
    }
}
