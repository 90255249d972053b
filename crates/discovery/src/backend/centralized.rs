//! Centralized registry backend.
//!
//! A single node holds every registration. No hashing, no forwarding, no
//! chains: each request is answered from local state in one step. Besides
//! serving small deployments this is the reference the ring is checked
//! against, and the state a failover leader hands to its successor.
//!
//! # Semantics
//!
//! - Re-registering an id overwrites the earlier record in place
//! - Readiness holds once the expected counts are reached (and the broker is
//!   present in broker mode)
//! - Lookup by topic returns publishers whose topic set intersects the
//!   request, or the broker in broker mode
//! - Lookup results are deduplicated by address

use corelib::NodeRef;
use protocol::{
    Endpoint, ErrorKind, ExitReq, IsReadyResp, LookupResp, Message, Registration,
    RegistrySnapshot, RegisterReq, RegisterResp, Role,
};
use tracing::{debug, info, warn};

use crate::backend::{DiscoveryBackend, Dissemination, Effect, ReadinessTarget, Token};
use crate::error::DiscoveryError;
use crate::telemetry;

/// Flat registry: publisher list, subscriber list, broker slot.
#[derive(Debug, Clone, Default)]
pub struct CentralizedRegistry {
    publishers: Vec<Registration>,
    subscribers: Vec<Registration>,
    broker: Option<Registration>,
    target: ReadinessTarget,
}

impl CentralizedRegistry {
    pub fn new(target: ReadinessTarget) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    pub fn target(&self) -> ReadinessTarget {
        self.target
    }

    /// Stores `reg`, replacing any earlier record with the same role and id.
    pub fn register(&mut self, reg: Registration) -> Result<(), String> {
        let list = match reg.role {
            Role::Publisher => &mut self.publishers,
            Role::Subscriber => &mut self.subscribers,
            Role::Broker => {
                info!(broker = %reg.endpoint, "broker registered");
                self.broker = Some(reg);
                return Ok(());
            }
            Role::RingNode => return Err("centralized discovery does not accept ring nodes".into()),
        };
        info!(role = %reg.role, registrant = %reg.endpoint, topics = ?reg.topics, "registered");
        match list.iter_mut().find(|r| r.endpoint.id == reg.endpoint.id) {
            Some(existing) => *existing = reg,
            None => list.push(reg),
        }
        Ok(())
    }

    /// Removes a registrant. Returns whether anything was removed.
    pub fn exit(&mut self, role: Role, id: &str) -> bool {
        let removed = match role {
            Role::Publisher => remove_by_id(&mut self.publishers, id),
            Role::Subscriber => remove_by_id(&mut self.subscribers, id),
            Role::Broker => {
                let hit = self.broker.as_ref().is_some_and(|b| b.endpoint.id == id);
                if hit {
                    self.broker = None;
                }
                hit
            }
            Role::RingNode => false,
        };
        if removed {
            info!(%role, id, "registrant left");
        }
        removed
    }

    pub fn is_ready(&self) -> bool {
        self.target.is_met(
            self.publishers.len() as u32,
            self.subscribers.len() as u32,
            self.broker.is_some(),
        )
    }

    /// Publishers of any of `topics`, or the broker in broker mode.
    pub fn lookup_by_topic(&self, topics: &[String]) -> Vec<Endpoint> {
        if self.target.dissemination == Dissemination::Broker {
            return self.broker.iter().map(|b| b.endpoint.clone()).collect();
        }
        dedup_endpoints(
            self.publishers
                .iter()
                .filter(|p| topics.iter().any(|t| p.publishes(t)))
                .map(|p| p.endpoint.clone()),
        )
    }

    pub fn lookup_all_pubs(&self) -> Vec<Endpoint> {
        dedup_endpoints(self.publishers.iter().map(|p| p.endpoint.clone()))
    }

    pub fn publishers(&self) -> &[Registration] {
        &self.publishers
    }

    pub fn subscribers(&self) -> &[Registration] {
        &self.subscribers
    }

    pub fn broker(&self) -> Option<&Registration> {
        self.broker.as_ref()
    }

    fn to_snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            publishers: self.publishers.clone(),
            subscribers: self.subscribers.clone(),
            broker: self.broker.clone(),
        }
    }

    fn answer(&mut self, msg: Message) -> Message {
        match msg {
            Message::Register(req) => register_reply(self, req),
            Message::IsReady(_) => Message::IsReadyResp(IsReadyResp {
                ready: self.is_ready(),
                ..Default::default()
            }),
            Message::LookupByTopic(req) => Message::LookupResp(LookupResp {
                addresses: self.lookup_by_topic(&req.topics),
                ..Default::default()
            }),
            Message::LookupAllPubs(_) => Message::LookupResp(LookupResp {
                addresses: self.lookup_all_pubs(),
                ..Default::default()
            }),
            Message::Exit(ExitReq { role, id, .. }) => {
                self.exit(role, &id);
                Message::Ack
            }
            other => {
                warn!(msg_type = ?other.msg_type(), "unexpected request");
                Message::error(
                    ErrorKind::Protocol,
                    format!("unexpected request {:?}", other.msg_type()),
                )
            }
        }
    }
}

fn register_reply(registry: &mut CentralizedRegistry, req: RegisterReq) -> Message {
    let endpoint = req.endpoint();
    let reg = Registration::new(req.role, endpoint, req.topics);
    match registry.register(reg) {
        Ok(()) => Message::RegisterResp(RegisterResp::success()),
        Err(reason) => Message::RegisterResp(RegisterResp::failure(reason)),
    }
}

fn remove_by_id(list: &mut Vec<Registration>, id: &str) -> bool {
    let before = list.len();
    list.retain(|r| r.endpoint.id != id);
    list.len() != before
}

/// Keeps the first occurrence of each `address:port`.
pub(crate) fn dedup_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Vec<Endpoint> {
    let mut out: Vec<Endpoint> = Vec::new();
    for ep in endpoints {
        if !out.iter().any(|e| e.address == ep.address && e.port == ep.port) {
            out.push(ep);
        }
    }
    out
}

impl DiscoveryBackend for CentralizedRegistry {
    fn name(&self) -> &'static str {
        "centralized"
    }

    fn handle_client(&mut self, token: Token, msg: Message) -> Vec<Effect> {
        telemetry::request(msg.msg_type());
        let message = self.answer(msg);
        vec![Effect::Reply { token, message }]
    }

    fn handle_peer(&mut self, msg: Message) -> Vec<Effect> {
        debug!(msg_type = ?msg.msg_type(), "centralized registry ignores peer traffic");
        Vec::new()
    }

    fn handle_undeliverable(&mut self, to: &NodeRef, msg: Message) -> Vec<Effect> {
        warn!(%to, msg_type = ?msg.msg_type(), "dropping undeliverable message");
        Vec::new()
    }

    fn snapshot(&self) -> Option<RegistrySnapshot> {
        Some(self.to_snapshot())
    }

    fn restore(&mut self, snapshot: RegistrySnapshot) -> Result<(), DiscoveryError> {
        info!(registrants = snapshot.len(), "restoring registry snapshot");
        self.publishers = snapshot.publishers;
        self.subscribers = snapshot.subscribers;
        self.broker = snapshot.broker;
        Ok(())
    }

    fn broker_address(&self) -> Option<String> {
        self.broker.as_ref().map(|b| b.endpoint.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{IsReadyReq, LookupAllPubsReq};

    fn reg(role: Role, id: &str, port: u16, topics: &[&str]) -> Registration {
        Registration::new(
            role,
            Endpoint::new(id, "10.0.0.1", port),
            topics.iter().map(|t| t.to_string()).collect(),
        )
    }

    #[test]
    fn test_readiness_counts() {
        let mut registry = CentralizedRegistry::new(ReadinessTarget::new(2, 1, Dissemination::Direct));
        assert!(!registry.is_ready());
        registry.register(reg(Role::Publisher, "pub1", 1, &["temp"])).unwrap();
        registry.register(reg(Role::Subscriber, "sub1", 2, &["temp"])).unwrap();
        assert!(!registry.is_ready());
        registry.register(reg(Role::Publisher, "pub2", 3, &["humidity"])).unwrap();
        assert!(registry.is_ready());
    }

    #[test]
    fn test_reregistration_overwrites() {
        let mut registry = CentralizedRegistry::new(ReadinessTarget::default());
        registry.register(reg(Role::Publisher, "pub1", 1, &["temp"])).unwrap();
        registry.register(reg(Role::Publisher, "pub1", 1, &["humidity"])).unwrap();
        assert_eq!(registry.publishers().len(), 1);
        assert!(registry.lookup_by_topic(&["temp".into()]).is_empty());
        assert_eq!(registry.lookup_by_topic(&["humidity".into()]).len(), 1);
    }

    #[test]
    fn test_lookup_intersects_topics() {
        let mut registry = CentralizedRegistry::new(ReadinessTarget::default());
        registry.register(reg(Role::Publisher, "pub1", 1, &["temp", "wind"])).unwrap();
        registry.register(reg(Role::Publisher, "pub2", 2, &["humidity"])).unwrap();
        let found = registry.lookup_by_topic(&["wind".into(), "humidity".into()]);
        assert_eq!(found.len(), 2);
        assert!(registry.lookup_by_topic(&["rain".into()]).is_empty());
        assert_eq!(registry.lookup_all_pubs().len(), 2);
    }

    #[test]
    fn test_broker_mode_redirects_lookup() {
        let mut registry =
            CentralizedRegistry::new(ReadinessTarget::new(1, 0, Dissemination::Broker));
        registry.register(reg(Role::Publisher, "pub1", 1, &["temp"])).unwrap();
        assert!(!registry.is_ready());
        assert!(registry.lookup_by_topic(&["temp".into()]).is_empty());

        registry.register(reg(Role::Broker, "broker", 9, &[])).unwrap();
        assert!(registry.is_ready());
        let found = registry.lookup_by_topic(&["temp".into()]);
        assert_eq!(found, vec![Endpoint::new("broker", "10.0.0.1", 9)]);
        assert_eq!(registry.broker_address().as_deref(), Some("10.0.0.1:9"));
    }

    #[test]
    fn test_exit_evicts() {
        let mut registry = CentralizedRegistry::new(ReadinessTarget::new(1, 0, Dissemination::Direct));
        registry.register(reg(Role::Publisher, "pub1", 1, &["temp"])).unwrap();
        assert!(registry.exit(Role::Publisher, "pub1"));
        assert!(!registry.exit(Role::Publisher, "pub1"));
        assert!(registry.lookup_all_pubs().is_empty());
        assert!(!registry.is_ready());
    }

    #[test]
    fn test_backend_replies_with_token() {
        let mut registry = CentralizedRegistry::new(ReadinessTarget::new(0, 0, Dissemination::Direct));
        let effects = registry.handle_client(7, Message::IsReady(IsReadyReq::default()));
        assert_eq!(
            effects,
            vec![Effect::Reply {
                token: 7,
                message: Message::IsReadyResp(IsReadyResp {
                    ready: true,
                    ..Default::default()
                }),
            }]
        );

        let effects = registry.handle_client(8, Message::LookupAllPubs(LookupAllPubsReq::default()));
        assert!(matches!(
            &effects[0],
            Effect::Reply { token: 8, message: Message::LookupResp(_) }
        ));

        let effects = registry.handle_client(9, Message::LookupResp(LookupResp::default()));
        assert!(matches!(
            &effects[0],
            Effect::Reply { message: Message::Error(e), .. } if e.kind == ErrorKind::Protocol
        ));
    }

    #[test]
    fn test_ring_node_rejected() {
        let mut registry = CentralizedRegistry::new(ReadinessTarget::default());
        assert!(registry.register(reg(Role::RingNode, "n1", 1, &[])).is_err());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut registry = CentralizedRegistry::new(ReadinessTarget::default());
        registry.register(reg(Role::Publisher, "pub1", 1, &["temp"])).unwrap();
        registry.register(reg(Role::Broker, "broker", 9, &[])).unwrap();
        let snap = registry.snapshot().unwrap();

        let mut standby = CentralizedRegistry::new(ReadinessTarget::default());
        standby.restore(snap.clone()).unwrap();
        assert_eq!(standby.snapshot().unwrap(), snap);
    }
}
