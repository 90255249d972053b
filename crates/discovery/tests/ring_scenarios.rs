//! Multi-node ring scenarios over an in-memory network.
//!
//! # Test Strategy
//!
//! 1. **Forwarding**: requests walk to the owner and replies retrace the path
//! 2. **Membership**: joins split ranges and migrate topics
//! 3. **Ring walks**: readiness, lookup-all and exit visit every member once
//! 4. **Failures**: an unreachable hop fails the request back to the client

mod common;

use common::{endpoint, endpoint_for, register, SimNet};
use discovery::{Dissemination, ReadinessTarget, BROKER_TOPIC};
use protocol::{
    ErrorKind, IsReadyReq, LookupAllPubsReq, LookupByTopicReq, Message, MsgType, Role,
};

const NODES: [u64; 3] = [10, 90, 200];

fn direct(pubs: u32, subs: u32) -> ReadinessTarget {
    ReadinessTarget::new(pubs, subs, Dissemination::Direct)
}

fn lookup(topics: &[&str]) -> Message {
    Message::LookupByTopic(LookupByTopicReq {
        topics: topics.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    })
}

fn ready(net: &mut SimNet, at: u64) -> bool {
    match net.request(&endpoint_for(at), Message::IsReady(IsReadyReq::default())) {
        Message::IsReadyResp(resp) => resp.ready,
        other => panic!("unexpected {other:?}"),
    }
}

fn addresses(reply: Message) -> Vec<u16> {
    match reply {
        Message::LookupResp(resp) => {
            let mut ports: Vec<u16> = resp.addresses.iter().map(|e| e.port).collect();
            ports.sort_unstable();
            ports
        }
        other => panic!("unexpected {other:?}"),
    }
}

fn assert_registered(reply: Message) {
    match reply {
        Message::RegisterResp(resp) => assert!(resp.result.is_success(), "{resp:?}"),
        other => panic!("unexpected {other:?}"),
    }
}

// ============================================================================
// Forwarding Tests
// ============================================================================

#[test]
fn test_ring_links_in_hash_order() {
    let net = SimNet::ring(&NODES, &[], direct(0, 0));
    for (i, h) in NODES.iter().enumerate() {
        let node = net.node(*h);
        assert_eq!(node.successor().hash.value(), NODES[(i + 1) % 3]);
        assert_eq!(node.predecessor().hash.value(), NODES[(i + 2) % 3]);
    }
}

#[test]
fn test_register_walks_to_owner_and_back() {
    let mut net = SimNet::ring(&NODES, &[("temp", 95)], direct(1, 0));

    let reply = net.request(&endpoint_for(10), register(Role::Publisher, "pub1", 7000, &["temp"]));
    assert_registered(reply);
    assert_eq!(net.holders("temp"), vec![200]);

    // 10 forwards to 90, which hands off to 200 with the successor flag;
    // the reply comes back through 90 to the entry node.
    assert_eq!(
        net.take_trace(),
        vec![
            (endpoint_for(90), MsgType::Register),
            (endpoint_for(200), MsgType::Register),
            (endpoint_for(90), MsgType::RegisterResp),
            (endpoint_for(10), MsgType::RegisterResp),
        ]
    );
    for node in net.nodes() {
        assert_eq!(node.pending_requests(), 0);
    }
}

#[test]
fn test_lookup_follows_registration_path() {
    let mut net = SimNet::ring(&NODES, &[("temp", 95)], direct(1, 0));
    net.request(&endpoint_for(10), register(Role::Publisher, "pub1", 7000, &["temp"]));
    net.take_trace();

    assert_eq!(addresses(net.request(&endpoint_for(10), lookup(&["temp"]))), vec![7000]);
    assert_eq!(
        net.take_trace(),
        vec![
            (endpoint_for(90), MsgType::LookupByTopic),
            (endpoint_for(200), MsgType::LookupByTopic),
            (endpoint_for(90), MsgType::LookupResp),
            (endpoint_for(10), MsgType::LookupResp),
        ]
    );
}

#[test]
fn test_owner_answers_locally() {
    let mut net = SimNet::ring(&NODES, &[("temp", 95)], direct(1, 0));
    net.request(&endpoint_for(200), register(Role::Publisher, "pub1", 7000, &["temp"]));
    assert!(net.take_trace().is_empty());
    assert_eq!(net.holders("temp"), vec![200]);
}

#[test]
fn test_multi_topic_request_fans_out() {
    let mut net = SimNet::ring(&NODES, &[("temp", 95), ("wind", 50), ("rain", 5)], direct(2, 0));
    net.request(&endpoint_for(90), register(Role::Publisher, "pub1", 7000, &["temp", "wind", "rain"]));
    net.request(&endpoint_for(200), register(Role::Publisher, "pub2", 7001, &["rain"]));

    assert_eq!(net.holders("temp"), vec![200]);
    assert_eq!(net.holders("wind"), vec![90]);
    assert_eq!(net.holders("rain"), vec![10]);

    let found = addresses(net.request(&endpoint_for(10), lookup(&["temp", "rain", "temp"])));
    assert_eq!(found, vec![7000, 7001]);
}

#[test]
fn test_lookup_of_unknown_topic_is_empty() {
    let mut net = SimNet::ring(&NODES, &[("temp", 95)], direct(0, 0));
    assert!(addresses(net.request(&endpoint_for(90), lookup(&["temp"]))).is_empty());
}

// ============================================================================
// Membership Tests
// ============================================================================

#[test]
fn test_join_through_predecessor_side_takes_topics() {
    let mut net = SimNet::ring(&[10, 90], &[("temp", 95)], direct(1, 0));
    net.request(&endpoint_for(10), register(Role::Publisher, "pub1", 7000, &["temp"]));
    assert_eq!(net.holders("temp"), vec![10]);

    assert_registered(net.join(200, &endpoint_for(10)));
    assert_eq!(net.holders("temp"), vec![200]);
    assert_eq!(net.node(90).successor().hash.value(), 200);
    assert_eq!(net.node(10).predecessor().hash.value(), 200);
    assert_eq!(addresses(net.request(&endpoint_for(90), lookup(&["temp"]))), vec![7000]);
}

#[test]
fn test_join_through_successor_side_takes_topics() {
    let mut net = SimNet::ring(&[10, 90], &[("temp", 95)], direct(1, 0));
    net.request(&endpoint_for(90), register(Role::Publisher, "pub1", 7000, &["temp"]));

    assert_registered(net.join(200, &endpoint_for(90)));
    assert_eq!(net.holders("temp"), vec![200]);
    assert_eq!(net.node(200).predecessor().hash.value(), 90);
    assert_eq!(net.node(200).successor().hash.value(), 10);
}

#[test]
fn test_join_forwarded_to_placement_node() {
    let mut net = SimNet::ring(&[10, 90, 200], &[], direct(0, 0));
    assert_registered(net.join(150, &endpoint_for(10)));

    let trace = net.take_trace();
    assert!(trace.contains(&(endpoint_for(90), MsgType::LocateNewNode)));
    assert!(trace.contains(&(endpoint_for(10), MsgType::LocateNewNodeResp)));
    assert_eq!(net.node(90).successor().hash.value(), 150);
    assert_eq!(net.node(200).predecessor().hash.value(), 150);
    for node in net.nodes() {
        assert_eq!(node.pending_requests(), 0);
    }
}

#[test]
fn test_colliding_join_rejected() {
    // A second endpoint pinned onto an occupied position.
    let mut net = SimNet::ring(&[10, 90], &[("127.0.0.1:6300", 90)], direct(0, 0));
    let reply = net.join_port(6300, &endpoint_for(10));
    match reply {
        Message::RegisterResp(resp) => assert!(!resp.result.is_success()),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(net.node(10).successor().hash.value(), 90);
}

// ============================================================================
// Ring Walk Tests
// ============================================================================

#[test]
fn test_readiness_counts_across_nodes() {
    let mut net = SimNet::ring(&NODES, &[("temp", 95)], direct(1, 1));
    assert!(!ready(&mut net, 200));

    net.request(&endpoint_for(10), register(Role::Publisher, "pub1", 7000, &["temp"]));
    assert!(!ready(&mut net, 200));

    net.request(&endpoint_for(90), register(Role::Subscriber, "sub1", 8000, &["temp"]));
    assert!(ready(&mut net, 200));
    assert!(ready(&mut net, 10));

    // Surplus registrants keep the system ready.
    net.request(&endpoint_for(200), register(Role::Publisher, "pub2", 7001, &["temp"]));
    assert!(ready(&mut net, 90));
}

#[test]
fn test_reregistration_through_another_node_counts_once() {
    let mut net = SimNet::ring(&NODES, &[("temp", 95)], direct(2, 0));
    net.request(&endpoint_for(10), register(Role::Publisher, "pub1", 7000, &["temp"]));
    net.request(&endpoint_for(90), register(Role::Publisher, "pub1", 7000, &["temp"]));
    assert!(!ready(&mut net, 200));
    assert!(!ready(&mut net, 10));

    net.request(&endpoint_for(200), register(Role::Publisher, "pub2", 7001, &["temp"]));
    assert!(ready(&mut net, 90));

    // Leaving through one node removes every entry-node record of it.
    let exit = Message::Exit(protocol::ExitReq {
        role: Role::Publisher,
        id: "pub1".into(),
        address: "10.0.0.1".into(),
        port: 7000,
        origin: None,
    });
    net.request(&endpoint_for(200), exit);
    assert!(!ready(&mut net, 10));
}

#[test]
fn test_readiness_walk_visits_each_node_once() {
    let mut net = SimNet::ring(&NODES, &[], direct(0, 0));
    assert!(ready(&mut net, 200));
    let walked: Vec<_> = net
        .take_trace()
        .into_iter()
        .filter(|(_, kind)| *kind == MsgType::IsReady)
        .map(|(at, _)| at)
        .collect();
    assert_eq!(walked, vec![endpoint_for(10), endpoint_for(90)]);
}

#[test]
fn test_lookup_all_collects_every_publisher() {
    let mut net = SimNet::ring(&NODES, &[("temp", 95), ("wind", 50), ("rain", 5)], direct(0, 0));
    net.request(&endpoint_for(10), register(Role::Publisher, "pub1", 7000, &["temp", "wind"]));
    net.request(&endpoint_for(90), register(Role::Publisher, "pub2", 7001, &["rain"]));
    net.request(&endpoint_for(90), register(Role::Subscriber, "sub1", 8000, &["rain"]));

    let reply = net.request(
        &endpoint_for(200),
        Message::LookupAllPubs(LookupAllPubsReq::default()),
    );
    assert_eq!(addresses(reply), vec![7000, 7001]);
}

#[test]
fn test_lookup_all_includes_publishers_without_topics() {
    let mut net = SimNet::ring(&NODES, &[("temp", 95)], direct(1, 0));
    assert_registered(net.request(&endpoint_for(10), register(Role::Publisher, "pub1", 7000, &[])));
    net.request(&endpoint_for(90), register(Role::Publisher, "pub2", 7001, &["temp"]));
    assert!(ready(&mut net, 200));

    for at in NODES {
        let reply = net.request(&endpoint_for(at), Message::LookupAllPubs(LookupAllPubsReq::default()));
        assert_eq!(addresses(reply), vec![7000, 7001]);
    }
    assert_eq!(addresses(net.request(&endpoint_for(200), lookup(&["temp"]))), vec![7001]);

    let exit = Message::Exit(protocol::ExitReq {
        role: Role::Publisher,
        id: "pub1".into(),
        address: "10.0.0.1".into(),
        port: 7000,
        origin: None,
    });
    net.request(&endpoint_for(90), exit);
    let reply = net.request(&endpoint_for(10), Message::LookupAllPubs(LookupAllPubsReq::default()));
    assert_eq!(addresses(reply), vec![7001]);
}

#[test]
fn test_exit_evicts_on_every_node() {
    let mut net = SimNet::ring(&NODES, &[("temp", 95), ("wind", 50)], direct(1, 0));
    net.request(&endpoint_for(10), register(Role::Publisher, "pub1", 7000, &["temp", "wind"]));
    assert!(ready(&mut net, 90));

    let exit = Message::Exit(protocol::ExitReq {
        role: Role::Publisher,
        id: "pub1".into(),
        address: "10.0.0.1".into(),
        port: 7000,
        origin: None,
    });
    assert_eq!(net.request(&endpoint_for(10), exit), Message::Ack);

    assert!(net.holders("temp").is_empty());
    assert!(net.holders("wind").is_empty());
    assert!(!ready(&mut net, 90));
    let reply = net.request(&endpoint_for(90), Message::LookupAllPubs(LookupAllPubsReq::default()));
    assert!(addresses(reply).is_empty());
}

#[test]
fn test_broker_mode_routes_lookups_to_broker() {
    let target = ReadinessTarget::new(1, 1, Dissemination::Broker);
    let mut net = SimNet::ring(&NODES, &[("temp", 95), (BROKER_TOPIC, 150)], target);
    net.request(&endpoint_for(10), register(Role::Publisher, "pub1", 7000, &["temp"]));
    net.request(&endpoint_for(90), register(Role::Subscriber, "sub1", 8000, &["temp"]));
    assert!(!ready(&mut net, 10));

    net.request(&endpoint_for(90), register(Role::Broker, "broker", 5560, &[]));
    assert!(ready(&mut net, 10));
    assert_eq!(net.holders(BROKER_TOPIC), vec![200]);

    let reply = net.request(&endpoint_for(10), lookup(&["temp"]));
    match reply {
        Message::LookupResp(resp) => assert_eq!(resp.addresses, vec![endpoint("broker", 5560)]),
        other => panic!("unexpected {other:?}"),
    }
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test]
fn test_unreachable_owner_fails_request() {
    let mut net = SimNet::ring(&NODES, &[("temp", 95)], direct(1, 0));
    net.set_down(200);

    let reply = net.request(&endpoint_for(10), register(Role::Publisher, "pub1", 7000, &["temp"]));
    match reply {
        Message::Error(err) => {
            assert_eq!(err.kind, ErrorKind::RoutingFailure);
            assert!(err.chain.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(net.node(10).pending_requests(), 0);
    assert_eq!(net.node(90).pending_requests(), 0);
}

#[test]
fn test_readiness_walk_fails_when_ring_broken() {
    let mut net = SimNet::ring(&NODES, &[], direct(0, 0));
    net.set_down(90);
    let reply = net.request(&endpoint_for(200), Message::IsReady(IsReadyReq::default()));
    assert!(matches!(reply, Message::Error(e) if e.kind == ErrorKind::RoutingFailure));
}

#[test]
fn test_join_fails_when_placement_unreachable() {
    let mut net = SimNet::ring(&NODES, &[], direct(0, 0));
    net.set_down(90);
    let reply = net.join(150, &endpoint_for(10));
    match reply {
        Message::RegisterResp(resp) => assert!(!resp.result.is_success()),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(net.node(10).pending_requests(), 0);
}
