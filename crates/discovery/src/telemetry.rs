//! Metrics emitted by discovery nodes.
//!
//! Counters only; installing a recorder is up to the embedding binary.
//!
//! - `discovery_requests_total{msg_type}`: requests handled by a backend
//! - `discovery_hops_forwarded_total{msg_type}`: requests passed to a ring peer
//! - `discovery_delivery_failures_total`: peer sends that exhausted retries
//! - `discovery_ring_joins_total`: joiners this node placed
//! - `discovery_leader_changes_total`: times this node gained leadership

use metrics::{counter, describe_counter};
use protocol::MsgType;

pub const REQUESTS: &str = "discovery_requests_total";
pub const HOPS_FORWARDED: &str = "discovery_hops_forwarded_total";
pub const DELIVERY_FAILURES: &str = "discovery_delivery_failures_total";
pub const RING_JOINS: &str = "discovery_ring_joins_total";
pub const LEADER_CHANGES: &str = "discovery_leader_changes_total";

/// Registers metric descriptions with the installed recorder.
pub fn describe() {
    describe_counter!(REQUESTS, "Requests handled by a discovery backend");
    describe_counter!(HOPS_FORWARDED, "Requests forwarded to a ring peer");
    describe_counter!(DELIVERY_FAILURES, "Peer messages dropped after exhausting retries");
    describe_counter!(RING_JOINS, "Ring joins placed by this node");
    describe_counter!(LEADER_CHANGES, "Times this node became failover leader");
}

fn label(msg_type: MsgType) -> String {
    format!("{msg_type:?}")
}

pub fn request(msg_type: MsgType) {
    counter!(REQUESTS, "msg_type" => label(msg_type)).increment(1);
}

pub fn hop_forwarded(msg_type: MsgType) {
    counter!(HOPS_FORWARDED, "msg_type" => label(msg_type)).increment(1);
}

pub fn delivery_failure() {
    counter!(DELIVERY_FAILURES).increment(1);
}

pub fn ring_join() {
    counter!(RING_JOINS).increment(1);
}

pub fn leader_change() {
    counter!(LEADER_CHANGES).increment(1);
}
