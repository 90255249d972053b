//! Per-node topic storage.

use std::collections::BTreeMap;

use corelib::RingToken;
use protocol::{Endpoint, Role, TopicRecord};

use crate::backend::BROKER_TOPIC;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicEntry {
    pub hash: RingToken,
    pub publishers: Vec<Endpoint>,
    pub subscribers: Vec<Endpoint>,
}

/// Topics whose hash this node owns, keyed by name.
///
/// Topic names rather than hashes are the key so two topics that collide on
/// the ring keep separate registrant lists.
#[derive(Debug, Clone, Default)]
pub struct TopicTable {
    entries: BTreeMap<String, TopicEntry>,
}

impl TopicTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `endpoint` under `topic`, replacing an earlier entry from the
    /// same registrant. Brokers are stored as publishers of their topic.
    pub fn insert(&mut self, topic: &str, hash: RingToken, role: Role, endpoint: Endpoint) {
        let entry = self
            .entries
            .entry(topic.to_string())
            .or_insert_with(|| TopicEntry {
                hash,
                ..Default::default()
            });
        let list = match role {
            Role::Subscriber => &mut entry.subscribers,
            _ => &mut entry.publishers,
        };
        upsert(list, endpoint);
    }

    pub fn get(&self, topic: &str) -> Option<&TopicEntry> {
        self.entries.get(topic)
    }

    pub fn publishers(&self, topic: &str) -> Vec<Endpoint> {
        self.entries
            .get(topic)
            .map(|e| e.publishers.clone())
            .unwrap_or_default()
    }

    /// Publishers of every real topic; the broker slot is left out.
    pub fn all_publishers(&self) -> impl Iterator<Item = &Endpoint> {
        self.entries
            .iter()
            .filter(|(topic, _)| topic.as_str() != BROKER_TOPIC)
            .flat_map(|(_, e)| e.publishers.iter())
    }

    /// Drops every endpoint registered by `id` in `role`. Returns how many
    /// topic entries were touched.
    pub fn evict(&mut self, role: Role, id: &str) -> usize {
        let mut touched = 0;
        for entry in self.entries.values_mut() {
            let list = match role {
                Role::Subscriber => &mut entry.subscribers,
                _ => &mut entry.publishers,
            };
            let before = list.len();
            list.retain(|e| e.id != id);
            if list.len() != before {
                touched += 1;
            }
        }
        self.entries
            .retain(|_, e| !e.publishers.is_empty() || !e.subscribers.is_empty());
        touched
    }

    /// Removes and returns every entry whose hash fails `keep`.
    pub fn split_off(&mut self, keep: impl Fn(RingToken) -> bool) -> Vec<TopicRecord> {
        let moved: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| !keep(e.hash))
            .map(|(topic, _)| topic.clone())
            .collect();
        moved
            .into_iter()
            .filter_map(|topic| {
                let entry = self.entries.remove(&topic)?;
                Some(TopicRecord {
                    topic,
                    publishers: entry.publishers,
                    subscribers: entry.subscribers,
                })
            })
            .collect()
    }

    /// Takes over records handed on by another node.
    pub fn merge(&mut self, record: TopicRecord, hash: RingToken) {
        for ep in record.publishers {
            self.insert(&record.topic, hash, Role::Publisher, ep);
        }
        for ep in record.subscribers {
            self.insert(&record.topic, hash, Role::Subscriber, ep);
        }
    }

    pub fn topics(&self) -> impl Iterator<Item = (&String, &TopicEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn upsert(list: &mut Vec<Endpoint>, endpoint: Endpoint) {
    match list.iter_mut().find(|e| e.id == endpoint.id) {
        Some(existing) => *existing = endpoint,
        None => list.push(endpoint),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(id: &str, port: u16) -> Endpoint {
        Endpoint::new(id, "10.0.0.1", port)
    }

    #[test]
    fn test_insert_and_overwrite() {
        let mut table = TopicTable::new();
        table.insert("temp", RingToken(95), Role::Publisher, ep("pub1", 1));
        table.insert("temp", RingToken(95), Role::Publisher, ep("pub1", 2));
        table.insert("temp", RingToken(95), Role::Subscriber, ep("sub1", 3));
        let entry = table.get("temp").unwrap();
        assert_eq!(entry.publishers, vec![ep("pub1", 2)]);
        assert_eq!(entry.subscribers, vec![ep("sub1", 3)]);
    }

    #[test]
    fn test_broker_topic_excluded_from_all_publishers() {
        let mut table = TopicTable::new();
        table.insert("temp", RingToken(95), Role::Publisher, ep("pub1", 1));
        table.insert(BROKER_TOPIC, RingToken(3), Role::Broker, ep("broker", 9));
        let all: Vec<_> = table.all_publishers().cloned().collect();
        assert_eq!(all, vec![ep("pub1", 1)]);
        assert_eq!(table.publishers(BROKER_TOPIC), vec![ep("broker", 9)]);
    }

    #[test]
    fn test_evict_drops_empty_entries() {
        let mut table = TopicTable::new();
        table.insert("temp", RingToken(95), Role::Publisher, ep("pub1", 1));
        table.insert("wind", RingToken(40), Role::Publisher, ep("pub1", 1));
        table.insert("wind", RingToken(40), Role::Publisher, ep("pub2", 2));
        assert_eq!(table.evict(Role::Publisher, "pub1"), 2);
        assert!(table.get("temp").is_none());
        assert_eq!(table.publishers("wind"), vec![ep("pub2", 2)]);
    }

    #[test]
    fn test_split_off_by_hash() {
        let mut table = TopicTable::new();
        table.insert("temp", RingToken(95), Role::Publisher, ep("pub1", 1));
        table.insert("wind", RingToken(40), Role::Subscriber, ep("sub1", 2));
        let moved = table.split_off(|h| h.value() > 50);
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].topic, "wind");
        assert_eq!(table.len(), 1);

        let mut other = TopicTable::new();
        other.merge(moved.into_iter().next().unwrap(), RingToken(40));
        assert_eq!(other.get("wind").unwrap().subscribers, vec![ep("sub1", 2)]);
    }
}
