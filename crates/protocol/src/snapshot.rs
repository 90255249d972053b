//! Registry snapshots.
//!
//! A snapshot is the full state of a centralized registry: every publisher
//! and subscriber registration plus the broker slot. A leader ships one to
//! its successor on handoff.

use serde::{Deserialize, Serialize};

use crate::message::{Endpoint, Role};

/// One registrant as the registry stores it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub role: Role,
    pub endpoint: Endpoint,
    pub topics: Vec<String>,
}

impl Registration {
    pub fn new(role: Role, endpoint: Endpoint, topics: Vec<String>) -> Self {
        Self {
            role,
            endpoint,
            topics,
        }
    }

    pub fn publishes(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }
}

/// Everything a ring node stores for one topic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub topic: String,
    pub publishers: Vec<Endpoint>,
    pub subscribers: Vec<Endpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub publishers: Vec<Registration>,
    pub subscribers: Vec<Registration>,
    pub broker: Option<Registration>,
}

impl RegistrySnapshot {
    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty() && self.subscribers.is_empty() && self.broker.is_none()
    }

    /// Total registrants, broker included.
    pub fn len(&self) -> usize {
        self.publishers.len() + self.subscribers.len() + usize::from(self.broker.is_some())
    }
}
