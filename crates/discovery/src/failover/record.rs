//! The shared leader record.
//!
//! Stored as one pipe-delimited value so any coordination service that holds
//! strings can carry it:
//!
//! ```text
//! disc_addr-10.0.0.1:5555|broker_addr-10.0.0.9:5560|disc_list-10.0.0.2:5555,10.0.0.3:5555
//! ```
//!
//! An empty broker or standby list leaves the part after the dash empty.

use std::fmt;
use std::str::FromStr;

use crate::failover::CoordinatorError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaderRecord {
    pub leader: String,
    pub broker: Option<String>,
    /// Next leaders, in order.
    pub standbys: Vec<String>,
}

impl LeaderRecord {
    pub fn new(leader: impl Into<String>) -> Self {
        Self {
            leader: leader.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for LeaderRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "disc_addr-{}|broker_addr-{}|disc_list-{}",
            self.leader,
            self.broker.as_deref().unwrap_or_default(),
            self.standbys.join(",")
        )
    }
}

impl FromStr for LeaderRecord {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CoordinatorError::Malformed(s.to_string());
        let mut parts = s.split('|');
        let mut field = |key: &str| {
            parts
                .next()
                .and_then(|p| p.strip_prefix(key))
                .and_then(|p| p.strip_prefix('-'))
                .ok_or_else(malformed)
        };
        let leader = field("disc_addr")?;
        let broker = field("broker_addr")?;
        let standbys = field("disc_list")?;
        if parts.next().is_some() || leader.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            leader: leader.to_string(),
            broker: (!broker.is_empty()).then(|| broker.to_string()),
            standbys: standbys
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}
