//! Command-line and environment configuration.
//!
//! Every node option also reads a `TOPICRING_*` environment variable, so a
//! deployment can configure nodes without flags.

use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, ValueEnum};
use corelib::HashAlgorithm;
use discovery::{DiscoveryStrategy, Dissemination, NodeConfig, ReadinessTarget};
use protocol::{FrameCodec, RetryPolicy, RingParams, Role, WireFormat};

use crate::commands::Command;
use crate::logging::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "topicring", version, about = "Topic discovery for publish/subscribe systems")]
pub struct CliConfig {
    /// Log output format.
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Wire {
    Bincode,
    #[default]
    Json,
}

impl Wire {
    pub fn codec(self) -> FrameCodec {
        match self {
            Wire::Bincode => FrameCodec::new(WireFormat::Bincode),
            Wire::Json => FrameCodec::new(WireFormat::Json),
        }
    }
}

/// Roles a client may register as.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    Publisher,
    Subscriber,
    Broker,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Publisher => Role::Publisher,
            RoleArg::Subscriber => Role::Subscriber,
            RoleArg::Broker => Role::Broker,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct NodeArgs {
    /// `centralized` or `distributed`.
    #[arg(long, env = "TOPICRING_STRATEGY", default_value = "centralized")]
    pub strategy: DiscoveryStrategy,

    /// `direct` or `broker`.
    #[arg(long, env = "TOPICRING_DISSEMINATION", default_value = "direct")]
    pub dissemination: Dissemination,

    /// Publishers expected before the system is ready.
    #[arg(long, env = "TOPICRING_NUM_PUBS", default_value_t = 1)]
    pub num_pubs: u32,

    /// Subscribers expected before the system is ready.
    #[arg(long, env = "TOPICRING_NUM_SUBS", default_value_t = 1)]
    pub num_subs: u32,

    /// Ring hash width in bits.
    #[arg(long, env = "TOPICRING_HASH_BITS", default_value_t = 48)]
    pub bits: u8,

    /// `blake3`, `xxh3` or `sip13`.
    #[arg(long, env = "TOPICRING_HASH_ALGORITHM", default_value = "blake3")]
    pub algorithm: HashAlgorithm,

    #[arg(long, env = "TOPICRING_BIND", default_value = "0.0.0.0:5555")]
    pub bind: String,

    /// Address peers and clients reach this node at; defaults to the bind
    /// address.
    #[arg(long, env = "TOPICRING_ADVERTISE")]
    pub advertise: Option<String>,

    /// Ring member to join through. Omit to start a new ring.
    #[arg(long, env = "TOPICRING_BOOTSTRAP")]
    pub bootstrap: Option<String>,

    /// Coordination service; enables leader election.
    #[arg(long, env = "TOPICRING_COORDINATOR")]
    pub coordinator: Option<String>,

    /// Per-hop timeout in milliseconds.
    #[arg(long, env = "TOPICRING_HOP_TIMEOUT_MS", default_value_t = 2000)]
    pub hop_timeout_ms: u64,

    /// Tries per hop, first one included.
    #[arg(long, env = "TOPICRING_RETRIES", default_value_t = 3)]
    pub retries: u32,

    /// End-to-end deadline for one client request, in milliseconds.
    #[arg(long, env = "TOPICRING_OP_TIMEOUT_MS", default_value_t = 10_000)]
    pub op_timeout_ms: u64,

    #[arg(long, env = "TOPICRING_WIRE_FORMAT", value_enum, default_value_t = Wire::Json)]
    pub wire: Wire,
}

impl NodeArgs {
    pub fn node_config(&self) -> anyhow::Result<NodeConfig> {
        // Fails early on a bad width instead of at the first join.
        corelib::HashSpace::new(self.bits).context("invalid --bits")?;
        let advertise = match (&self.advertise, self.bind.starts_with("0.0.0.0:")) {
            (Some(addr), _) => Some(addr.clone()),
            (None, true) => anyhow::bail!("--advertise is required when binding 0.0.0.0"),
            (None, false) => None,
        };
        Ok(NodeConfig {
            bind: self.bind.clone(),
            advertise,
            strategy: self.strategy,
            target: ReadinessTarget::new(self.num_pubs, self.num_subs, self.dissemination),
            ring: RingParams {
                bits: self.bits,
                algorithm: self.algorithm,
            },
            bootstrap: self.bootstrap.clone(),
            codec: self.wire.codec(),
            hop: RetryPolicy {
                attempts: self.retries,
                timeout: Duration::from_millis(self.hop_timeout_ms),
                ..RetryPolicy::default()
            },
            op_timeout: Duration::from_millis(self.op_timeout_ms),
        })
    }
}

#[derive(Debug, Clone, Args)]
pub struct CoordinatorArgs {
    #[arg(long, env = "TOPICRING_COORDINATOR_BIND", default_value = "0.0.0.0:2181")]
    pub bind: String,

    #[arg(long, env = "TOPICRING_WIRE_FORMAT", value_enum, default_value_t = Wire::Json)]
    pub wire: Wire,
}

/// Where a client finds the discovery service.
#[derive(Debug, Clone, Args)]
pub struct ClientTarget {
    /// A discovery node (centralized or any ring member).
    #[arg(long, env = "TOPICRING_DISCOVERY", conflicts_with = "coordinator", required_unless_present = "coordinator")]
    pub addr: Option<String>,

    /// Follow the failover leader named by this coordination service.
    #[arg(long, env = "TOPICRING_COORDINATOR")]
    pub coordinator: Option<String>,

    /// Request timeout in milliseconds.
    #[arg(long, env = "TOPICRING_TIMEOUT_MS", default_value_t = 5000)]
    pub timeout_ms: u64,

    #[arg(long, env = "TOPICRING_WIRE_FORMAT", value_enum, default_value_t = Wire::Json)]
    pub wire: Wire,
}

impl ClientTarget {
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            ..RetryPolicy::default()
        }
    }
}

/// The registrant a client command acts for.
#[derive(Debug, Clone, Args)]
pub struct RegistrantArgs {
    #[arg(long, value_enum)]
    pub role: RoleArg,

    #[arg(long)]
    pub id: String,

    /// Address the registrant serves on.
    #[arg(long)]
    pub address: String,

    #[arg(long)]
    pub port: u16,
}

impl RegistrantArgs {
    pub fn endpoint(&self) -> protocol::Endpoint {
        protocol::Endpoint::new(self.id.clone(), self.address.clone(), self.port)
    }
}
