//! Subcommands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand};
use corelib::{HashAlgorithm, HashSpace, NodeRef, Partitioner, Topology};
use discovery::failover::{CoordinatorServer, RemoteCoordinator};
use discovery::{telemetry, DiscoveryClient, DiscoveryNode, LeaderWatch};
use tracing::info;

use crate::config::{ClientTarget, CoordinatorArgs, NodeArgs, RegistrantArgs};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a discovery node.
    Node(NodeArgs),
    /// Run the coordination service failover nodes elect through.
    Coordinator(CoordinatorArgs),
    /// Talk to a running discovery service.
    Client {
        #[command(flatten)]
        target: ClientTarget,
        #[command(subcommand)]
        action: ClientAction,
    },
    /// Offline ring tooling.
    Ring {
        #[command(subcommand)]
        action: RingAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ClientAction {
    /// Register a publisher, subscriber or broker.
    Register {
        #[command(flatten)]
        registrant: RegistrantArgs,
        /// Topics published or subscribed to.
        #[arg(long = "topic")]
        topics: Vec<String>,
    },
    /// Ask whether the expected registrants have all arrived.
    Ready {
        /// Keep polling until ready.
        #[arg(long)]
        wait: bool,
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },
    /// Publishers of the given topics (the broker in broker mode).
    Lookup {
        #[arg(long = "topic", required = true)]
        topics: Vec<String>,
    },
    /// Every registered publisher.
    LookupAll,
    /// Deregister.
    Exit {
        #[command(flatten)]
        registrant: RegistrantArgs,
    },
}

#[derive(Debug, Subcommand)]
pub enum RingAction {
    /// Show ownership, finger tables and topic placement for a set of nodes.
    Inspect(InspectArgs),
}

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    /// Member endpoint as `address:port`; repeat for each node.
    #[arg(long = "node", required = true)]
    pub nodes: Vec<String>,

    /// Topic to place; repeatable.
    #[arg(long = "topic")]
    pub topics: Vec<String>,

    #[arg(long, default_value_t = 48)]
    pub bits: u8,

    #[arg(long, default_value = "blake3")]
    pub algorithm: HashAlgorithm,

    /// Print each node's finger table.
    #[arg(long)]
    pub fingers: bool,
}

impl Command {
    pub async fn run(self) -> anyhow::Result<()> {
        match self {
            Command::Node(args) => run_node(args).await,
            Command::Coordinator(args) => run_coordinator(args).await,
            Command::Client { target, action } => run_client(target, action).await,
            Command::Ring {
                action: RingAction::Inspect(args),
            } => {
                print!("{}", inspect(&args)?);
                Ok(())
            }
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler; run until killed.
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn run_node(args: NodeArgs) -> anyhow::Result<()> {
    telemetry::describe();
    let config = args.node_config()?;
    let mut node = DiscoveryNode::bind(config.clone())
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    if let Some(addr) = &args.coordinator {
        let coord = RemoteCoordinator::connect(addr, config.codec, config.hop.timeout)
            .await
            .with_context(|| format!("connecting to coordinator {addr}"))?;
        node = node.with_coordinator(Arc::new(coord));
    }
    info!(
        listen = %node.local_addr()?,
        advertised = %node.advertised(),
        strategy = %config.strategy,
        "starting discovery node"
    );
    node.run(shutdown_signal()).await?;
    Ok(())
}

async fn run_coordinator(args: CoordinatorArgs) -> anyhow::Result<()> {
    let server = CoordinatorServer::bind(&args.bind, args.wire.codec())
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(listen = %server.local_addr()?, "coordinator running");
    server.run(shutdown_signal()).await?;
    Ok(())
}

async fn run_client(target: ClientTarget, action: ClientAction) -> anyhow::Result<()> {
    let client = match (&target.addr, &target.coordinator) {
        (Some(addr), _) => DiscoveryClient::new(addr.clone()),
        (None, Some(coordinator)) => {
            let coord = RemoteCoordinator::connect(coordinator, target.wire.codec(), target.retry().timeout)
                .await
                .with_context(|| format!("connecting to coordinator {coordinator}"))?;
            let leader = LeaderWatch::follow(Arc::new(coord)).await?;
            DiscoveryClient::following(leader)
        }
        (None, None) => anyhow::bail!("either --addr or --coordinator is required"),
    }
    .with_codec(target.wire.codec())
    .with_retry(target.retry());

    match action {
        ClientAction::Register { registrant, topics } => {
            client
                .register(registrant.role.into(), &registrant.endpoint(), &topics)
                .await?;
            println!("registered {}", registrant.id);
        }
        ClientAction::Ready { wait, poll_ms } => {
            if wait {
                client.wait_until_ready(Duration::from_millis(poll_ms)).await?;
                println!("ready");
            } else {
                println!("{}", if client.is_ready().await? { "ready" } else { "not ready" });
            }
        }
        ClientAction::Lookup { topics } => {
            for endpoint in client.lookup_by_topic(&topics).await? {
                println!("{} {}", endpoint.id, endpoint.addr());
            }
        }
        ClientAction::LookupAll => {
            for endpoint in client.lookup_all_pubs().await? {
                println!("{} {}", endpoint.id, endpoint.addr());
            }
        }
        ClientAction::Exit { registrant } => {
            client.exit(registrant.role.into(), &registrant.endpoint()).await?;
            println!("deregistered {}", registrant.id);
        }
    }
    Ok(())
}

fn parse_member(endpoint: &str, partitioner: &dyn Partitioner) -> anyhow::Result<NodeRef> {
    let (address, port) = endpoint
        .rsplit_once(':')
        .with_context(|| format!("expected address:port, got {endpoint:?}"))?;
    let port = port
        .parse()
        .with_context(|| format!("bad port in {endpoint:?}"))?;
    Ok(NodeRef::new(address, port, partitioner))
}

/// Renders the ring the given members would form.
pub fn inspect(args: &InspectArgs) -> anyhow::Result<String> {
    use std::fmt::Write;

    let space = HashSpace::new(args.bits)?;
    let partitioner = args.algorithm.partitioner(space);
    let members = args
        .nodes
        .iter()
        .map(|n| parse_member(n, partitioner.as_ref()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let topology = Topology::new(space, members)?;

    let mut out = String::new();
    writeln!(out, "ring: {} nodes, {} bits, {}", topology.len(), space.bits(), args.algorithm)?;
    for (node, range) in topology.owned_ranges() {
        writeln!(out, "  {:<24} hash {:<20} owns {}", node.endpoint(), node.hash, range)?;
    }
    if !args.topics.is_empty() {
        writeln!(out, "topics:")?;
        for topic in &args.topics {
            let h = partitioner.partition_str(topic);
            if let Some(owner) = topology.owner_of(h) {
                writeln!(out, "  {topic:<24} hash {h:<20} -> {}", owner.endpoint())?;
            }
        }
    }
    if args.fingers {
        for node in topology.nodes() {
            writeln!(out, "fingers of {}:", node.endpoint())?;
            for (i, finger) in topology.finger_table(node.hash)?.iter().enumerate() {
                writeln!(out, "  {i:>2} start {:<20} -> {}", finger.start, finger.node.endpoint())?;
            }
        }
    }
    Ok(out)
}
