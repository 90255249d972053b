//! Outbound peer links.
//!
//! One task per destination drains an ordered queue, so messages to the
//! same peer arrive in the order the backend emitted them. Every message is
//! a one-shot request that the peer acknowledges with `Ack`; one that still
//! fails after the retry policy comes back to the event loop as
//! undeliverable.
//!
//! Link tasks belong to the node: they end with it, whether it stops cleanly
//! or its task is aborted.

use std::collections::HashMap;
use std::fmt;

use corelib::NodeRef;
use protocol::{request, FrameCodec, Message, RetryPolicy};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::runtime::Event;
use crate::telemetry;

/// Where an outbound message goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Target {
    /// A ring neighbor; failures go back to the backend.
    Peer(NodeRef),
    /// A failover standby receiving registry replicas.
    Standby(String),
}

impl Target {
    fn addr(&self) -> String {
        match self {
            Target::Peer(node) => node.endpoint(),
            Target::Standby(addr) => addr.clone(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Peer(node) => write!(f, "peer {node}"),
            Target::Standby(addr) => write!(f, "standby {addr}"),
        }
    }
}

pub(crate) struct Links {
    queues: HashMap<String, mpsc::UnboundedSender<Message>>,
    tasks: JoinSet<()>,
    events: mpsc::UnboundedSender<Event>,
    codec: FrameCodec,
    policy: RetryPolicy,
}

impl Links {
    pub(crate) fn new(events: mpsc::UnboundedSender<Event>, codec: FrameCodec, policy: RetryPolicy) -> Self {
        Self {
            queues: HashMap::new(),
            tasks: JoinSet::new(),
            events,
            codec,
            policy,
        }
    }

    pub(crate) fn send(&mut self, to: Target, msg: Message) {
        let addr = to.addr();
        let msg = match self.queues.get(&addr) {
            Some(queue) => match queue.send(msg) {
                Ok(()) => return,
                // The link task is gone; start a fresh one below.
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(%to, "opening link");
        self.tasks
            .spawn(drain(to, rx, self.events.clone(), self.codec, self.policy));
        // The receiver was just created and is held by the task.
        let _ = tx.send(msg);
        self.queues.insert(addr, tx);
    }

    /// Number of link tasks still running.
    pub(crate) fn active(&self) -> usize {
        self.tasks.len()
    }

    /// Stops every link task; anything still queued is dropped.
    pub(crate) async fn shutdown(mut self) {
        self.queues.clear();
        self.tasks.shutdown().await;
    }
}

async fn drain(
    to: Target,
    mut queue: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<Event>,
    codec: FrameCodec,
    policy: RetryPolicy,
) {
    let addr = to.addr();
    while let Some(msg) = queue.recv().await {
        match request::<Message, Message>(&addr, &msg, codec, &policy).await {
            Ok(Message::Ack) => {}
            Ok(other) => warn!(%to, reply = ?other.msg_type(), "peer answered with something other than Ack"),
            Err(err) => {
                telemetry::delivery_failure();
                error!(%to, msg_type = ?msg.msg_type(), error = %err, "peer unreachable");
                let undeliverable = Event::Undeliverable {
                    to: to.clone(),
                    message: msg,
                };
                if events.send(undeliverable).is_err() {
                    return;
                }
            }
        }
    }
}
