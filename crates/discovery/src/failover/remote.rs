//! Coordinator over TCP.
//!
//! [`CoordinatorServer`] hosts a [`MemoryCoordinator`] and speaks a small
//! request/response protocol on the shared frame codec. Sessions opened on a
//! connection end when that connection drops, so a crashed discovery node
//! loses its ephemeral entries the moment its socket closes.
//!
//! A `Watch` request turns its connection into a push stream: the server
//! sends the current value and then one frame per change until the client
//! hangs up.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use protocol::{Connection, FrameCodec, TransportError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::DiscoveryError;
use crate::failover::coordinator::{Coordinator, CoordinatorError, SessionId, Version, Versioned, Watch};
use crate::failover::memory::MemoryCoordinator;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum CoordRequest {
    OpenSession,
    CloseSession(SessionId),
    Create { path: String, value: String },
    CreateEphemeral { session: SessionId, path: String, value: String },
    Get(String),
    Set { path: String, value: String, expected: Version },
    Children(String),
    Watch(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum CoordResponse {
    Session(SessionId),
    Version(Version),
    Value(Option<Versioned>),
    Children(Vec<String>),
    Done,
    Failed(CoordinatorError),
}

pub struct CoordinatorServer {
    listener: TcpListener,
    coord: Arc<MemoryCoordinator>,
    codec: FrameCodec,
}

impl CoordinatorServer {
    pub async fn bind(addr: &str, codec: FrameCodec) -> Result<Self, DiscoveryError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            coord: Arc::new(MemoryCoordinator::new()),
            codec,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn coordinator(&self) -> Arc<MemoryCoordinator> {
        Arc::clone(&self.coord)
    }

    /// Serves until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), DiscoveryError> {
        info!(addr = ?self.listener.local_addr().ok(), "coordinator listening");
        tokio::pin!(shutdown);
        let mut conns = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%peer, error = %err, "set_nodelay failed");
                    }
                    let conn = Connection::new(stream, self.codec);
                    conns.spawn(serve(Arc::clone(&self.coord), conn, peer));
                }
                Some(_) = conns.join_next(), if !conns.is_empty() => {}
            }
        }
        conns.shutdown().await;
        info!("coordinator stopped");
        Ok(())
    }
}

async fn serve(coord: Arc<MemoryCoordinator>, mut conn: Connection, peer: SocketAddr) {
    let mut sessions = Vec::new();
    loop {
        let req = match conn.recv::<CoordRequest>().await {
            Ok(Some(req)) => req,
            Ok(None) => break,
            Err(err) => {
                debug!(%peer, error = %err, "coordinator connection dropped");
                break;
            }
        };
        let resp = match req {
            CoordRequest::Watch(path) => {
                stream_watch(&coord, &mut conn, &path).await;
                break;
            }
            CoordRequest::OpenSession => coord.open_session().await.map(|id| {
                sessions.push(id);
                CoordResponse::Session(id)
            }),
            CoordRequest::CloseSession(id) => {
                sessions.retain(|s| *s != id);
                coord.close_session(id).await.map(|_| CoordResponse::Done)
            }
            CoordRequest::Create { path, value } => coord.create(&path, &value).await.map(CoordResponse::Version),
            CoordRequest::CreateEphemeral { session, path, value } => coord
                .create_ephemeral(session, &path, &value)
                .await
                .map(CoordResponse::Version),
            CoordRequest::Get(path) => coord.get(&path).await.map(CoordResponse::Value),
            CoordRequest::Set { path, value, expected } => {
                coord.set(&path, &value, expected).await.map(CoordResponse::Version)
            }
            CoordRequest::Children(prefix) => coord.children(&prefix).await.map(CoordResponse::Children),
        };
        let resp = resp.unwrap_or_else(CoordResponse::Failed);
        if let Err(err) = conn.send(&resp).await {
            debug!(%peer, error = %err, "coordinator reply failed");
            break;
        }
    }
    for id in sessions {
        info!(%peer, session = id, "connection gone, expiring session");
        // Already closed explicitly is fine.
        let _ = coord.close_session(id).await;
    }
}

async fn stream_watch(coord: &MemoryCoordinator, conn: &mut Connection, path: &str) {
    let mut rx = match coord.watch(path).await {
        Ok(rx) => rx,
        Err(err) => {
            let _ = conn.send(&CoordResponse::Failed(err)).await;
            return;
        }
    };
    loop {
        let current = rx.borrow_and_update().clone();
        if conn.send(&CoordResponse::Value(current)).await.is_err() {
            return;
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            // Anything from the client, including EOF, ends the stream.
            _ = conn.recv::<CoordRequest>() => return,
        }
    }
}

/// [`Coordinator`] backed by a [`CoordinatorServer`].
///
/// Requests share one connection, which is also the session scope. If it
/// breaks, the next request reconnects, but sessions opened on the old
/// connection are gone.
pub struct RemoteCoordinator {
    addr: String,
    codec: FrameCodec,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl RemoteCoordinator {
    pub async fn connect(addr: &str, codec: FrameCodec, timeout: Duration) -> Result<Self, CoordinatorError> {
        let conn = dial(addr, codec, timeout).await?;
        Ok(Self {
            addr: addr.to_string(),
            codec,
            timeout,
            conn: Mutex::new(Some(conn)),
        })
    }

    async fn call(&self, req: CoordRequest) -> Result<CoordResponse, CoordinatorError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(dial(&self.addr, self.codec, self.timeout).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(unavailable("no connection"));
        };
        let outcome = tokio::time::timeout(self.timeout, conn.call::<_, CoordResponse>(&req)).await;
        match outcome {
            Ok(Ok(CoordResponse::Failed(err))) => Err(err),
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(err)) => {
                *guard = None;
                Err(unavailable(err))
            }
            Err(_) => {
                *guard = None;
                Err(unavailable(TransportError::Timeout(self.timeout)))
            }
        }
    }
}

async fn dial(addr: &str, codec: FrameCodec, timeout: Duration) -> Result<Connection, CoordinatorError> {
    match tokio::time::timeout(timeout, Connection::connect(addr, codec)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(err)) => Err(unavailable(format!("{addr}: {err}"))),
        Err(_) => Err(unavailable(format!("{addr}: connect timed out"))),
    }
}

fn unavailable(err: impl ToString) -> CoordinatorError {
    CoordinatorError::Unavailable(err.to_string())
}

fn unexpected(resp: CoordResponse) -> CoordinatorError {
    unavailable(format!("unexpected coordinator reply {resp:?}"))
}

#[async_trait]
impl Coordinator for RemoteCoordinator {
    async fn open_session(&self) -> Result<SessionId, CoordinatorError> {
        match self.call(CoordRequest::OpenSession).await? {
            CoordResponse::Session(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    async fn close_session(&self, session: SessionId) -> Result<(), CoordinatorError> {
        match self.call(CoordRequest::CloseSession(session)).await? {
            CoordResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn create(&self, path: &str, value: &str) -> Result<Version, CoordinatorError> {
        let req = CoordRequest::Create {
            path: path.to_string(),
            value: value.to_string(),
        };
        match self.call(req).await? {
            CoordResponse::Version(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    async fn create_ephemeral(
        &self,
        session: SessionId,
        path: &str,
        value: &str,
    ) -> Result<Version, CoordinatorError> {
        let req = CoordRequest::CreateEphemeral {
            session,
            path: path.to_string(),
            value: value.to_string(),
        };
        match self.call(req).await? {
            CoordResponse::Version(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    async fn get(&self, path: &str) -> Result<Option<Versioned>, CoordinatorError> {
        match self.call(CoordRequest::Get(path.to_string())).await? {
            CoordResponse::Value(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    async fn set(&self, path: &str, value: &str, expected: Version) -> Result<Version, CoordinatorError> {
        let req = CoordRequest::Set {
            path: path.to_string(),
            value: value.to_string(),
            expected,
        };
        match self.call(req).await? {
            CoordResponse::Version(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    async fn children(&self, prefix: &str) -> Result<Vec<String>, CoordinatorError> {
        match self.call(CoordRequest::Children(prefix.to_string())).await? {
            CoordResponse::Children(names) => Ok(names),
            other => Err(unexpected(other)),
        }
    }

    async fn watch(&self, path: &str) -> Result<Watch, CoordinatorError> {
        let mut conn = dial(&self.addr, self.codec, self.timeout).await?;
        conn.send(&CoordRequest::Watch(path.to_string()))
            .await
            .map_err(unavailable)?;
        let first = match tokio::time::timeout(self.timeout, conn.recv::<CoordResponse>()).await {
            Ok(Ok(Some(CoordResponse::Value(v)))) => v,
            Ok(Ok(Some(CoordResponse::Failed(err)))) => return Err(err),
            Ok(Ok(Some(other))) => return Err(unexpected(other)),
            Ok(Ok(None)) => return Err(unavailable("watch stream closed")),
            Ok(Err(err)) => return Err(unavailable(err)),
            Err(_) => return Err(unavailable("watch timed out")),
        };
        let (tx, rx) = watch::channel(first);
        let path = path.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    pushed = conn.recv::<CoordResponse>() => match pushed {
                        Ok(Some(CoordResponse::Value(v))) => {
                            tx.send_replace(v);
                        }
                        Ok(Some(other)) => {
                            warn!(%path, reply = ?other, "unexpected watch frame");
                            break;
                        }
                        Ok(None) | Err(_) => {
                            // Receivers see the sender drop and treat it as
                            // losing the coordinator.
                            warn!(%path, "watch stream lost");
                            break;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }
}
