//! Request/reply transport over TCP.
//!
//! A [`Connection`] owns one stream and a read buffer and moves whole frames.
//! [`request`] wraps connect, send and receive in a per-attempt timeout and
//! retries a bounded number of times before handing the failure to the
//! caller.

use std::time::Duration;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, warn};

use crate::codec::FrameCodec;
use crate::error::TransportError;

const READ_CHUNK: usize = 4 * 1024;

/// Framed TCP stream.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    codec: FrameCodec,
}

impl Connection {
    pub fn new(stream: TcpStream, codec: FrameCodec) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            codec,
        }
    }

    pub async fn connect(addr: impl ToSocketAddrs, codec: FrameCodec) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, codec))
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream.peer_addr().ok()
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        let frame = self.codec.encode(msg)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads the next frame. `Ok(None)` means the peer closed cleanly between
    /// frames.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        loop {
            if let Some(msg) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(msg));
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(TransportError::Closed)
                };
            }
        }
    }

    /// Sends `msg` and waits for exactly one reply.
    pub async fn call<Req, Resp>(&mut self, msg: &Req) -> Result<Resp, TransportError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.send(msg).await?;
        self.recv().await?.ok_or(TransportError::Closed)
    }
}

/// Per-hop timeout and bounded retry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, first one included. Zero is treated as one.
    pub attempts: u32,
    /// Deadline for one connect + send + reply.
    pub timeout: Duration,
    /// Pause before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(2),
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn once(timeout: Duration) -> Self {
        Self {
            attempts: 1,
            timeout,
            backoff: Duration::ZERO,
        }
    }
}

/// One request/reply exchange on a fresh connection, retried per `policy`.
pub async fn request<Req, Resp>(
    addr: &str,
    msg: &Req,
    codec: FrameCodec,
    policy: &RetryPolicy,
) -> Result<Resp, TransportError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let attempts = policy.attempts.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        let exchange = async {
            let mut conn = Connection::connect(addr, codec).await?;
            conn.call::<Req, Resp>(msg).await
        };
        let outcome = match tokio::time::timeout(policy.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(policy.timeout)),
        };
        match outcome {
            Ok(reply) => return Ok(reply),
            // A payload we cannot parse will not parse on retry either.
            Err(TransportError::Codec(err)) => return Err(TransportError::Codec(err)),
            Err(err) => {
                warn!(%addr, attempt, attempts, error = %err, "request failed");
                last = err.to_string();
            }
        }
        if attempt < attempts {
            tokio::time::sleep(policy.backoff * attempt).await;
        }
    }
    debug!(%addr, attempts, "giving up");
    Err(TransportError::Exhausted {
        addr: addr.to_string(),
        attempts,
        last,
    })
}
