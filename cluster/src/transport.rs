//! Heartbeat transport.
//!
//! Messages are framed with a 2-byte big-endian length prefix followed by
//! UTF-8 bytes. A probe is one request frame answered by one reply frame, and
//! the connection is closed afterwards.

use crate::config::ClusterConfig;
use async_trait::async_trait;
use bully_common::{Address, BullyError, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Probe sent by subordinates
pub const PROBE_MESSAGE: &str = "Is Active?";

/// Prefix of every coordinator reply
pub const STATUS_PREFIX: &str = "SERVER: ACTIVE";

pub fn status_reply(address: &Address) -> String {
    format!("{} [{}]", STATUS_PREFIX, address)
}

fn wire_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(2)
        .big_endian()
        .max_frame_length(u16::MAX as usize)
        .new_codec()
}

/// Request/response primitives used by the participants
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one heartbeat probe to `target` and return its reply
    async fn probe(&self, target: &Address) -> Result<String>;

    /// Answer every probe on `address` with `reply` until `shutdown` fires.
    /// Returns an error if the endpoint cannot be bound or accepting fails.
    async fn serve(&self, address: &Address, reply: String, shutdown: CancellationToken) -> Result<()>;
}

/// TCP implementation of [`Transport`]
#[derive(Debug, Clone)]
pub struct TcpTransport {
    probe_timeout: Duration,
    backlog: u32,
}

impl TcpTransport {
    pub fn new(probe_timeout: Duration, backlog: u32) -> Self {
        Self {
            probe_timeout,
            backlog,
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.probe_timeout(), config.listen_backlog)
    }

    async fn exchange(target: &Address) -> Result<String> {
        let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
        let mut framed = Framed::new(stream, wire_codec());

        framed.send(Bytes::from_static(PROBE_MESSAGE.as_bytes())).await?;

        match framed.next().await {
            Some(frame) => Ok(String::from_utf8_lossy(&frame?).into_owned()),
            None => Err(BullyError::ConnectionClosed {
                address: target.to_string(),
            }),
        }
    }

    async fn bind(&self, address: &Address) -> Result<tokio::net::TcpListener> {
        let bind_err = |source: std::io::Error| BullyError::Bind {
            address: address.to_string(),
            source,
        };

        let socket_addr = tokio::net::lookup_host((address.host.as_str(), address.port))
            .await
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "host resolved to no address",
                ))
            })?;

        let socket = if socket_addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;

        // A restarted coordinator rebinds the same port
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(socket_addr).map_err(bind_err)?;
        socket.listen(self.backlog).map_err(bind_err)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn probe(&self, target: &Address) -> Result<String> {
        match tokio::time::timeout(self.probe_timeout, Self::exchange(target)).await {
            Ok(result) => result,
            Err(_) => Err(BullyError::ProbeTimeout {
                address: target.to_string(),
            }),
        }
    }

    async fn serve(&self, address: &Address, reply: String, shutdown: CancellationToken) -> Result<()> {
        let listener = self.bind(address).await?;
        info!("Heartbeat listener bound on {}", address);

        let mut handlers = JoinSet::new();
        let handler_timeout = self.probe_timeout;

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Heartbeat listener on {} stopping", address);
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        trace!("Accepted heartbeat connection from {}", peer);
                        let reply = reply.clone();
                        handlers.spawn(async move {
                            if let Err(e) = answer_probe(stream, reply, handler_timeout).await {
                                debug!("Heartbeat from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept heartbeat connection on {}: {}", address, e);
                        break Err(BullyError::Io(e));
                    }
                },
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            }
        };

        drop(listener);
        while handlers.join_next().await.is_some() {}

        result
    }
}

/// Read one probe and write one reply on an accepted connection
async fn answer_probe(stream: TcpStream, reply: String, timeout: Duration) -> Result<()> {
    let peer = stream.peer_addr()?.to_string();

    match tokio::time::timeout(timeout, read_and_reply(stream, &peer, reply)).await {
        Ok(result) => result,
        Err(_) => Err(BullyError::ProbeTimeout {
            address: peer.clone(),
        }),
    }
}

async fn read_and_reply(stream: TcpStream, peer: &str, reply: String) -> Result<()> {
    let mut framed = Framed::new(stream, wire_codec());

    let probe = match framed.next().await {
        Some(frame) => frame?,
        None => {
            return Err(BullyError::ConnectionClosed {
                address: peer.to_string(),
            })
        }
    };
    trace!("Probe from {}: {}", peer, String::from_utf8_lossy(&probe));

    framed.send(Bytes::from(reply.into_bytes())).await?;
    Ok(())
}
