//! Module that contains the request/response substrate between peers.

use crate::{
    config::ClusterConfig,
    error::TransportError,
    log,
    message::{PeerId, Request, Response},
};
use color_print::cformat;
use futures::{SinkExt, StreamExt};
use std::{collections::HashMap, future::Future, net::SocketAddr};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

/// Longest JSON line accepted from a peer.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Sends one request to one peer and waits for its answer.
///
/// This is the only outbound operation the protocol needs. A failed exchange is
/// reported as an error and left to the peer's reachability policy.
pub trait Transport: Send + Sync + 'static {
    fn send_request(
        &self,
        to: PeerId,
        request: Request,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

pub type Lines = Framed<TcpStream, LinesCodec>;

/// Function that wraps a stream into the JSON lines framing used between peers.
pub fn frame(stream: TcpStream) -> Lines {
    Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
}

fn codec_error(peer: PeerId, error: LinesCodecError) -> TransportError {
    match error {
        LinesCodecError::Io(source) => TransportError::Io { peer, source },
        other => TransportError::Codec {
            peer,
            message: other.to_string(),
        },
    }
}

struct Connection {
    address: SocketAddr,
    lines: Mutex<Option<Lines>>,
}

/// Transport that keeps one TCP connection per peer and exchanges JSON lines over it.
///
/// Connections are opened lazily. A connection is only put back after a full
/// request/response exchange, so an exchange abandoned halfway never leaves a
/// stale reply behind for the next request.
pub struct TcpTransport {
    connections: HashMap<PeerId, Connection>,
}

impl TcpTransport {
    /// Function that creates a transport towards every peer of `cluster` except `own_id`.
    pub fn new(own_id: PeerId, cluster: &ClusterConfig) -> Self {
        let connections = cluster
            .others(own_id)
            .map(|(id, address)| {
                (
                    id,
                    Connection {
                        address,
                        lines: Mutex::new(None),
                    },
                )
            })
            .collect();
        Self { connections }
    }

    /// Function that opens every connection up front, logging the ones that fail.
    ///
    /// Failures are not fatal: the connection is retried on the first request.
    pub async fn connect_all(&self) -> usize {
        let mut connected = 0;
        for (id, connection) in &self.connections {
            let mut slot = connection.lines.lock().await;
            if slot.is_some() {
                connected += 1;
                continue;
            }
            match TcpStream::connect(connection.address).await {
                Ok(stream) => {
                    *slot = Some(frame(stream));
                    connected += 1;
                    log::info(&cformat!(
                        "Connected to Node <bold>{id}</bold> at <bold>{}</bold>.",
                        connection.address
                    ));
                }
                Err(e) => log::warning(&cformat!(
                    "Failed to connect to Node <bold>{id}</bold> at <bold>{}</bold>: {e}",
                    connection.address
                )),
            }
        }
        connected
    }

    async fn exchange(&self, to: PeerId, request: Request) -> Result<Response, TransportError> {
        let connection = self
            .connections
            .get(&to)
            .ok_or(TransportError::Unreachable(to))?;

        let mut slot = connection.lines.lock().await;
        let mut lines = match slot.take() {
            Some(lines) => lines,
            None => {
                let stream = TcpStream::connect(connection.address)
                    .await
                    .map_err(|source| TransportError::Io { peer: to, source })?;
                frame(stream)
            }
        };

        let line = request
            .to_json_string()
            .map_err(|e| TransportError::Codec {
                peer: to,
                message: e.to_string(),
            })?;
        lines.send(line).await.map_err(|e| codec_error(to, e))?;

        let reply = match lines.next().await {
            Some(Ok(reply)) => reply,
            Some(Err(e)) => return Err(codec_error(to, e)),
            None => return Err(TransportError::Closed(to)),
        };
        let response =
            Response::from_json_string(&reply).map_err(|e| TransportError::ProtocolViolation {
                peer: to,
                message: format!("malformed response: {e}"),
            })?;

        *slot = Some(lines);
        Ok(response)
    }
}

impl Transport for TcpTransport {
    fn send_request(
        &self,
        to: PeerId,
        request: Request,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send {
        self.exchange(to, request)
    }
}
