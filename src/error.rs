//! Error types for the mutual exclusion protocol.

use crate::message::{PeerId, PeerState};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`crate::peer::MutexPeer`] operations.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("critical section already requested (state is {0})")]
    AlreadyRequested(PeerState),

    #[error("critical section is not held (state is {0})")]
    NotHeld(PeerState),

    #[error("request from unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("request from peer {peer} carries timestamp {timestamp}, beyond what the clock can witness")]
    InvalidTimestamp { peer: PeerId, timestamp: u64 },

    #[error("deferred request from peer {0} was superseded by a newer one")]
    Superseded(PeerId),

    #[error("gave up waiting for grants after {0:?}")]
    Timeout(Duration),

    #[error("critical section request was cancelled")]
    Cancelled,
}

/// Errors returned by a [`crate::transport::Transport`] exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(PeerId),

    #[error("io error talking to peer {peer}: {source}")]
    Io {
        peer: PeerId,
        #[source]
        source: std::io::Error,
    },

    #[error("codec error talking to peer {peer}: {message}")]
    Codec { peer: PeerId, message: String },

    #[error("peer {0} closed the connection")]
    Closed(PeerId),

    #[error("peer {peer} rejected the request: {reason}")]
    Rejected { peer: PeerId, reason: String },

    #[error("peer {peer} violated the protocol: {message}")]
    ProtocolViolation { peer: PeerId, message: String },
}
