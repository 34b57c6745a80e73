//! Distributed mutual exclusion between a fixed set of peers.
//!
//! Every peer runs the same [`peer::MutexPeer`] state machine: Lamport clocks
//! order the requests, and the Ricart-Agrawala rule decides whether an inbound
//! request is granted right away or deferred until this peer is done.

pub mod clock;
pub mod config;
pub mod error;
pub mod log;
pub mod memory;
pub mod message;
pub mod peer;
pub mod poisson;
pub mod reachability;
pub mod server;
pub mod transport;

pub use clock::LamportClock;
pub use config::{BackoffConfig, ClusterConfig, PeerConfig};
pub use error::{PeerError, TransportError};
pub use message::{PeerId, PeerState, Request, RequestKey, Response};
pub use peer::MutexPeer;
pub use reachability::{ReachabilityPolicy, RemoveOnFailure, RetryWithBackoff, Verdict};
pub use transport::{TcpTransport, Transport};

/// Mean number of critical section requests per second issued by the demo binary.
pub const RATE: f64 = 0.1;
