//! Static cluster layout and peer tuning.

use crate::message::PeerId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, error::Error, net::SocketAddr, path::Path, time::Duration};

/// Static mapping from peer id to listening address, fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub peers: BTreeMap<PeerId, SocketAddr>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peers: BTreeMap::from([
                (PeerId(1), SocketAddr::from(([127, 0, 0, 1], 50051))),
                (PeerId(2), SocketAddr::from(([127, 0, 0, 1], 50052))),
                (PeerId(3), SocketAddr::from(([127, 0, 0, 1], 50053))),
            ]),
        }
    }
}

impl ClusterConfig {
    pub fn new(peers: BTreeMap<PeerId, SocketAddr>) -> Self {
        Self { peers }
    }

    /// Function that parses the cluster layout from a JSON formatted `String`.
    pub fn from_json_string(json: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let config = serde_json::from_str::<Self>(json)?;
        if config.peers.is_empty() {
            return Err("cluster configuration lists no peers".into());
        }
        Ok(config)
    }

    /// Function that reads the cluster layout from a JSON file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("couldn't read {}: {e}", path.display()))?;
        Self::from_json_string(&contents)
    }

    pub fn address_of(&self, id: PeerId) -> Option<SocketAddr> {
        self.peers.get(&id).copied()
    }

    /// Every peer except `id`.
    pub fn others(&self, id: PeerId) -> impl Iterator<Item = (PeerId, SocketAddr)> + '_ {
        self.peers
            .iter()
            .filter(move |(pid, _)| **pid != id)
            .map(|(pid, addr)| (*pid, *addr))
    }
}

/// Tuning for a single [`crate::peer::MutexPeer`].
#[derive(Debug, Clone, Default)]
pub struct PeerConfig {
    /// How long to wait for every grant before abandoning a request. `None` waits forever.
    pub grant_timeout: Option<Duration>,
    /// Pause before asking again a peer whose answer broke the protocol.
    pub violation_backoff: BackoffConfig,
}

impl PeerConfig {
    pub fn with_grant_timeout(mut self, timeout: Duration) -> Self {
        self.grant_timeout = Some(timeout);
        self
    }
}

/// Pauses between retries: exponential growth up to a ceiling, with random jitter.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Pause before the first retry.
    pub initial: Duration,
    /// Longest pause, before jitter.
    pub max: Duration,
    /// Factor the pause grows by after every retry.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Function that returns the pause before retry number `retries` (0-based).
    ///
    /// The result is scaled by a random factor in `0.5..1.5`.
    pub fn duration(&self, retries: u32, rng: &mut impl Rng) -> Duration {
        let growth = self.multiplier.powf(f64::from(retries));
        let pause = (self.initial.as_secs_f64() * growth).min(self.max.as_secs_f64());
        Duration::from_secs_f64(pause * rng.random_range(0.5..1.5))
    }
}
