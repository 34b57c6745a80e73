//! Policies deciding what happens to a peer that stops answering.
//!
//! The protocol core keeps the active peer set; a policy only decides whether a
//! failed exchange is retried or the peer is dropped from that set.

use crate::{config::BackoffConfig, message::PeerId};
use std::time::Duration;

/// What to do after an exchange with a peer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Try the same request again after the delay.
    Retry(Duration),
    /// Treat the peer as having granted and drop it for the rest of the run.
    Remove,
}

pub trait ReachabilityPolicy: Send + Sync + 'static {
    /// Called after the `failures`-th consecutive failed exchange with `peer` (1-based).
    fn on_failure(&self, peer: PeerId, failures: u32) -> Verdict;
}

/// Drops a peer on its first failure, without retrying.
///
/// A dropped peer never comes back, so a transient network error permanently
/// shrinks the set of peers that must agree. If the dropped peer is in fact
/// alive, it can be inside the critical section at the same time as this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOnFailure;

impl ReachabilityPolicy for RemoveOnFailure {
    fn on_failure(&self, _peer: PeerId, _failures: u32) -> Verdict {
        Verdict::Remove
    }
}

/// Retries with jittered exponential backoff before dropping the peer.
#[derive(Debug, Clone)]
pub struct RetryWithBackoff {
    pub backoff: BackoffConfig,
    pub max_retries: u32,
}

impl RetryWithBackoff {
    pub fn new(backoff: BackoffConfig, max_retries: u32) -> Self {
        Self {
            backoff,
            max_retries,
        }
    }
}

impl ReachabilityPolicy for RetryWithBackoff {
    fn on_failure(&self, _peer: PeerId, failures: u32) -> Verdict {
        if failures > self.max_retries {
            return Verdict::Remove;
        }
        Verdict::Retry(self.backoff.duration(failures - 1, &mut rand::rng()))
    }
}
