//! Module that contains all the different message types sent in the network.

use serde::{Deserialize, Serialize};
use std::{error::Error, fmt};

/// Identifier of a peer in the fixed peer set. Also used to break timestamp ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PeerId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Enum that tells where a peer is in the critical section cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Released,
    Wanted,
    Held,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Released => "RELEASED",
            Self::Wanted => "WANTED",
            Self::Held => "HELD",
        })
    }
}

/// Struct that represents the message a peer multicasts when it wants the critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub timestamp: u64,
    pub requester_id: PeerId,
}

/// Struct that represents the permission sent back to a requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub granted: bool,
    pub timestamp: u64,
}

/// Priority of a request: lower timestamp first, ties broken by the lower peer id.
///
/// Field order matters, the derived `Ord` compares `timestamp` before `peer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    pub timestamp: u64,
    pub peer: PeerId,
}

impl RequestKey {
    pub fn new(timestamp: u64, peer: PeerId) -> Self {
        Self { timestamp, peer }
    }

    /// Function that tells if this request must be served before `other`.
    pub fn has_priority_over(&self, other: &RequestKey) -> bool {
        self < other
    }
}

impl Request {
    /// Function that creates a new request.
    pub fn new(timestamp: u64, requester_id: PeerId) -> Self {
        Self {
            timestamp,
            requester_id,
        }
    }

    /// Function that returns the priority key of the request.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.timestamp, self.requester_id)
    }

    /// Function that returns the request as a JSON formatted `String`.
    pub fn to_json_string(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::to_string(self)?)
    }

    /// Function that parses the request from a JSON formatted `String`.
    pub fn from_json_string(line: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::from_str::<Self>(line)?)
    }
}

impl Response {
    /// Function that creates a response granting permission at the responder's `timestamp`.
    pub fn granted(timestamp: u64) -> Self {
        Self {
            granted: true,
            timestamp,
        }
    }

    /// Function that tells if the response is a valid answer to `request`.
    ///
    /// The responder witnessed the request timestamp before replying, so its own
    /// timestamp has to be strictly greater.
    pub fn answers(&self, request: &Request) -> bool {
        self.granted && self.timestamp > request.timestamp
    }

    /// Function that returns the response as a JSON formatted `String`.
    pub fn to_json_string(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::to_string(self)?)
    }

    /// Function that parses the response from a JSON formatted `String`.
    pub fn from_json_string(line: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::from_str::<Self>(line)?)
    }
}
