//! In-process network that delivers requests by calling the target peer directly.
//!
//! Each delivery runs on its own task, so a requester that gives up does not
//! cancel the handler on the other side, the same as with a real socket.

use crate::{
    error::TransportError,
    message::{PeerId, Request, Response},
    peer::MutexPeer,
    transport::Transport,
};
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, RwLock, Weak},
};

pub type MemoryPeer = MutexPeer<MemoryTransport>;

#[derive(Default)]
pub struct MemoryNetwork {
    peers: RwLock<HashMap<PeerId, Weak<MemoryPeer>>>,
    down: RwLock<HashSet<PeerId>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Function that builds a fully connected cluster of fresh peers.
    ///
    /// `build` may customise each peer (policy, config) before it is registered.
    pub fn cluster(
        self: &Arc<Self>,
        ids: &[u32],
        build: impl Fn(MemoryPeer) -> MemoryPeer,
    ) -> Vec<Arc<MemoryPeer>> {
        ids.iter()
            .map(|id| {
                let peer = MutexPeer::new(
                    PeerId(*id),
                    ids.iter().copied().map(PeerId),
                    self.transport(PeerId(*id)),
                );
                let peer = Arc::new(build(peer));
                self.register(&peer);
                peer
            })
            .collect()
    }

    /// Function that returns the transport a peer with id `from` sends through.
    pub fn transport(self: &Arc<Self>, from: PeerId) -> MemoryTransport {
        MemoryTransport {
            from,
            network: Arc::clone(self),
        }
    }

    pub fn register(&self, peer: &Arc<MemoryPeer>) {
        if let Ok(mut peers) = self.peers.write() {
            peers.insert(peer.id(), Arc::downgrade(peer));
        }
    }

    /// Function that cuts a peer off the network (both directions) or brings it back.
    pub fn set_reachable(&self, id: PeerId, reachable: bool) {
        if let Ok(mut down) = self.down.write() {
            if reachable {
                down.remove(&id);
            } else {
                down.insert(id);
            }
        }
    }

    fn is_down(&self, id: PeerId) -> bool {
        self.down.read().map(|down| down.contains(&id)).unwrap_or(true)
    }

    fn lookup(&self, id: PeerId) -> Option<Arc<MemoryPeer>> {
        self.peers.read().ok()?.get(&id)?.upgrade()
    }
}

pub struct MemoryTransport {
    from: PeerId,
    network: Arc<MemoryNetwork>,
}

impl MemoryTransport {
    async fn deliver(&self, to: PeerId, request: Request) -> Result<Response, TransportError> {
        if self.network.is_down(self.from) || self.network.is_down(to) {
            return Err(TransportError::Unreachable(to));
        }
        let peer = self
            .network
            .lookup(to)
            .ok_or(TransportError::Unreachable(to))?;

        let handler = tokio::spawn(async move { peer.handle_request(request).await });
        match handler.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(TransportError::Rejected {
                peer: to,
                reason: e.to_string(),
            }),
            Err(_) => Err(TransportError::Closed(to)),
        }
    }
}

impl Transport for MemoryTransport {
    fn send_request(
        &self,
        to: PeerId,
        request: Request,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send {
        self.deliver(to, request)
    }
}
