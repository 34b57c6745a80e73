use crate::{
    clock::LamportClock,
    config::PeerConfig,
    error::{PeerError, TransportError},
    log,
    message::{PeerId, PeerState, Request, RequestKey, Response},
    reachability::{ReachabilityPolicy, RemoveOnFailure, Verdict},
    transport::Transport,
};
use color_print::cformat;
use futures::future::join_all;
use std::{
    collections::{BTreeSet, HashMap},
    future::Future,
    time::Duration,
};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

/// Inbound request this peer is holding back until it leaves `WANTED`/`HELD`.
struct DeferredRequest {
    timestamp: u64,
    arrival: u64,
    release: oneshot::Sender<()>,
}

/// Everything guarded by the peer's single state lock.
struct PeerCore {
    clock: LamportClock,
    state: PeerState,
    own_request: Option<RequestKey>,
    deferred: HashMap<PeerId, DeferredRequest>,
    arrivals: u64,
    active: BTreeSet<PeerId>,
}

impl PeerCore {
    /// Ricart-Agrawala rule: hold back while `HELD`, or while `WANTED` with the older request.
    fn must_defer(&self, incoming: &Request) -> bool {
        match self.state {
            PeerState::Held => true,
            PeerState::Wanted => self
                .own_request
                .is_some_and(|own| own.has_priority_over(&incoming.key())),
            PeerState::Released => false,
        }
    }

    /// Wakes every deferred handler, oldest arrival first.
    fn release_deferred(&mut self) -> usize {
        let mut released: Vec<_> = self.deferred.drain().collect();
        released.sort_by_key(|(_, deferred)| deferred.arrival);
        let count = released.len();
        for (_, deferred) in released {
            // the handler may already be gone (requester gave up)
            let _ = deferred.release.send(());
        }
        count
    }
}

/// One participant of the distributed mutual exclusion protocol.
///
/// The same object plays both roles: it asks the other peers for permission
/// ([`MutexPeer::request_critical_section`]) and answers their requests
/// ([`MutexPeer::handle_request`]). All state sits behind one lock that is
/// never held across a network call.
pub struct MutexPeer<T: Transport> {
    id: PeerId,
    members: BTreeSet<PeerId>,
    core: Mutex<PeerCore>,
    transport: T,
    policy: Box<dyn ReachabilityPolicy>,
    config: PeerConfig,
}

impl<T: Transport> MutexPeer<T> {
    /// Function that creates a `RELEASED` peer with its clock at 0.
    ///
    /// `others` is the fixed set of remote peers; `id` itself is ignored if present.
    pub fn new(id: PeerId, others: impl IntoIterator<Item = PeerId>, transport: T) -> Self {
        let members: BTreeSet<PeerId> = others.into_iter().filter(|pid| *pid != id).collect();
        Self {
            id,
            core: Mutex::new(PeerCore {
                clock: LamportClock::new(),
                state: PeerState::Released,
                own_request: None,
                deferred: HashMap::new(),
                arrivals: 0,
                active: members.clone(),
            }),
            members,
            transport,
            policy: Box::new(RemoveOnFailure),
            config: PeerConfig::default(),
        }
    }

    pub fn with_policy(mut self, policy: impl ReachabilityPolicy) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub async fn state(&self) -> PeerState {
        self.core.lock().await.state
    }

    pub async fn clock(&self) -> u64 {
        self.core.lock().await.clock.value()
    }

    /// Function that tells if `peer` still has to grant before this peer may enter.
    pub async fn is_active(&self, peer: PeerId) -> bool {
        self.core.lock().await.active.contains(&peer)
    }

    pub async fn active_peers(&self) -> Vec<PeerId> {
        self.core.lock().await.active.iter().copied().collect()
    }

    /// Requests currently held back, in arrival order.
    pub async fn deferred_requests(&self) -> Vec<Request> {
        let core = self.core.lock().await;
        let mut deferred: Vec<_> = core.deferred.iter().collect();
        deferred.sort_by_key(|(_, d)| d.arrival);
        deferred
            .into_iter()
            .map(|(pid, d)| Request::new(d.timestamp, *pid))
            .collect()
    }

    /// Function that asks every active peer for permission and returns once this peer is `HELD`.
    ///
    /// Waits forever unless the peer was configured with a grant timeout.
    pub async fn request_critical_section(&self) -> Result<(), PeerError> {
        self.request_critical_section_cancellable(&CancellationToken::new())
            .await
    }

    /// Same as [`MutexPeer::request_critical_section`], abandoning the request when
    /// `cancel` fires. An abandoned request leaves the peer `RELEASED`.
    pub async fn request_critical_section_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), PeerError> {
        let (key, targets) = {
            let mut core = self.core.lock().await;
            if core.state != PeerState::Released {
                return Err(PeerError::AlreadyRequested(core.state));
            }
            core.state = PeerState::Wanted;
            let timestamp = core.clock.tick();
            let key = RequestKey::new(timestamp, self.id);
            core.own_request = Some(key);
            log::info(&cformat!(
                "[{timestamp}] Node <bold>{}</bold> requested to enter the critical section.",
                self.id
            ));
            (key, core.active.iter().copied().collect::<Vec<_>>())
        };

        let grants = join_all(targets.into_iter().map(|to| self.solicit(to, key)));
        let outcome = tokio::select! {
            _ = grants => Ok(()),
            () = cancel.cancelled() => Err(PeerError::Cancelled),
            () = expire(self.config.grant_timeout) => Err(PeerError::Timeout(
                self.config.grant_timeout.unwrap_or_default(),
            )),
        };

        match outcome {
            Ok(()) => {
                self.enter_critical_section().await;
                Ok(())
            }
            Err(e) => {
                self.abandon_request(&e).await;
                Err(e)
            }
        }
    }

    /// Function that obtains one peer's grant, retrying or dropping the peer on failure.
    async fn solicit(&self, to: PeerId, key: RequestKey) {
        let request = Request::new(key.timestamp, self.id);
        let mut failures = 0;

        loop {
            {
                let mut core = self.core.lock().await;
                if !core.active.contains(&to) {
                    return;
                }
                let now = core.clock.tick();
                log::debug(&cformat!(
                    "[{now}] Node <bold>{}</bold> sent its request to Node <bold>{to}</bold>.",
                    self.id
                ));
            }

            let outcome = match self.transport.send_request(to, request).await {
                Ok(response) if response.answers(&request) => self.accept_grant(to, response).await,
                Ok(response) => Err(TransportError::ProtocolViolation {
                    peer: to,
                    message: format!("unexpected response {response:?} to {request:?}"),
                }),
                Err(e) => Err(e),
            };

            let e = match outcome {
                Ok(()) => return,
                Err(e) => e,
            };
            failures += 1;

            // a wrong answer is never taken as a grant
            if matches!(e, TransportError::ProtocolViolation { .. }) {
                let delay = self
                    .config
                    .violation_backoff
                    .duration(failures - 1, &mut rand::rng());
                log::warning(&cformat!(
                    "Node <bold>{to}</bold> broke the protocol ({e}), asking again in {delay:?}."
                ));
                tokio::time::sleep(delay).await;
                continue;
            }

            match self.policy.on_failure(to, failures) {
                Verdict::Retry(delay) => {
                    log::warning(&cformat!(
                        "Failed to request from Node <bold>{to}</bold> ({e}), retrying in {delay:?}."
                    ));
                    tokio::time::sleep(delay).await;
                }
                Verdict::Remove => {
                    let mut core = self.core.lock().await;
                    core.active.remove(&to);
                    log::error(&cformat!(
                        "[{}] Node <bold>{}</bold> failed to request from Node <bold>{to}</bold> ({e}), removing it.",
                        core.clock.value(),
                        self.id
                    ));
                    return;
                }
            }
        }
    }

    /// Function that merges a grant's timestamp into the clock.
    async fn accept_grant(&self, from: PeerId, response: Response) -> Result<(), TransportError> {
        let mut core = self.core.lock().await;
        let Some(now) = core.clock.witness(response.timestamp) else {
            return Err(TransportError::ProtocolViolation {
                peer: from,
                message: format!("grant timestamp {} is out of range", response.timestamp),
            });
        };
        log::info(&cformat!(
            "[{now}] Node <bold>{}</bold> received the permission from Node <bold>{from}</bold>.",
            self.id
        ));
        Ok(())
    }

    async fn enter_critical_section(&self) {
        let mut core = self.core.lock().await;
        debug_assert_eq!(core.state, PeerState::Wanted);
        core.state = PeerState::Held;
        let now = core.clock.tick();
        log::info(&cformat!(
            "[{now}] Node <bold>{}</bold> <green>entered</green> the critical section.",
            self.id
        ));
    }

    /// Function that leaves the critical section and grants every deferred request.
    pub async fn exit_critical_section(&self) -> Result<(), PeerError> {
        let mut core = self.core.lock().await;
        if core.state != PeerState::Held {
            return Err(PeerError::NotHeld(core.state));
        }
        core.state = PeerState::Released;
        core.own_request = None;
        let now = core.clock.tick();
        log::info(&cformat!(
            "[{now}] Node <bold>{}</bold> <red>exited</red> the critical section.",
            self.id
        ));
        let released = core.release_deferred();
        if released > 0 {
            log::debug(&format!("[{now}] Node {} released {released} deferred requests.", self.id));
        }
        Ok(())
    }

    async fn abandon_request(&self, reason: &PeerError) {
        let mut core = self.core.lock().await;
        core.state = PeerState::Released;
        core.own_request = None;
        let now = core.clock.tick();
        log::warning(&cformat!(
            "[{now}] Node <bold>{}</bold> abandoned its request: {reason}.",
            self.id
        ));
        core.release_deferred();
    }

    /// Function that runs `work` inside the critical section.
    pub async fn run_critical_section<F, R>(&self, work: F) -> Result<R, PeerError>
    where
        F: Future<Output = R>,
    {
        self.request_critical_section().await?;
        let result = work.await;
        self.exit_critical_section().await?;
        Ok(result)
    }

    /// Function that answers a request from another peer.
    ///
    /// Returns immediately when permission can be given, otherwise waits until
    /// this peer leaves the critical section (or abandons its own request).
    pub async fn handle_request(&self, request: Request) -> Result<Response, PeerError> {
        let from = request.requester_id;
        if !self.members.contains(&from) {
            log::warning(&cformat!(
                "Node <bold>{}</bold> ignored a request from unknown Node <bold>{from}</bold>.",
                self.id
            ));
            return Err(PeerError::UnknownPeer(from));
        }

        let release = {
            let mut core = self.core.lock().await;
            let Some(now) = core.clock.witness(request.timestamp) else {
                log::warning(&cformat!(
                    "Node <bold>{}</bold> ignored a request from Node <bold>{from}</bold> with timestamp {}.",
                    self.id,
                    request.timestamp
                ));
                return Err(PeerError::InvalidTimestamp {
                    peer: from,
                    timestamp: request.timestamp,
                });
            };
            log::info(&cformat!(
                "[{now}] Node <bold>{}</bold> received the request cast from Node <bold>{from}</bold> (timestamp {}).",
                self.id,
                request.timestamp
            ));

            if core.must_defer(&request) {
                let (tx, rx) = oneshot::channel();
                core.arrivals += 1;
                let deferred = DeferredRequest {
                    timestamp: request.timestamp,
                    arrival: core.arrivals,
                    release: tx,
                };
                if core.deferred.insert(from, deferred).is_some() {
                    log::warning(&cformat!(
                        "[{now}] Node <bold>{}</bold> replaced an older deferred request from Node <bold>{from}</bold>.",
                        self.id
                    ));
                }
                log::debug(&format!(
                    "[{now}] Node {} deferred Node {from} while {}.",
                    self.id, core.state
                ));
                Some(rx)
            } else {
                // an older deferred request from the same peer is answered by this grant
                if core.deferred.remove(&from).is_some() {
                    log::debug(&format!(
                        "[{now}] Node {} dropped an older deferred request from Node {from}.",
                        self.id
                    ));
                }
                None
            }
        };

        if let Some(release) = release {
            release.await.map_err(|_| PeerError::Superseded(from))?;
        }

        let mut core = self.core.lock().await;
        let now = core.clock.tick();
        log::info(&cformat!(
            "[{now}] Node <bold>{}</bold> granted the permission to Node <bold>{from}</bold>.",
            self.id
        ));
        Ok(Response::granted(now))
    }
}

async fn expire(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
