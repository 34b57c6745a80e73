//! Whole-cluster tests over the in-process network.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use lamport_mutex::{
    memory::{MemoryNetwork, MemoryPeer},
    PeerConfig, PeerError, PeerId, PeerState,
};

async fn others_not_held(peers: &[Arc<MemoryPeer>], me: PeerId) -> bool {
    for peer in peers.iter().filter(|p| p.id() != me) {
        if peer.state().await == PeerState::Held {
            return false;
        }
    }
    true
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_peer_holds_under_contention() {
    const ROUNDS: usize = 5;
    let network = MemoryNetwork::new();
    let peers = Arc::new(network.cluster(&[1, 2, 3, 4], |peer| peer));
    let inside = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..peers.len())
        .map(|index| {
            let peers = Arc::clone(&peers);
            let inside = Arc::clone(&inside);
            let entries = Arc::clone(&entries);
            tokio::spawn(async move {
                let me = &peers[index];
                for _ in 0..ROUNDS {
                    me.run_critical_section(async {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        assert!(others_not_held(&peers, me.id()).await);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        entries.fetch_add(1, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
                }
            })
        })
        .collect();

    tokio::time::timeout(Duration::from_secs(60), async {
        for task in tasks {
            task.await.unwrap();
        }
    })
    .await
    .expect("some peer starved");

    assert_eq!(entries.load(Ordering::SeqCst), ROUNDS * 4);
    for peer in peers.iter() {
        assert_eq!(peer.state().await, PeerState::Released);
        assert!(peer.deferred_requests().await.is_empty());
        assert_eq!(peer.active_peers().await.len(), 3);
    }
}

#[tokio::test]
async fn single_request_enters_and_exits_once() {
    let network = MemoryNetwork::new();
    let peers = network.cluster(&[1, 2, 3], |peer| peer);

    peers[0].request_critical_section().await.unwrap();
    assert_eq!(peers[0].state().await, PeerState::Held);
    assert_eq!(peers[1].state().await, PeerState::Released);
    peers[0].exit_critical_section().await.unwrap();
    assert_eq!(peers[0].state().await, PeerState::Released);

    // both other peers saw the request, so their clocks moved past it
    assert!(peers[1].clock().await > 1);
    assert!(peers[2].clock().await > 1);
}

#[tokio::test]
async fn holder_releases_every_waiting_peer_on_exit() {
    let network = MemoryNetwork::new();
    let peers = network.cluster(&[1, 2, 3], |peer| peer);

    peers[0].request_critical_section().await.unwrap();

    let waiters: Vec<_> = peers[1..]
        .iter()
        .map(|peer| {
            let peer = Arc::clone(peer);
            tokio::spawn(async move {
                peer.request_critical_section().await.unwrap();
                peer.exit_critical_section().await.unwrap();
            })
        })
        .collect();

    tokio::time::timeout(Duration::from_secs(5), async {
        while peers[0].deferred_requests().await.len() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("requests were never deferred");
    assert_eq!(peers[1].state().await, PeerState::Wanted);
    assert_eq!(peers[2].state().await, PeerState::Wanted);

    peers[0].exit_critical_section().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        for waiter in waiters {
            waiter.await.unwrap();
        }
    })
    .await
    .expect("deferred peers were never granted");
}

#[tokio::test]
async fn unreachable_peer_counts_as_granted_and_is_dropped() {
    let network = MemoryNetwork::new();
    let peers = network.cluster(&[1, 2, 3], |peer| peer);
    network.set_reachable(PeerId(3), false);

    peers[0].request_critical_section().await.unwrap();
    assert_eq!(peers[0].state().await, PeerState::Held);
    assert!(!peers[0].is_active(PeerId(3)).await);
    assert!(peers[0].is_active(PeerId(2)).await);

    // Peer 1 no longer asks peer 3, but peer 3 still asks peer 1 and waits.
    network.set_reachable(PeerId(3), true);
    let late = {
        let peer = Arc::clone(&peers[2]);
        tokio::spawn(async move { peer.request_critical_section().await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while peers[0].deferred_requests().await.is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("peer 3 never reached peer 1");
    assert!(!late.is_finished());

    peers[0].exit_critical_section().await.unwrap();
    late.await.unwrap().unwrap();
    assert_eq!(peers[2].state().await, PeerState::Held);
}

#[tokio::test]
async fn request_waits_for_a_slow_holder_unless_bounded() {
    let network = MemoryNetwork::new();
    let peers = network.cluster(&[1, 2, 3], |peer| {
        if peer.id() == PeerId(1) {
            peer.with_config(PeerConfig::default().with_grant_timeout(Duration::from_millis(100)))
        } else {
            peer
        }
    });

    peers[1].request_critical_section().await.unwrap();

    // bounded: gives up and goes back to RELEASED
    let result = peers[0].request_critical_section().await;
    assert!(matches!(result, Err(PeerError::Timeout(_))));
    assert_eq!(peers[0].state().await, PeerState::Released);

    // unbounded: keeps waiting for as long as the holder holds
    let unbounded = {
        let peer = Arc::clone(&peers[2]);
        tokio::spawn(async move { peer.request_critical_section().await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!unbounded.is_finished());
    assert_eq!(peers[2].state().await, PeerState::Wanted);

    peers[1].exit_critical_section().await.unwrap();
    unbounded.await.unwrap().unwrap();
    assert_eq!(peers[2].state().await, PeerState::Held);
}
