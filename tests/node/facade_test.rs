// Facade Tests
// MeshCache lifecycle and get/put, on the in-memory mesh and over TCP

use meshcache::node::{CacheConfig, ConfigError, MeshCache, NodeError, NodeState};
use meshcache::substrate::{MemoryNetwork, MemoryRouter, PeerName, Router, SubstrateError};
use meshcache::sync::ActorError;
use std::future::Future;
use std::pin::pin;
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tokio::time::sleep;

type MemoryCache = MeshCache<i64, MemoryRouter>;

fn node(network: &MemoryNetwork, n: u64, seeds: &[u64]) -> MemoryCache {
    let name = PeerName::from_u64(n);
    let config = CacheConfig::new().with_peer_name(&name.to_string()).with_peers(
        seeds
            .iter()
            .map(|s| PeerName::from_u64(*s).to_string())
            .collect(),
    );
    MeshCache::with_router(config, network.router(name, &format!("node-{}", n))).unwrap()
}

/// Poll `check` for up to five seconds
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

// ============================================================================
// LOCAL GET/PUT
// ============================================================================

#[tokio::test]
async fn test_put_then_get() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);
    x.start().await.unwrap();

    x.put("a", 1, Duration::ZERO);

    assert_eq!(x.get("a"), Some(1));
    x.stop().await.unwrap();
}

#[tokio::test]
async fn test_later_put_wins() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);
    x.start().await.unwrap();

    x.put("a", 1, Duration::ZERO);
    x.put("a", 2, Duration::ZERO);

    assert_eq!(x.get("a"), Some(2));
    x.stop().await.unwrap();
}

#[tokio::test]
async fn test_ttl_expires_lazily() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);
    x.start().await.unwrap();

    x.put("a", 1, Duration::from_millis(10));
    assert_eq!(x.get("a"), Some(1));

    sleep(Duration::from_millis(20)).await;

    assert_eq!(x.get("a"), None);
    assert_eq!(x.len(), 1);
    x.stop().await.unwrap();
}

#[test]
fn test_get_missing_key() {
    let network = MemoryNetwork::new();
    let x = node(&network, 1, &[]);
    assert_eq!(x.get("nothing"), None);
    assert!(x.is_empty());
}

// ============================================================================
// REPLICATION
// ============================================================================

#[tokio::test]
async fn test_put_reaches_peer() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);
    let mut y = node(&network, 2, &[1]);
    x.start().await.unwrap();
    y.start().await.unwrap();
    assert!(network.is_linked(x.peer_name(), y.peer_name()));

    x.put("a", 1, Duration::ZERO);

    assert!(eventually(|| y.get("a") == Some(1)).await);
    x.stop().await.unwrap();
    y.stop().await.unwrap();
}

#[tokio::test]
async fn test_late_joiner_catches_up() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);
    x.start().await.unwrap();
    x.put("a", 1, Duration::ZERO);
    x.put("b", 2, Duration::ZERO);

    let mut y = node(&network, 2, &[1]);
    y.start().await.unwrap();

    assert_eq!(y.get("a"), Some(1));
    assert_eq!(y.get("b"), Some(2));
    x.stop().await.unwrap();
    y.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_writers_converge() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);
    let mut y = node(&network, 2, &[1]);
    let mut z = node(&network, 3, &[2]);
    for cache in [&mut x, &mut y, &mut z] {
        cache.start().await.unwrap();
    }

    for i in 0..20 {
        x.put("shared", i, Duration::ZERO);
        z.put("shared", 100 + i, Duration::ZERO);
        y.put(format!("y-{}", i), i, Duration::ZERO);
    }

    let converged = eventually(|| {
        let x_state = x.agent().snapshot_store();
        x_state.len() == 21
            && x_state == y.agent().snapshot_store()
            && x_state == z.agent().snapshot_store()
    })
    .await;
    assert!(converged);

    for cache in [&mut x, &mut y, &mut z] {
        cache.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_puts_before_start_are_sent_on_start() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);

    x.put("a", 1, Duration::ZERO);
    x.put("b", 2, Duration::ZERO);
    assert_eq!(x.get("a"), Some(1));
    assert_eq!(x.agent().pending_len(), 2);

    x.start().await.unwrap();

    assert!(eventually(|| x.actor_stats().executed == 2).await);
    assert_eq!(x.agent().pending_len(), 0);
    x.stop().await.unwrap();
}

#[tokio::test]
async fn test_put_after_stop_stays_local() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);
    let mut y = node(&network, 2, &[1]);
    x.start().await.unwrap();
    y.start().await.unwrap();
    x.stop().await.unwrap();
    let submitted = x.actor_stats().submitted;

    x.put("late", 1, Duration::ZERO);

    assert_eq!(x.get("late"), Some(1));
    assert_eq!(x.actor_stats().submitted, submitted);
    assert_eq!(y.get("late"), None);
    y.stop().await.unwrap();
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_lifecycle_states() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);
    assert_eq!(x.state(), NodeState::Created);

    x.start().await.unwrap();
    assert_eq!(x.state(), NodeState::Running);

    x.stop().await.unwrap();
    assert_eq!(x.state(), NodeState::Stopped);
}

#[tokio::test]
async fn test_stop_before_start_fails() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);

    assert!(matches!(
        x.stop().await,
        Err(NodeError::InvalidState {
            expected: NodeState::Running,
            actual: NodeState::Created,
        })
    ));
}

#[tokio::test]
async fn test_start_twice_fails() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);
    x.start().await.unwrap();

    assert!(matches!(
        x.start().await,
        Err(NodeError::InvalidState {
            expected: NodeState::Created,
            actual: NodeState::Running,
        })
    ));
    x.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_after_stop_fails() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);
    x.start().await.unwrap();
    x.stop().await.unwrap();

    assert!(matches!(
        x.start().await,
        Err(NodeError::InvalidState {
            actual: NodeState::Stopped,
            ..
        })
    ));
    assert!(x.stop().await.is_err());
}

#[tokio::test]
async fn test_bad_seed_is_not_fatal() {
    let network = MemoryNetwork::new();
    let config = CacheConfig::new()
        .with_peer_name("00:00:00:00:00:01")
        .with_peers(vec!["not-a-peer".to_string()]);
    let mut x: MemoryCache =
        MeshCache::with_router(config, network.router(PeerName::from_u64(1), "x")).unwrap();

    x.start().await.unwrap();
    assert_eq!(x.state(), NodeState::Running);
    x.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_leaves_unsent_writes_pending() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);
    x.start().await.unwrap();

    // The worker has not been polled yet on this single-threaded runtime
    x.put("a", 1, Duration::ZERO);
    x.put("b", 2, Duration::ZERO);
    x.stop().await.unwrap();

    assert_eq!(x.agent().pending_len(), 2);
    assert_eq!(x.actor_stats().dropped, 2);
    assert_eq!(x.actor_stats().executed, 0);
    assert_eq!(x.get("a"), Some(1));
}

/// Poll a future once, outside any runtime
fn poll_once<F: Future>(future: F) -> Option<F::Output> {
    let mut future = pin!(future);
    match future.as_mut().poll(&mut Context::from_waker(Waker::noop())) {
        Poll::Ready(output) => Some(output),
        Poll::Pending => None,
    }
}

#[test]
fn test_failed_start_stops_router_again() {
    let network = MemoryNetwork::new();
    let mut x = node(&network, 1, &[]);

    // No tokio runtime: the router starts, the actor cannot
    let result = poll_once(x.start());

    assert!(matches!(
        result,
        Some(Err(NodeError::Actor(ActorError::NoRuntime)))
    ));
    assert_eq!(x.state(), NodeState::Created);
    assert_eq!(poll_once(x.router().start()), Some(Ok(())));
}

// ============================================================================
// CONSTRUCTION FAILURES
// ============================================================================

#[test]
fn test_bad_peer_name_fails_construction() {
    let result: Result<MeshCache<i64>, _> =
        MeshCache::new(CacheConfig::new().with_peer_name("zz:zz"));

    assert!(matches!(
        result,
        Err(NodeError::Config(ConfigError::InvalidPeerName(_)))
    ));
}

#[test]
fn test_bad_host_fails_construction() {
    let result: Result<MeshCache<i64>, _> =
        MeshCache::new(CacheConfig::new().with_host("not a host"));

    assert!(matches!(
        result,
        Err(NodeError::Config(ConfigError::InvalidAddress(_)))
    ));
}

#[test]
fn test_duplicate_channel_fails_construction() {
    let network = MemoryNetwork::new();
    let _first = node(&network, 1, &[]);
    let result: Result<MemoryCache, _> = MeshCache::with_router(
        CacheConfig::new(),
        network.router(PeerName::from_u64(1), "again"),
    );

    assert!(matches!(
        result,
        Err(NodeError::Substrate(SubstrateError::DuplicateChannel(_)))
    ));
}

// ============================================================================
// TCP END TO END
// ============================================================================

fn tcp_config(n: u64) -> CacheConfig {
    CacheConfig::new()
        .with_host("127.0.0.1")
        .with_port(0)
        .with_peer_name(&PeerName::from_u64(n).to_string())
        .with_password("e2e")
        .with_reconnect_interval(1)
}

#[tokio::test]
async fn test_tcp_nodes_replicate() {
    let mut x: MeshCache<String> = MeshCache::new(tcp_config(1)).unwrap();
    x.start().await.unwrap();
    let x_addr = x.router().local_addr().unwrap().to_string();

    let mut y: MeshCache<String> =
        MeshCache::new(tcp_config(2).with_peers(vec![x_addr])).unwrap();
    y.start().await.unwrap();
    assert!(eventually(|| x.router().connected_peers().contains(&y.peer_name())).await);

    x.put("greeting", "hello".to_string(), Duration::ZERO);
    y.put("reply", "hi".to_string(), Duration::ZERO);

    assert!(eventually(|| y.get("greeting").is_some() && x.get("reply").is_some()).await);
    assert_eq!(y.get("greeting"), Some("hello".to_string()));

    y.stop().await.unwrap();
    x.stop().await.unwrap();
}
