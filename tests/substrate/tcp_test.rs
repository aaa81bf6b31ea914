// TCP Substrate Tests
// Real sockets on loopback: handshake, snapshot exchange, relay, rejection

use meshcache::cache::{Entry, Store};
use meshcache::substrate::{
    GossipChannel, PeerName, Router, SubstrateError, TcpRouter, TcpRouterConfig,
};
use meshcache::sync::NodeAgent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const CHANNEL: &str = "meshcache";

struct TestNode {
    router: TcpRouter,
    agent: Arc<NodeAgent<String>>,
    channel: Arc<dyn GossipChannel>,
}

impl TestNode {
    async fn start(n: u64, password: &str) -> Self {
        let config = TcpRouterConfig::new()
            .with_bind_address("127.0.0.1")
            .with_bind_port(0)
            .with_peer_name(PeerName::from_u64(n))
            .with_nickname(&format!("node-{}", n))
            .with_password(password)
            .with_connection_timeout(2)
            .with_reconnect_interval(1);
        let router = TcpRouter::new(config);
        let agent = Arc::new(NodeAgent::new());
        let channel = router.new_gossip(CHANNEL, agent.clone()).unwrap();
        router.start().await.unwrap();
        Self {
            router,
            agent,
            channel,
        }
    }

    fn name(&self) -> PeerName {
        self.router.local_peer()
    }

    fn address(&self) -> String {
        self.router.local_addr().unwrap().to_string()
    }

    fn dial(&self, other: &TestNode) {
        let errors = self.router.initiate_connections(&[other.address()]);
        assert!(errors.is_empty(), "{:?}", errors);
    }

    fn is_connected_to(&self, other: &TestNode) -> bool {
        self.router.connected_peers().contains(&other.name())
    }
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

fn delta(key: &str, value: &str, ts: i64) -> Vec<u8> {
    Store::singleton(key, Entry::new(value.to_string(), ts, 0))
        .to_bytes()
        .unwrap()
}

// ============================================================================
// HANDSHAKE
// ============================================================================

#[tokio::test]
async fn test_connect_exchanges_snapshots() {
    let a = TestNode::start(1, "pw").await;
    let b = TestNode::start(2, "pw").await;
    a.agent.put("a", "1".to_string(), Duration::ZERO);
    b.agent.put("b", "2".to_string(), Duration::ZERO);

    b.dial(&a);

    assert!(eventually(|| a.is_connected_to(&b) && b.is_connected_to(&a)).await);
    assert!(eventually(|| a.agent.get("b").is_some() && b.agent.get("a").is_some()).await);
    assert_eq!(a.agent.snapshot_store(), b.agent.snapshot_store());

    let (nickname, _) = a.router.connection_info(b.name()).unwrap();
    assert_eq!(nickname, "node-2");
}

#[tokio::test]
async fn test_password_mismatch_is_rejected() {
    let a = TestNode::start(1, "right").await;
    let b = TestNode::start(2, "wrong").await;

    b.dial(&a);

    assert!(eventually(|| a.router.stats().handshakes_rejected >= 1).await);
    assert!(a.router.connected_peers().is_empty());
    assert!(b.router.connected_peers().is_empty());
}

#[tokio::test]
async fn test_self_connection_is_rejected() {
    let a = TestNode::start(1, "pw").await;

    a.dial(&a);

    assert!(eventually(|| a.router.stats().handshakes_rejected >= 2).await);
    assert!(a.router.connected_peers().is_empty());
}

#[tokio::test]
async fn test_initiate_validates_addresses() {
    let a = TestNode::start(1, "pw").await;

    let errors = a
        .router
        .initiate_connections(&["no-port".to_string(), "host:notaport".to_string()]);

    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|e| matches!(e, SubstrateError::InvalidAddress(_))));
}

#[tokio::test]
async fn test_initiate_before_start_fails() {
    let router = TcpRouter::new(TcpRouterConfig::new().with_bind_port(0));

    let errors = router.initiate_connections(&["127.0.0.1:1".to_string()]);

    assert_eq!(errors, vec![SubstrateError::NotRunning]);
}

#[tokio::test]
async fn test_mutual_seeds_settle_on_one_connection() {
    let a = TestNode::start(1, "pw").await;
    let b = TestNode::start(2, "pw").await;

    a.dial(&b);
    b.dial(&a);

    assert!(eventually(|| a.is_connected_to(&b) && b.is_connected_to(&a)).await);
    sleep(Duration::from_secs(1)).await;
    let totals = (
        a.router.stats().connections_total,
        b.router.stats().connections_total,
    );

    // Several redial intervals pass without the link being replaced
    sleep(Duration::from_millis(2500)).await;

    assert!(a.is_connected_to(&b) && b.is_connected_to(&a));
    assert_eq!(
        (
            a.router.stats().connections_total,
            b.router.stats().connections_total,
        ),
        totals
    );
    assert!(totals.0 <= 2 && totals.1 <= 2);
}

// ============================================================================
// DISSEMINATION
// ============================================================================

#[tokio::test]
async fn test_broadcast_relays_along_a_chain() {
    let a = TestNode::start(1, "pw").await;
    let b = TestNode::start(2, "pw").await;
    let c = TestNode::start(3, "pw").await;
    b.dial(&a);
    c.dial(&b);
    assert!(eventually(|| a.is_connected_to(&b) && c.is_connected_to(&b)).await);

    a.channel.broadcast(delta("k", "v", 10)).unwrap();

    assert!(eventually(|| c.agent.get("k").is_some()).await);
    assert_eq!(b.agent.get("k"), Some("v".to_string()));
    assert!(!a.is_connected_to(&c));
}

#[tokio::test]
async fn test_unicast_to_connected_peer() {
    let a = TestNode::start(1, "pw").await;
    let b = TestNode::start(2, "pw").await;
    b.dial(&a);
    assert!(eventually(|| a.is_connected_to(&b)).await);

    a.channel.unicast(b.name(), delta("u", "x", 10)).unwrap();
    let stranger = PeerName::from_u64(99);

    assert!(eventually(|| b.agent.get("u").is_some()).await);
    assert_eq!(
        a.channel.unicast(stranger, delta("u", "x", 10)),
        Err(SubstrateError::PeerUnreachable(stranger))
    );
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_stop_drops_connections() {
    let a = TestNode::start(1, "pw").await;
    let b = TestNode::start(2, "pw").await;
    b.dial(&a);
    assert!(eventually(|| a.is_connected_to(&b)).await);

    a.router.stop().await.unwrap();

    assert!(a.router.connected_peers().is_empty());
    assert!(a.router.local_addr().is_none());
    assert_eq!(
        a.channel.broadcast(delta("k", "v", 10)),
        Err(SubstrateError::NotRunning)
    );
    assert!(eventually(|| !b.is_connected_to(&a)).await);
}

#[tokio::test]
async fn test_start_twice_fails() {
    let a = TestNode::start(1, "pw").await;
    assert_eq!(a.router.start().await, Err(SubstrateError::AlreadyRunning));
}
