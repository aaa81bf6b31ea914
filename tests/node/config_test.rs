// Config Tests

use meshcache::node::{CacheConfig, ConfigError};
use meshcache::substrate::PeerName;

#[test]
fn test_default_values() {
    let config = CacheConfig::default();

    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 6783);
    assert_eq!(config.channel, "meshcache");
    assert_eq!(config.log_filter, "info");
    assert_eq!(config.queue_capacity, 1024);
    assert!(config.peer_name.is_none());
    assert!(config.peers.is_empty());
}

#[test]
fn test_with_defaults_fills_identity() {
    let config = CacheConfig::new().with_defaults();

    let name: PeerName = config.peer_name.as_deref().unwrap().parse().unwrap();
    assert_eq!(config.nickname, Some(name.to_string()));
}

#[test]
fn test_with_defaults_keeps_explicit_identity() {
    let config = CacheConfig::new()
        .with_peer_name("02:00:00:00:00:01")
        .with_nickname("alpha")
        .with_defaults();

    assert_eq!(config.peer_name.as_deref(), Some("02:00:00:00:00:01"));
    assert_eq!(config.nickname.as_deref(), Some("alpha"));
}

#[test]
fn test_validate_rejects_bad_peer_name() {
    let config = CacheConfig::new().with_peer_name("node-1");

    assert_eq!(
        config.validate(),
        Err(ConfigError::InvalidPeerName("node-1".to_string()))
    );
}

#[test]
fn test_validate_rejects_bad_listen_address() {
    let config = CacheConfig::new().with_host("999.0.0.1");
    assert!(matches!(config.validate(), Err(ConfigError::InvalidAddress(_))));
}

#[test]
fn test_validate_rejects_zero_sizes() {
    let empty_channel = CacheConfig::new().with_channel("");
    let zero_queue = CacheConfig::new().with_queue_capacity(0);
    let mut zero_frame = CacheConfig::new();
    zero_frame.max_frame_bytes = 0;

    for config in [empty_channel, zero_queue, zero_frame] {
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));
    }
}

#[test]
fn test_listen_addr() {
    let config = CacheConfig::new().with_host("127.0.0.1").with_port(7000);
    assert_eq!(config.listen_addr().unwrap().to_string(), "127.0.0.1:7000");
}

#[test]
fn test_router_config_carries_settings() {
    let config = CacheConfig::new()
        .with_host("127.0.0.1")
        .with_port(0)
        .with_peer_name("02:00:00:00:00:07")
        .with_password("secret")
        .with_reconnect_interval(2);

    let router = config.router_config().unwrap();

    assert_eq!(router.bind_address, "127.0.0.1");
    assert_eq!(router.bind_port, 0);
    assert_eq!(router.peer_name, PeerName::from_u64(0x0200_0000_0007));
    assert_eq!(router.nickname, "02:00:00:00:00:07");
    assert_eq!(router.password, "secret");
    assert_eq!(router.reconnect_interval_secs, 2);
}

#[test]
fn test_actor_config_uses_queue_capacity() {
    let config = CacheConfig::new().with_queue_capacity(8);
    assert_eq!(config.actor_config().capacity, 8);
}

#[test]
fn test_config_serde_round_trip() {
    let config = CacheConfig::new()
        .with_peers(vec!["10.0.0.1:6783".to_string(), "10.0.0.2:6783".to_string()])
        .with_defaults();

    let bytes = postcard::to_allocvec(&config).unwrap();
    let decoded: CacheConfig = postcard::from_bytes(&bytes).unwrap();

    assert_eq!(decoded, config);
}

#[test]
fn test_ipv6_hosts_are_valid_listen_addresses() {
    for (host, expected) in [("::1", "[::1]:6783"), ("::", "[::]:6783")] {
        let config = CacheConfig::new().with_host(host);
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr().unwrap().to_string(), expected);
        assert_eq!(config.router_config().unwrap().bind_socket_addr().unwrap().to_string(), expected);
    }
}
