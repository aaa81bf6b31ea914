// Config - Everything a cache node needs before it touches the network
//
// Defaults are filled by with_defaults(), then validate() rejects anything
// that would make router construction fail.

use crate::substrate::{PeerName, TcpRouterConfig};
use crate::sync::ActorConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid peer name: {0}")]
    InvalidPeerName(String),

    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for a cache node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Address to listen on (an IP)
    pub host: String,
    /// Port to listen on (0 for random)
    pub port: u16,
    /// Shared mesh secret
    pub password: String,
    /// Our peer name in MAC form; random when unset
    pub peer_name: Option<String>,
    /// Human-readable name; the peer name when unset
    pub nickname: Option<String>,
    /// Gossip channel the cache publishes on
    pub channel: String,
    /// Seed peer addresses to connect to at start
    pub peers: Vec<String>,
    /// Log filter directive for the subscriber the host installs
    pub log_filter: String,
    /// Dissemination queue capacity
    pub queue_capacity: usize,
    /// Dial and handshake timeout in seconds
    pub connection_timeout_secs: u64,
    /// Delay before redialling a seed, in seconds
    pub reconnect_interval_secs: u64,
    /// Largest accepted gossip frame
    pub max_frame_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6783,
            password: String::new(),
            peer_name: None,
            nickname: None,
            channel: "meshcache".to_string(),
            peers: Vec::new(),
            log_filter: "info".to_string(),
            queue_capacity: 1024,
            connection_timeout_secs: 10,
            reconnect_interval_secs: 5,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    /// Create a new config builder
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn with_peer_name(mut self, peer_name: &str) -> Self {
        self.peer_name = Some(peer_name.to_string());
        self
    }

    pub fn with_nickname(mut self, nickname: &str) -> Self {
        self.nickname = Some(nickname.to_string());
        self
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = channel.to_string();
        self
    }

    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_log_filter(mut self, filter: &str) -> Self {
        self.log_filter = filter.to_string();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_reconnect_interval(mut self, secs: u64) -> Self {
        self.reconnect_interval_secs = secs;
        self
    }

    /// Fill in the identity fields left unset
    pub fn with_defaults(mut self) -> Self {
        if self.peer_name.is_none() {
            self.peer_name = Some(PeerName::random().to_string());
        }
        if self.nickname.is_none() {
            self.nickname = self.peer_name.clone();
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if let Some(name) = &self.peer_name {
            name.parse::<PeerName>()
                .map_err(|_| ConfigError::InvalidPeerName(name.clone()))?;
        }
        if self.channel.is_empty() {
            return Err(ConfigError::InvalidConfig("channel cannot be empty".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig("queue_capacity cannot be 0".to_string()));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::InvalidConfig("max_frame_bytes cannot be 0".to_string()));
        }
        Ok(())
    }

    /// The socket address to listen on
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.host.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// The configured peer name; random if unset
    pub fn resolved_peer_name(&self) -> Result<PeerName, ConfigError> {
        match &self.peer_name {
            Some(name) => name
                .parse()
                .map_err(|_| ConfigError::InvalidPeerName(name.clone())),
            None => Ok(PeerName::random()),
        }
    }

    /// Settings for the dissemination actor
    pub fn actor_config(&self) -> ActorConfig {
        ActorConfig::new().with_capacity(self.queue_capacity)
    }

    /// Settings for a TCP router
    pub fn router_config(&self) -> Result<TcpRouterConfig, ConfigError> {
        let peer_name = self.resolved_peer_name()?;
        let nickname = self
            .nickname
            .clone()
            .unwrap_or_else(|| peer_name.to_string());

        Ok(TcpRouterConfig::new()
            .with_bind_address(&self.host)
            .with_bind_port(self.port)
            .with_peer_name(peer_name)
            .with_nickname(&nickname)
            .with_password(&self.password)
            .with_connection_timeout(self.connection_timeout_secs)
            .with_reconnect_interval(self.reconnect_interval_secs)
            .with_max_frame_bytes(self.max_frame_bytes))
    }
}
