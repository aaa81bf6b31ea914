// Substrate Traits - The contract between the cache and the gossip mesh
//
// The cache consumes Router and GossipChannel, and implements Gossiper.
// Peer registries, sockets and relay decisions stay behind these traits.

use super::PeerName;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Errors raised by a gossip substrate
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubstrateError {
    #[error("Invalid peer name: {0}")]
    InvalidPeerName(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Router already running")]
    AlreadyRunning,

    #[error("Router not running")]
    NotRunning,

    #[error("Gossip channel already registered: {0}")]
    DuplicateChannel(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(PeerName),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Connection to self")]
    SelfConnection,

    #[error("Already connected to {0}")]
    AlreadyConnected(PeerName),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Connection timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for SubstrateError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

// ============================================================================
// CAPABILITIES CONSUMED BY THE CACHE
// ============================================================================

/// Lifecycle and membership of the local mesh router
#[async_trait]
pub trait Router: Send + Sync {
    /// Start listening for peers
    async fn start(&self) -> Result<(), SubstrateError>;

    /// Stop listening and drop every connection
    async fn stop(&self) -> Result<(), SubstrateError>;

    /// Start connecting to seed peers.
    ///
    /// Returns one error per address that could not be used; the rest
    /// are dialled in the background.
    fn initiate_connections(&self, peers: &[String]) -> Vec<SubstrateError>;

    /// Register a gossiper on a named channel and get its send handle
    fn new_gossip(
        &self,
        channel: &str,
        gossiper: Arc<dyn Gossiper>,
    ) -> Result<Arc<dyn GossipChannel>, SubstrateError>;

    /// Our own peer name
    fn local_peer(&self) -> PeerName;
}

/// Outbound send handle for one gossip channel.
///
/// Both calls hand the payload to the substrate and return without waiting
/// for delivery.
pub trait GossipChannel: Send + Sync {
    /// Send to every peer, relayed through the mesh
    fn broadcast(&self, payload: Vec<u8>) -> Result<(), SubstrateError>;

    /// Send to one peer only
    fn unicast(&self, dst: PeerName, payload: Vec<u8>) -> Result<(), SubstrateError>;
}

// ============================================================================
// CAPABILITY IMPLEMENTED BY THE CACHE
// ============================================================================

/// Callbacks the substrate invokes on inbound gossip
pub trait Gossiper: Send + Sync {
    /// An incremental broadcast arrived. Returns the encoded subset that
    /// changed local state, or None if there is nothing worth relaying.
    fn on_broadcast(&self, src: PeerName, payload: &[u8]) -> Option<Vec<u8>>;

    /// A message addressed to this node only
    fn on_unicast(&self, src: PeerName, payload: &[u8]);

    /// A full-state exchange from a peer. Returns what changed, like on_broadcast.
    fn on_gossip(&self, payload: &[u8]) -> Option<Vec<u8>>;

    /// Encode the complete local state for a peer that needs to catch up
    fn snapshot(&self) -> Vec<u8>;
}
