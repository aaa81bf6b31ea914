// MeshCache - The public cache node
//
// Wires a NodeAgent, a Disseminator and a Router together.
// Lifecycle: Created -> Running -> Stopped (terminal).
// Reads and writes are always local; writes reach peers through the actor.

use super::config::{CacheConfig, ConfigError};
use crate::cache::CacheValue;
use crate::substrate::{GossipChannel, PeerName, Router, SubstrateError, TcpRouter};
use crate::sync::{ActorError, ActorStats, AgentStats, Disseminator, NodeAgent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from the cache node
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Substrate error: {0}")]
    Substrate(#[from] SubstrateError),

    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    #[error("Invalid state: expected {expected:?}, was {actual:?}")]
    InvalidState {
        expected: NodeState,
        actual: NodeState,
    },
}

/// Lifecycle state of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Running,
    Stopped,
}

/// A replicated cache node
pub struct MeshCache<V, R = TcpRouter> {
    router: R,
    agent: Arc<NodeAgent<V>>,
    channel: Arc<dyn GossipChannel>,
    actor: Disseminator,
    peers: Vec<String>,
    state: NodeState,
}

impl<V: CacheValue> MeshCache<V, TcpRouter> {
    /// Build a node on a TCP router described by `config`
    pub fn new(config: CacheConfig) -> Result<Self, NodeError> {
        let config = config.with_defaults();
        config.validate()?;
        let router = TcpRouter::new(config.router_config()?);
        Self::with_router(config, router)
    }
}

impl<V: CacheValue, R: Router> MeshCache<V, R> {
    /// Build a node on an existing router.
    ///
    /// The router carries its own identity and listen settings; from
    /// `config` only the channel, seed peers and queue capacity are used.
    pub fn with_router(config: CacheConfig, router: R) -> Result<Self, NodeError> {
        config.validate()?;

        let agent = Arc::new(NodeAgent::new());
        let channel = router.new_gossip(&config.channel, agent.clone())?;
        let actor = Disseminator::new(config.actor_config());

        debug!(peer = %router.local_peer(), channel = %config.channel, "cache node created");

        Ok(Self {
            router,
            agent,
            channel,
            actor,
            peers: config.peers,
            state: NodeState::Created,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Our peer name
    pub fn peer_name(&self) -> PeerName {
        self.router.local_peer()
    }

    /// The underlying router
    pub fn router(&self) -> &R {
        &self.router
    }

    /// The node agent holding the store
    pub fn agent(&self) -> &Arc<NodeAgent<V>> {
        &self.agent
    }

    /// Number of stored entries, including masked ones
    pub fn len(&self) -> usize {
        self.agent.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.agent.is_empty()
    }

    /// Inbound gossip statistics
    pub fn agent_stats(&self) -> AgentStats {
        self.agent.stats()
    }

    /// Dissemination statistics
    pub fn actor_stats(&self) -> ActorStats {
        self.actor.stats()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Start listening, dial the seed peers, start disseminating
    pub async fn start(&mut self) -> Result<(), NodeError> {
        self.expect_state(NodeState::Created)?;

        self.router.start().await?;
        for error in self.router.initiate_connections(&self.peers) {
            warn!(error = %error, "seed peer not usable");
        }
        if let Err(e) = self.actor.start() {
            if let Err(rollback) = self.router.stop().await {
                warn!(error = %rollback, "failed to stop router after actor start failed");
            }
            return Err(e.into());
        }

        self.state = NodeState::Running;
        info!(peer = %self.peer_name(), seeds = self.peers.len(), "cache node running");
        Ok(())
    }

    /// Stop disseminating and stop the router.
    ///
    /// The dissemination worker has exited when this returns. Not reentrant.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        self.expect_state(NodeState::Running)?;

        self.actor.shutdown().await;
        self.state = NodeState::Stopped;
        let unsent = self.agent.pending_len();
        if unsent > 0 {
            debug!(keys = unsent, "writes still pending at stop were not broadcast");
        }
        self.router.stop().await?;

        info!(peer = %self.peer_name(), "cache node stopped");
        Ok(())
    }

    fn expect_state(&self, expected: NodeState) -> Result<(), NodeError> {
        if self.state != expected {
            return Err(NodeError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    // ========================================================================
    // CACHE API
    // ========================================================================

    /// Read a key locally. Expired keys read as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        self.agent.get(key)
    }

    /// Write a key locally, then queue its broadcast.
    ///
    /// A zero `ttl` never expires. The write is visible to `get` on return.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if self.state == NodeState::Stopped {
            self.agent.put(key, value, ttl);
            debug!("node stopped, write kept local");
            return;
        }

        self.agent.put_and_queue(key, value, ttl);
        let agent = Arc::clone(&self.agent);
        let channel = Arc::clone(&self.channel);

        if let Err(e) = self
            .actor
            .submit(Box::new(move || flush_pending(&agent, channel.as_ref())))
        {
            debug!(error = %e, "broadcast not queued, write kept local");
        }
    }
}

/// Broadcast everything the agent has pending, as one delta
fn flush_pending<V: CacheValue>(agent: &NodeAgent<V>, channel: &dyn GossipChannel) {
    let Some(batch) = agent.take_pending() else {
        return;
    };

    let keys = batch.len();
    match batch.to_bytes() {
        Ok(payload) => match channel.broadcast(payload) {
            Ok(()) => debug!(keys, "broadcast delta"),
            Err(e) => warn!(keys, error = %e, "broadcast failed"),
        },
        Err(e) => warn!(keys, error = %e, "failed to encode delta"),
    }
}
