// Memory Substrate - In-process mesh for tests and embedding
//
// Routers on the same MemoryNetwork reach each other by peer name.
// - Linking two routers exchanges full snapshots both ways
// - Broadcasts flood over links, and a hop relays only what changed
// - Seeds that are not running yet get linked once they start

use super::{GossipChannel, Gossiper, PeerName, Router, SubstrateError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

/// Delivery counters for a memory network
#[derive(Clone, Debug, Default)]
pub struct MemoryStats {
    pub broadcasts_delivered: u64,
    pub unicasts_delivered: u64,
    pub gossips_delivered: u64,
}

struct PeerSlot {
    nickname: String,
    running: bool,
    links: HashSet<PeerName>,
    seeds: HashSet<PeerName>,
    channels: HashMap<String, Arc<dyn Gossiper>>,
}

impl PeerSlot {
    fn new(nickname: &str) -> Self {
        Self {
            nickname: nickname.to_string(),
            running: false,
            links: HashSet::new(),
            seeds: HashSet::new(),
            channels: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct NetworkState {
    peers: HashMap<PeerName, PeerSlot>,
    stats: MemoryStats,
}

/// A relay hop waiting to be delivered: (at, came_from, payload)
type Hop = (PeerName, PeerName, Vec<u8>);

/// Shared in-process mesh
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new router to the network
    pub fn router(&self, name: PeerName, nickname: &str) -> MemoryRouter {
        self.state
            .lock()
            .peers
            .entry(name)
            .or_insert_with(|| PeerSlot::new(nickname));

        MemoryRouter {
            name,
            network: self.clone(),
        }
    }

    /// Check if two routers are linked
    pub fn is_linked(&self, a: PeerName, b: PeerName) -> bool {
        self.state
            .lock()
            .peers
            .get(&a)
            .map(|slot| slot.links.contains(&b))
            .unwrap_or(false)
    }

    /// Peers linked to `name`
    pub fn links(&self, name: PeerName) -> Vec<PeerName> {
        self.state
            .lock()
            .peers
            .get(&name)
            .map(|slot| slot.links.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Nickname of a router, if attached
    pub fn nickname(&self, name: PeerName) -> Option<String> {
        self.state
            .lock()
            .peers
            .get(&name)
            .map(|slot| slot.nickname.clone())
    }

    /// Cut the link between two routers (and forget them as seeds)
    pub fn disconnect(&self, a: PeerName, b: PeerName) {
        let mut state = self.state.lock();
        for (x, y) in [(a, b), (b, a)] {
            if let Some(slot) = state.peers.get_mut(&x) {
                slot.links.remove(&y);
                slot.seeds.remove(&y);
            }
        }
        debug!(a = %a, b = %b, "memory link cut");
    }

    /// Delivery statistics
    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats.clone()
    }

    // ========================================================================
    // LINKING
    // ========================================================================

    fn link(&self, a: PeerName, b: PeerName) {
        let shared = {
            let mut state = self.state.lock();
            let both_running = [a, b]
                .iter()
                .all(|p| state.peers.get(p).map(|s| s.running).unwrap_or(false));
            if !both_running || a == b {
                return;
            }

            let newly_linked = match state.peers.get_mut(&a) {
                Some(slot) => slot.links.insert(b),
                None => false,
            };
            if !newly_linked {
                return;
            }
            if let Some(slot) = state.peers.get_mut(&b) {
                slot.links.insert(a);
            }

            Self::shared_channels(&state, a, b)
        };

        debug!(a = %a, b = %b, channels = shared.len(), "memory link up");

        for (channel, ga, gb) in shared {
            let to_b = gb.on_gossip(&ga.snapshot());
            let to_a = ga.on_gossip(&gb.snapshot());
            self.record(|s| s.gossips_delivered += 2);

            let mut hops = Vec::new();
            if let Some(changed) = to_b {
                hops.push((b, a, changed));
            }
            if let Some(changed) = to_a {
                hops.push((a, b, changed));
            }
            // Relay what the exchange taught each side to the rest of its links
            for (at, from, payload) in hops {
                self.relay(&channel, from, self.next_hops(&channel, at, from, payload));
            }
        }
    }

    fn shared_channels(
        state: &NetworkState,
        a: PeerName,
        b: PeerName,
    ) -> Vec<(String, Arc<dyn Gossiper>, Arc<dyn Gossiper>)> {
        let (Some(sa), Some(sb)) = (state.peers.get(&a), state.peers.get(&b)) else {
            return Vec::new();
        };

        sa.channels
            .iter()
            .filter_map(|(name, ga)| {
                sb.channels
                    .get(name)
                    .map(|gb| (name.clone(), Arc::clone(ga), Arc::clone(gb)))
            })
            .collect()
    }

    fn connect_seeds(&self, name: PeerName) {
        let candidates: Vec<PeerName> = {
            let state = self.state.lock();
            let Some(me) = state.peers.get(&name) else {
                return;
            };
            state
                .peers
                .iter()
                .filter(|(other, slot)| {
                    **other != name
                        && slot.running
                        && (me.seeds.contains(*other) || slot.seeds.contains(&name))
                })
                .map(|(other, _)| *other)
                .collect()
        };

        for other in candidates {
            self.link(name, other);
        }
    }

    // ========================================================================
    // DELIVERY
    // ========================================================================

    /// Hops from `at` to each running link except `from`
    fn next_hops(&self, channel: &str, at: PeerName, from: PeerName, payload: Vec<u8>) -> Vec<Hop> {
        let state = self.state.lock();
        let Some(slot) = state.peers.get(&at) else {
            return Vec::new();
        };

        slot.links
            .iter()
            .filter(|next| **next != from)
            .filter(|next| {
                state
                    .peers
                    .get(*next)
                    .map(|s| s.running && s.channels.contains_key(channel))
                    .unwrap_or(false)
            })
            .map(|next| (*next, at, payload.clone()))
            .collect()
    }

    fn relay(&self, channel: &str, origin: PeerName, initial: Vec<Hop>) {
        let mut queue: VecDeque<Hop> = initial.into();

        while let Some((at, from, payload)) = queue.pop_front() {
            let gossiper = {
                let state = self.state.lock();
                state
                    .peers
                    .get(&at)
                    .filter(|slot| slot.running)
                    .and_then(|slot| slot.channels.get(channel).cloned())
            };
            let Some(gossiper) = gossiper else {
                continue;
            };

            let changed = gossiper.on_broadcast(origin, &payload);
            self.record(|s| s.broadcasts_delivered += 1);
            trace!(at = %at, from = %from, relayed = changed.is_some(), "memory broadcast hop");

            if let Some(changed) = changed {
                queue.extend(self.next_hops(channel, at, from, changed));
            }
        }
    }

    fn broadcast_from(&self, origin: PeerName, channel: &str, payload: Vec<u8>) -> Result<(), SubstrateError> {
        if !self.is_running(origin) {
            return Err(SubstrateError::NotRunning);
        }
        // The origin never hears its own broadcast back
        let hops = self.next_hops(channel, origin, origin, payload);
        self.relay(channel, origin, hops);
        Ok(())
    }

    fn unicast_from(
        &self,
        src: PeerName,
        dst: PeerName,
        channel: &str,
        payload: Vec<u8>,
    ) -> Result<(), SubstrateError> {
        let gossiper = {
            let state = self.state.lock();
            let src_running = state.peers.get(&src).map(|s| s.running).unwrap_or(false);
            if !src_running {
                return Err(SubstrateError::NotRunning);
            }
            state
                .peers
                .get(&dst)
                .filter(|slot| slot.running && slot.links.contains(&src))
                .and_then(|slot| slot.channels.get(channel).cloned())
        };

        let gossiper = gossiper.ok_or(SubstrateError::PeerUnreachable(dst))?;
        gossiper.on_unicast(src, &payload);
        self.record(|s| s.unicasts_delivered += 1);
        Ok(())
    }

    fn is_running(&self, name: PeerName) -> bool {
        self.state
            .lock()
            .peers
            .get(&name)
            .map(|s| s.running)
            .unwrap_or(false)
    }

    fn record(&self, update: impl FnOnce(&mut MemoryStats)) {
        update(&mut self.state.lock().stats);
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// A router attached to a MemoryNetwork
#[derive(Clone)]
pub struct MemoryRouter {
    name: PeerName,
    network: MemoryNetwork,
}

impl MemoryRouter {
    /// The network this router belongs to
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Router for MemoryRouter {
    async fn start(&self) -> Result<(), SubstrateError> {
        {
            let mut state = self.network.state.lock();
            let slot = state
                .peers
                .get_mut(&self.name)
                .ok_or(SubstrateError::PeerUnreachable(self.name))?;
            if slot.running {
                return Err(SubstrateError::AlreadyRunning);
            }
            slot.running = true;
        }

        debug!(peer = %self.name, "memory router started");
        self.network.connect_seeds(self.name);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubstrateError> {
        let mut state = self.network.state.lock();
        let links = {
            let slot = state
                .peers
                .get_mut(&self.name)
                .ok_or(SubstrateError::PeerUnreachable(self.name))?;
            if !slot.running {
                return Err(SubstrateError::NotRunning);
            }
            slot.running = false;
            std::mem::take(&mut slot.links)
        };

        for other in links {
            if let Some(slot) = state.peers.get_mut(&other) {
                slot.links.remove(&self.name);
            }
        }

        debug!(peer = %self.name, "memory router stopped");
        Ok(())
    }

    fn initiate_connections(&self, peers: &[String]) -> Vec<SubstrateError> {
        let mut errors = Vec::new();

        for address in peers {
            let target: PeerName = match address.parse() {
                Ok(name) => name,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            {
                let mut state = self.network.state.lock();
                if !state.peers.contains_key(&target) {
                    errors.push(SubstrateError::PeerUnreachable(target));
                    continue;
                }
                if let Some(slot) = state.peers.get_mut(&self.name) {
                    slot.seeds.insert(target);
                }
            }

            self.network.link(self.name, target);
        }

        errors
    }

    fn new_gossip(
        &self,
        channel: &str,
        gossiper: Arc<dyn Gossiper>,
    ) -> Result<Arc<dyn GossipChannel>, SubstrateError> {
        let mut state = self.network.state.lock();
        let slot = state
            .peers
            .get_mut(&self.name)
            .ok_or(SubstrateError::PeerUnreachable(self.name))?;

        if slot.channels.contains_key(channel) {
            return Err(SubstrateError::DuplicateChannel(channel.to_string()));
        }
        slot.channels.insert(channel.to_string(), gossiper);

        Ok(Arc::new(MemoryChannel {
            name: self.name,
            channel: channel.to_string(),
            network: self.network.clone(),
        }))
    }

    fn local_peer(&self) -> PeerName {
        self.name
    }
}

/// Send handle for one channel on a MemoryRouter
pub struct MemoryChannel {
    name: PeerName,
    channel: String,
    network: MemoryNetwork,
}

impl GossipChannel for MemoryChannel {
    fn broadcast(&self, payload: Vec<u8>) -> Result<(), SubstrateError> {
        self.network.broadcast_from(self.name, &self.channel, payload)
    }

    fn unicast(&self, dst: PeerName, payload: Vec<u8>) -> Result<(), SubstrateError> {
        self.network
            .unicast_from(self.name, dst, &self.channel, payload)
    }
}
