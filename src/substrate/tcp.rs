// TCP Substrate - Gossip router over TCP/IP
//
// One listener plus one dialer per seed address. Every connection starts
// with a Hello handshake, then each side sends a Gossip snapshot per channel.
// Broadcasts are relayed to the other connections only when they changed
// local state, so a flood dies out once every peer has the value.

use super::frame::{password_digest, read_frame, write_frame, Frame};
use super::{GossipChannel, Gossiper, PeerName, Router, SubstrateError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, trace, warn};

// ============================================================================
// TCP ROUTER CONFIG
// ============================================================================

/// Configuration for the TCP router
#[derive(Debug, Clone)]
pub struct TcpRouterConfig {
    /// Address to bind to
    pub bind_address: String,
    /// Port to bind to (0 for random)
    pub bind_port: u16,
    /// Our identity on the mesh
    pub peer_name: PeerName,
    /// Human-readable name sent in the handshake
    pub nickname: String,
    /// Shared mesh secret; peers with a different one are refused
    pub password: String,
    /// Dial and handshake timeout in seconds
    pub connection_timeout_secs: u64,
    /// Delay before redialling a seed, in seconds
    pub reconnect_interval_secs: u64,
    /// Largest accepted frame body
    pub max_frame_bytes: usize,
    /// Outbound frames buffered per connection
    pub send_queue: usize,
    /// Maximum number of simultaneous connections
    pub max_connections: usize,
}

impl Default for TcpRouterConfig {
    fn default() -> Self {
        let peer_name = PeerName::random();
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 6783,
            peer_name,
            nickname: peer_name.to_string(),
            password: String::new(),
            connection_timeout_secs: 10,
            reconnect_interval_secs: 5,
            max_frame_bytes: 16 * 1024 * 1024,
            send_queue: 256,
            max_connections: 100,
        }
    }
}

impl TcpRouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, addr: &str) -> Self {
        self.bind_address = addr.to_string();
        self
    }

    pub fn with_bind_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }

    pub fn with_peer_name(mut self, peer_name: PeerName) -> Self {
        self.peer_name = peer_name;
        self
    }

    pub fn with_nickname(mut self, nickname: &str) -> Self {
        self.nickname = nickname.to_string();
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    pub fn with_reconnect_interval(mut self, secs: u64) -> Self {
        self.reconnect_interval_secs = secs;
        self
    }

    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    /// The socket address to listen on
    pub fn bind_socket_addr(&self) -> Result<SocketAddr, SubstrateError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| SubstrateError::InvalidAddress(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.bind_port))
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Counters for a TCP router
#[derive(Debug, Clone, Default)]
pub struct TcpRouterStats {
    /// Connections that completed the handshake
    pub connections_total: u64,
    /// Handshakes refused (bad password, self, duplicate)
    pub handshakes_rejected: u64,
    /// Frames queued for sending
    pub frames_sent: u64,
    /// Frames read from peers
    pub frames_received: u64,
    /// Frames dropped because a send queue was full or closed
    pub frames_dropped: u64,
}

// ============================================================================
// INTERNAL STATE
// ============================================================================

struct Connection {
    id: u64,
    nickname: String,
    address: SocketAddr,
    /// Peer that opened the TCP connection
    dialer: PeerName,
    sender: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct RouterState {
    running: bool,
    local_addr: Option<SocketAddr>,
    connections: HashMap<PeerName, Connection>,
    channels: HashMap<String, Arc<dyn Gossiper>>,
    tasks: Vec<JoinHandle<()>>,
    next_connection_id: u64,
    stats: TcpRouterStats,
}

struct Shared {
    config: TcpRouterConfig,
    auth: [u8; 32],
    state: Mutex<RouterState>,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn is_connected(&self, peer: PeerName) -> bool {
        self.state.lock().connections.contains_key(&peer)
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut state = self.state.lock();
        state.tasks.retain(|h| !h.is_finished());
        state.tasks.push(handle);
    }

    fn record(&self, update: impl FnOnce(&mut TcpRouterStats)) {
        update(&mut self.state.lock().stats);
    }

    fn gossiper(&self, channel: &str) -> Option<Arc<dyn Gossiper>> {
        self.state.lock().channels.get(channel).cloned()
    }

    fn check_hello(&self, frame: Frame) -> Result<(PeerName, String), SubstrateError> {
        match frame {
            Frame::Hello {
                peer,
                nickname,
                auth,
            } => {
                if auth != self.auth {
                    Err(SubstrateError::AuthenticationFailed)
                } else if peer == self.config.peer_name {
                    Err(SubstrateError::SelfConnection)
                } else {
                    Ok((peer, nickname))
                }
            }
            other => Err(SubstrateError::ProtocolViolation(format!(
                "expected hello, got {}",
                other.kind()
            ))),
        }
    }

    /// Record an established connection.
    ///
    /// When a peer already has a connection, both ends keep the one dialled
    /// by the lower peer name; replacing a connection drops its sender,
    /// which closes it.
    fn register(
        &self,
        peer: PeerName,
        nickname: String,
        address: SocketAddr,
        outbound: bool,
        sender: mpsc::Sender<Frame>,
    ) -> Result<u64, SubstrateError> {
        let dialer = if outbound { self.config.peer_name } else { peer };

        let mut state = self.state.lock();
        if !state.running {
            return Err(SubstrateError::NotRunning);
        }
        let replaces = match state.connections.get(&peer) {
            Some(existing) if dialer < existing.dialer => true,
            Some(_) => return Err(SubstrateError::AlreadyConnected(peer)),
            None => false,
        };
        if !replaces && state.connections.len() >= self.config.max_connections {
            return Err(SubstrateError::ConnectionFailed(
                "maximum connections reached".to_string(),
            ));
        }

        state.next_connection_id += 1;
        let id = state.next_connection_id;
        state.connections.insert(
            peer,
            Connection {
                id,
                nickname,
                address,
                dialer,
                sender,
            },
        );
        state.stats.connections_total += 1;
        if replaces {
            debug!(peer = %peer, dialer = %dialer, "replaced connection opened by higher peer name");
        }
        Ok(id)
    }

    fn unregister(&self, peer: PeerName, id: u64) {
        let mut state = self.state.lock();
        // A replacement connection may already hold the slot
        if state.connections.get(&peer).map(|c| c.id) == Some(id) {
            state.connections.remove(&peer);
        }
    }

    /// Encode a snapshot of every registered channel
    fn snapshots(&self) -> Vec<(String, Vec<u8>)> {
        let channels: Vec<(String, Arc<dyn Gossiper>)> = self
            .state
            .lock()
            .channels
            .iter()
            .map(|(name, g)| (name.clone(), Arc::clone(g)))
            .collect();

        channels
            .into_iter()
            .map(|(name, g)| (name, g.snapshot()))
            .collect()
    }

    fn send_to(&self, peer: PeerName, frame: Frame) -> bool {
        let mut state = self.state.lock();
        let sent = match state.connections.get(&peer) {
            Some(conn) => conn.sender.try_send(frame).is_ok(),
            None => return false,
        };
        if sent {
            state.stats.frames_sent += 1;
        } else {
            state.stats.frames_dropped += 1;
        }
        sent
    }

    /// Queue a frame on every connection except `except`. Returns how many took it.
    fn send_all_except(&self, frame: Frame, except: &[PeerName]) -> usize {
        let mut state = self.state.lock();
        let mut sent = 0;
        let mut dropped = 0;

        for (peer, conn) in &state.connections {
            if except.contains(peer) {
                continue;
            }
            if conn.sender.try_send(frame.clone()).is_ok() {
                sent += 1;
            } else {
                dropped += 1;
            }
        }

        state.stats.frames_sent += sent as u64;
        state.stats.frames_dropped += dropped;
        if dropped > 0 {
            warn!(kind = frame.kind(), dropped, "send queue full, frames dropped");
        }
        sent
    }

    fn dispatch(&self, from: PeerName, frame: Frame) {
        match frame {
            Frame::Hello { .. } => {
                debug!(peer = %from, "ignoring repeated hello");
            }

            Frame::Gossip { channel, payload } => {
                let Some(gossiper) = self.gossiper(&channel) else {
                    trace!(channel = %channel, "gossip for unknown channel");
                    return;
                };
                if let Some(changed) = gossiper.on_gossip(&payload) {
                    let relay = Frame::Broadcast {
                        channel,
                        origin: from,
                        payload: changed,
                    };
                    self.send_all_except(relay, &[from]);
                }
            }

            Frame::Broadcast {
                channel,
                origin,
                payload,
            } => {
                let Some(gossiper) = self.gossiper(&channel) else {
                    trace!(channel = %channel, "broadcast for unknown channel");
                    return;
                };
                if let Some(changed) = gossiper.on_broadcast(origin, &payload) {
                    let relay = Frame::Broadcast {
                        channel,
                        origin,
                        payload: changed,
                    };
                    self.send_all_except(relay, &[from, origin]);
                }
            }

            Frame::Unicast {
                channel,
                src,
                dst,
                payload,
            } => {
                if dst == self.config.peer_name {
                    if let Some(gossiper) = self.gossiper(&channel) {
                        gossiper.on_unicast(src, &payload);
                    }
                    return;
                }
                let forward = Frame::Unicast {
                    channel,
                    src,
                    dst,
                    payload,
                };
                if !self.send_to(dst, forward) {
                    debug!(src = %src, dst = %dst, "unicast for unreachable peer dropped");
                }
            }
        }
    }
}

// ============================================================================
// CONNECTION TASKS
// ============================================================================

async fn run_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    outbound: bool,
) -> Result<PeerName, SubstrateError> {
    let address = stream.peer_addr()?;
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = stream.into_split();

    let handshake_timeout = Duration::from_secs(shared.config.connection_timeout_secs);
    let hello = Frame::Hello {
        peer: shared.config.peer_name,
        nickname: shared.config.nickname.clone(),
        auth: shared.auth,
    };
    timeout(handshake_timeout, write_frame(&mut writer, &hello))
        .await
        .map_err(|_| SubstrateError::Timeout)??;
    let reply = timeout(
        handshake_timeout,
        read_frame(&mut reader, shared.config.max_frame_bytes),
    )
    .await
    .map_err(|_| SubstrateError::Timeout)??;

    let (sender, mut queue) = mpsc::channel::<Frame>(shared.config.send_queue);
    let registered = shared
        .check_hello(reply)
        .and_then(|(peer, nickname)| {
            shared
                .register(peer, nickname.clone(), address, outbound, sender.clone())
                .map(|id| (peer, nickname, id))
        });
    let (peer, nickname, id) = match registered {
        Ok(accepted) => accepted,
        Err(e) => {
            shared.record(|s| s.handshakes_rejected += 1);
            return Err(e);
        }
    };
    info!(peer = %peer, nickname = %nickname, address = %address, "peer connected");

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!(error = %e, "write failed");
                break;
            }
        }
    });

    // Bring the new peer up to date
    for (channel, payload) in shared.snapshots() {
        let queued = sender.try_send(Frame::Gossip { channel, payload }).is_ok();
        shared.record(|s| {
            if queued {
                s.frames_sent += 1;
            } else {
                s.frames_dropped += 1;
            }
        });
    }
    drop(sender);

    let reason = loop {
        match read_frame(&mut reader, shared.config.max_frame_bytes).await {
            Ok(frame) => {
                shared.record(|s| s.frames_received += 1);
                trace!(peer = %peer, kind = frame.kind(), "frame received");
                shared.dispatch(peer, frame);
            }
            Err(e) => break e,
        }
    };

    shared.unregister(peer, id);
    writer_task.abort();
    info!(peer = %peer, reason = %reason, "peer disconnected");
    Ok(peer)
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, address)) => {
                let conn_shared = Arc::clone(&shared);
                shared.spawn(async move {
                    if let Err(e) = run_connection(conn_shared, stream, false).await {
                        debug!(address = %address, error = %e, "inbound connection closed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed, listener stopping");
                break;
            }
        }
    }
}

async fn dial_loop(shared: Arc<Shared>, address: String) {
    let connect_timeout = Duration::from_secs(shared.config.connection_timeout_secs);
    let interval = Duration::from_secs(shared.config.reconnect_interval_secs)
        .max(Duration::from_millis(100));

    // Peer last reached at this address; no redial while it stays connected
    let mut known_peer: Option<PeerName> = None;

    while shared.is_running() {
        if !known_peer.is_some_and(|peer| shared.is_connected(peer)) {
            match timeout(connect_timeout, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => match run_connection(Arc::clone(&shared), stream, true).await {
                    Ok(peer) => known_peer = Some(peer),
                    Err(SubstrateError::AlreadyConnected(peer)) => known_peer = Some(peer),
                    Err(e) => debug!(address = %address, error = %e, "outbound connection closed"),
                },
                Ok(Err(e)) => debug!(address = %address, error = %e, "dial failed"),
                Err(_) => debug!(address = %address, "dial timed out"),
            }
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=interval.as_millis() as u64 / 2);
        sleep(interval + Duration::from_millis(jitter_ms)).await;
    }
}

fn check_address(address: &str) -> Result<(), SubstrateError> {
    let invalid = || SubstrateError::InvalidAddress(address.to_string());
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;
    Ok(())
}

// ============================================================================
// TCP ROUTER
// ============================================================================

/// Gossip router over TCP
pub struct TcpRouter {
    shared: Arc<Shared>,
}

impl TcpRouter {
    pub fn new(config: TcpRouterConfig) -> Self {
        let auth = password_digest(&config.password);
        Self {
            shared: Arc::new(Shared {
                config,
                auth,
                state: Mutex::new(RouterState::default()),
            }),
        }
    }

    /// Get the router configuration
    pub fn config(&self) -> &TcpRouterConfig {
        &self.shared.config
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.state.lock().local_addr
    }

    /// Peers with an established connection
    pub fn connected_peers(&self) -> Vec<PeerName> {
        self.shared.state.lock().connections.keys().copied().collect()
    }

    /// Nickname and address of a connected peer
    pub fn connection_info(&self, peer: PeerName) -> Option<(String, SocketAddr)> {
        self.shared
            .state
            .lock()
            .connections
            .get(&peer)
            .map(|c| (c.nickname.clone(), c.address))
    }

    /// Get router statistics
    pub fn stats(&self) -> TcpRouterStats {
        self.shared.state.lock().stats.clone()
    }
}

#[async_trait]
impl Router for TcpRouter {
    async fn start(&self) -> Result<(), SubstrateError> {
        if self.shared.is_running() {
            return Err(SubstrateError::AlreadyRunning);
        }

        let config = &self.shared.config;
        let bind_addr = config.bind_socket_addr()?;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| SubstrateError::ConnectionFailed(format!("{}: {}", bind_addr, e)))?;
        let local_addr = listener.local_addr()?;

        {
            let mut state = self.shared.state.lock();
            if state.running {
                return Err(SubstrateError::AlreadyRunning);
            }
            state.running = true;
            state.local_addr = Some(local_addr);
        }

        self.shared
            .spawn(accept_loop(Arc::clone(&self.shared), listener));
        info!(peer = %config.peer_name, address = %local_addr, "router listening");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubstrateError> {
        let tasks = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return Err(SubstrateError::NotRunning);
            }
            state.running = false;
            state.local_addr = None;
            state.connections.clear();
            std::mem::take(&mut state.tasks)
        };

        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        info!(peer = %self.shared.config.peer_name, "router stopped");
        Ok(())
    }

    fn initiate_connections(&self, peers: &[String]) -> Vec<SubstrateError> {
        if !self.shared.is_running() || tokio::runtime::Handle::try_current().is_err() {
            return peers.iter().map(|_| SubstrateError::NotRunning).collect();
        }

        let mut errors = Vec::new();
        for address in peers {
            if let Err(e) = check_address(address) {
                errors.push(e);
                continue;
            }
            debug!(address = %address, "dialling seed peer");
            self.shared
                .spawn(dial_loop(Arc::clone(&self.shared), address.clone()));
        }
        errors
    }

    fn new_gossip(
        &self,
        channel: &str,
        gossiper: Arc<dyn Gossiper>,
    ) -> Result<Arc<dyn GossipChannel>, SubstrateError> {
        let mut state = self.shared.state.lock();
        if state.channels.contains_key(channel) {
            return Err(SubstrateError::DuplicateChannel(channel.to_string()));
        }
        state.channels.insert(channel.to_string(), gossiper);

        Ok(Arc::new(TcpChannel {
            shared: Arc::clone(&self.shared),
            channel: channel.to_string(),
        }))
    }

    fn local_peer(&self) -> PeerName {
        self.shared.config.peer_name
    }
}

/// Send handle for one channel on a TcpRouter
pub struct TcpChannel {
    shared: Arc<Shared>,
    channel: String,
}

impl GossipChannel for TcpChannel {
    fn broadcast(&self, payload: Vec<u8>) -> Result<(), SubstrateError> {
        if !self.shared.is_running() {
            return Err(SubstrateError::NotRunning);
        }

        let frame = Frame::Broadcast {
            channel: self.channel.clone(),
            origin: self.shared.config.peer_name,
            payload,
        };
        let sent = self.shared.send_all_except(frame, &[]);
        trace!(channel = %self.channel, peers = sent, "broadcast queued");
        Ok(())
    }

    fn unicast(&self, dst: PeerName, payload: Vec<u8>) -> Result<(), SubstrateError> {
        if !self.shared.is_running() {
            return Err(SubstrateError::NotRunning);
        }

        let frame = Frame::Unicast {
            channel: self.channel.clone(),
            src: self.shared.config.peer_name,
            dst,
            payload,
        };
        if self.shared.send_to(dst, frame) {
            Ok(())
        } else {
            Err(SubstrateError::PeerUnreachable(dst))
        }
    }
}
