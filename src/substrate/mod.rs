// Substrate module - THE MESH (abstract)
// Capability traits the cache consumes and implements, plus in-memory and TCP routers

mod frame;
mod memory;
mod peer_name;
mod tcp;
mod traits;

pub use traits::{
    // Consumed by the cache
    GossipChannel, Router,
    // Implemented by the cache
    Gossiper,
    // Errors
    SubstrateError,
};

pub use peer_name::PeerName;

pub use frame::{password_digest, read_frame, write_frame, Frame};

pub use memory::{MemoryChannel, MemoryNetwork, MemoryRouter, MemoryStats};

pub use tcp::{TcpChannel, TcpRouter, TcpRouterConfig, TcpRouterStats};
