//! meshcache - A gossip-replicated, eventually consistent key/value cache
//!
//! Every node keeps a full in-memory copy. Writes apply locally first and
//! then spread to peers over a gossip mesh; conflicting writes resolve per
//! key by last-writer-wins, so reachable nodes converge once writes stop.
//!
//! - [`cache`]: entries and the last-writer-wins store
//! - [`sync`]: the node agent and the dissemination actor
//! - [`substrate`]: the mesh traits plus in-memory and TCP routers
//! - [`node`]: configuration and the [`MeshCache`] facade

pub mod cache;
pub mod node;
pub mod substrate;
pub mod sync;

pub use cache::{CacheValue, Entry, Store};
pub use node::{CacheConfig, MeshCache, NodeError, NodeState};
