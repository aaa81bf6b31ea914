// Node module - THE PUBLIC FACE
// Configuration, lifecycle and the get/put API of a cache node

mod config;
mod facade;

pub use config::{CacheConfig, ConfigError};
pub use facade::{MeshCache, NodeError, NodeState};
