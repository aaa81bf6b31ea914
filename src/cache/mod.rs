// Cache module - THE REPLICATED STATE
// Versioned entries and the last-writer-wins store that converges across nodes

mod entry;
mod store;

pub use entry::{now_nanos, Entry, NEVER_EXPIRES};
pub use store::Store;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from cache encoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Failed to encode store: {0}")]
    EncodingFailed(String),

    #[error("Failed to decode store: {0}")]
    DecodingFailed(String),
}

/// Bound for values that can live in a replicated cache
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
