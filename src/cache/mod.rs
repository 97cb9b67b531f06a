//! Versioned app-shell cache: request/response snapshots and the
//! network-first serving strategy.
//!
//! The cache is organized as named stores, one per application version. The
//! offline controller pre-populates the current version's store at install
//! time, writes runtime snapshots opportunistically, and purges every other
//! store on activation.

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStore, MemoryCacheStore, SqliteCacheStore};
pub use traits::{CachedSnapshot, RequestKey, ResponseSnapshot, Served, ServeSource};
