//! Stale-while-revalidate value cache.
//!
//! This module provides a key-value revalidation cache that:
//! - Returns cached values immediately, fresh or stale
//! - Refreshes stale values in the background and pushes them on an update channel
//! - Persists every entry in one manifest record of a durable key-value store
//! - Builds deterministic keys from ordered parts

mod key;
mod layer;
mod manifest;
mod storage;
mod traits;

pub use key::{build_key, hashed_key, KeyPart};
pub use layer::{GetOptions, RevalidationCache, DEFAULT_NAMESPACE};
pub use manifest::{CacheEntry, Manifest};
pub use storage::{KeyValueStore, MemoryStore, NoopStore, SqliteStore};
pub use traits::{CacheSource, Cacheable, Swr, Update, UpdateMeta};
