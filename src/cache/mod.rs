//! Session-scoped page cache.
//!
//! This module provides:
//! - A [`BlobStore`] abstraction over named partitions of cached responses
//! - In-memory and SQLite stores
//! - A [`CacheStore`] layer with get-or-fetch, a page ceiling and best-effort clearing
//! - Epoch tokens that keep stale fetches out of a freshly cleared cache

mod layer;
mod storage;
mod traits;

pub use layer::{CacheStore, FetchPolicy, DEFAULT_PAGE_LIMIT, DEFAULT_PARTITION};
pub use storage::{MemoryStore, SqliteStore};
pub use traits::{BlobStore, CachedResponse, EpochClock, EpochToken};
