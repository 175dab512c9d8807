//! Background prefetch and cache synchronizer for paginated APIs.
//!
//! The engine serves page requests through a session-scoped cache, wipes
//! that cache whenever the sort or filter changes, and prefetches the
//! remaining pages of the current sort/filter in the background so that
//! later page requests are cache hits.

pub mod cache;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod request;
pub mod sweep;
pub mod transport;
pub mod worker;

pub use engine::{SessionPhase, SyncEngine, SyncSession};
pub use error::SyncError;
pub use query::Query;
