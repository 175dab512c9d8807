//! Core traits and types for the caching system.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Blob store holding cached responses in named partitions.
///
/// Implementors only need get/put semantics; the cache layer decides what
/// gets written and when partitions are dropped.
pub trait BlobStore: Send + Sync {
  /// Names of all partitions currently holding entries.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Drop a partition and everything in it. Returns whether it existed.
  fn delete_partition(&self, partition: &str) -> Result<bool>;

  /// Look up a cached response.
  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Insert or overwrite a cached response.
  fn put(&self, partition: &str, key: &str, response: &CachedResponse) -> Result<()>;

  /// Number of entries in a partition.
  fn len(&self, partition: &str) -> Result<usize>;

  fn contains(&self, partition: &str, key: &str) -> Result<bool> {
    Ok(self.get(partition, key)?.is_some())
  }
}

/// A complete response as returned by a transport and stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  /// When the response came off the wire
  pub fetched_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn new(status: u16, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
      fetched_at: Utc::now(),
    }
  }

  /// A 200 response carrying `value` as its JSON body.
  pub fn from_json(value: &Value) -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    Self::new(200, headers, value.to_string().into_bytes())
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Decode the body as JSON.
  pub fn json(&self) -> Result<Value> {
    Ok(serde_json::from_slice(&self.body)?)
  }
}

/// Source of epoch numbers shared by the engine and its cache writers.
#[derive(Debug, Clone, Default)]
pub struct EpochClock(Arc<AtomicU64>);

impl EpochClock {
  pub fn current(&self) -> u64 {
    self.0.load(Ordering::SeqCst)
  }

  /// Start a new epoch; tokens from earlier epochs become stale.
  pub fn advance(&self) -> u64 {
    self.0.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// Token for the epoch that is current right now.
  pub fn token(&self) -> EpochToken {
    EpochToken {
      issued: self.current(),
      clock: self.clone(),
    }
  }
}

/// Proof that a fetch belongs to a particular epoch.
///
/// Checked right before a cache write so that a response fetched for an
/// old sort/filter never lands in a cache cleared for the new one.
#[derive(Debug, Clone)]
pub struct EpochToken {
  issued: u64,
  clock: EpochClock,
}

impl EpochToken {
  pub fn epoch(&self) -> u64 {
    self.issued
  }

  pub fn is_current(&self) -> bool {
    self.clock.current() == self.issued
  }
}
