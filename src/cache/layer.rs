//! Cache layer that orchestrates caching logic with network fetching.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::traits::{BlobStore, CachedResponse, EpochToken};
use crate::error::{Result, SyncError};
use crate::request::{RequestDescriptor, RequestPair};

/// Default ceiling on pages written per session.
pub const DEFAULT_PAGE_LIMIT: u32 = 500;

/// Default name of the partition holding this session's entries.
pub const DEFAULT_PARTITION: &str = "pageSyncCache";

/// What `get_or_fetch` does with the result of its cache lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
  /// Serve hits from the cache; fetch misses with the POST request.
  #[default]
  ReadThrough,
  /// Always fetch with the GET-shaped request and seed the cache with the
  /// result. The lookup is made but never short-circuits the network.
  NetworkFirst,
}

/// Capped cache over a [`BlobStore`] partition.
pub struct CacheStore<S: BlobStore> {
  storage: Arc<S>,
  partition: String,
  page_limit: u32,
  policy: FetchPolicy,
  /// Held across a clear, and across a write's epoch check and put, so a
  /// stale write cannot land after the clear of a newer epoch.
  write_guard: Arc<Mutex<()>>,
}

impl<S: BlobStore> CacheStore<S> {
  /// Create a cache layer writing into `partition` of the given store.
  pub fn new(storage: S, partition: impl Into<String>) -> Self {
    Self {
      storage: Arc::new(storage),
      partition: partition.into(),
      page_limit: DEFAULT_PAGE_LIMIT,
      policy: FetchPolicy::default(),
      write_guard: Arc::new(Mutex::new(())),
    }
  }

  pub fn with_page_limit(mut self, page_limit: u32) -> Self {
    self.page_limit = page_limit;
    self
  }

  pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn partition(&self) -> &str {
    &self.partition
  }

  pub fn page_limit(&self) -> u32 {
    self.page_limit
  }

  /// Drop this session's partition, leaving any others alone.
  ///
  /// Failures come back as [`SyncError::CacheClear`]; callers are expected
  /// to log them and carry on.
  pub fn clear(&self) -> Result<()> {
    let _guard = self.lock_writes();
    let names = self
      .storage
      .partition_names()
      .map_err(|e| SyncError::CacheClear(e.to_string()))?;

    for name in names.iter().filter(|name| **name == self.partition) {
      self
        .storage
        .delete_partition(name)
        .map_err(|e| SyncError::CacheClear(e.to_string()))?;
      debug!(partition = %name, "cache partition deleted");
    }

    Ok(())
  }

  /// Resolve a page through the cache, falling back to `fetch`.
  ///
  /// The response is written back when the page is within the limit, the
  /// partition has room and `token` still names the current epoch.
  pub async fn get_or_fetch<F, Fut>(
    &self,
    requests: &RequestPair,
    page: u32,
    token: &EpochToken,
    fetch: F,
  ) -> Result<Value>
  where
    F: FnOnce(RequestDescriptor) -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let key = requests.cache.cache_key();
    let cached = self.storage.get(&self.partition, &key)?;

    let response = match self.policy {
      FetchPolicy::ReadThrough => {
        if let Some(hit) = cached {
          debug!(%key, page, "cache hit");
          return hit.json();
        }
        debug!(%key, page, "cache miss");
        fetch(requests.network.clone()).await?
      }
      FetchPolicy::NetworkFirst => {
        debug!(%key, page, cached = cached.is_some(), "fetching regardless of cache");
        fetch(requests.cache.clone()).await?
      }
    };

    let data = response.json()?;
    if let Err(e) = self.write(&key, page, token, &response) {
      warn!(%key, page, error = %e, "failed to write page to cache");
    }
    Ok(data)
  }

  /// Overwrite the entry for `request` if, and only if, one exists.
  ///
  /// Returns whether an entry was replaced.
  pub fn update(&self, request: &RequestDescriptor, response: &CachedResponse) -> Result<bool> {
    let key = request.cache_key();
    let exists = self
      .storage
      .contains(&self.partition, &key)
      .map_err(|e| SyncError::CacheUpdate(e.to_string()))?;

    if exists {
      self
        .storage
        .put(&self.partition, &key, response)
        .map_err(|e| SyncError::CacheUpdate(e.to_string()))?;
      debug!(%key, "cache entry updated");
    }

    Ok(exists)
  }

  fn write(&self, key: &str, page: u32, token: &EpochToken, response: &CachedResponse) -> Result<bool> {
    if page > self.page_limit {
      debug!(key, page, limit = self.page_limit, "page beyond limit, not cached");
      return Ok(false);
    }

    let _guard = self.lock_writes();
    if !self.storage.contains(&self.partition, key)?
      && self.storage.len(&self.partition)? >= self.page_limit as usize
    {
      debug!(key, page, limit = self.page_limit, "cache full, not cached");
      return Ok(false);
    }

    // Checked last so nothing sits between the epoch check and the put
    if !token.is_current() {
      debug!(key, page, epoch = token.epoch(), "stale epoch, discarding write");
      return Ok(false);
    }

    self.storage.put(&self.partition, key, response)?;
    Ok(true)
  }

  fn lock_writes(&self) -> MutexGuard<'_, ()> {
    self.write_guard.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<S: BlobStore> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      partition: self.partition.clone(),
      page_limit: self.page_limit,
      policy: self.policy,
      write_guard: Arc::clone(&self.write_guard),
    }
  }
}
