//! The synchronization engine.
//!
//! Every host request goes through [`SyncEngine::handle_request`], which
//! decides whether the sort/filter epoch changed, wipes the cache once per
//! epoch, serves the requested page and kicks off a background sweep that
//! prefetches the rest of the epoch's pages.
//!
//! Session flags are flipped while holding a synchronous lock and before the
//! first await, so two overlapping requests for the same epoch can never
//! both clear the cache or both launch a sweep.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::cache::{BlobStore, CacheStore, EpochClock, EpochToken};
use crate::error::{Result, SyncError};
use crate::query::{Query, SortFilter};
use crate::request::RequestBuilder;
use crate::sweep::{self, Sweep, SweepPlan, SweepReport, SweepState};
use crate::transport::Transport;

/// Where the current epoch stands, derived from the session flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
  /// Sort/filter changed; cache not cleared yet
  Dirty,
  /// Cache cleared; sweep not launched yet
  Cleared,
  /// Sweep launched for this epoch
  Launched,
}

/// Per-engine record of the sort/filter epoch and its progress.
#[derive(Debug, Clone, Default)]
pub struct SyncSession {
  previous: SortFilter,
  current: SortFilter,
  cache_cleared: bool,
  synced: bool,
}

impl SyncSession {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fold a request's sort/filter into the session.
  ///
  /// Returns `true` when that makes it differ structurally from the last
  /// epoch, in which case a new epoch starts with both flags reset.
  pub fn observe(&mut self, query: &Query) -> bool {
    self.current.merge(query);
    if self.previous == self.current {
      return false;
    }

    self.previous = self.current.clone();
    self.cache_cleared = false;
    self.synced = false;
    true
  }

  pub fn sort_filter(&self) -> &SortFilter {
    &self.current
  }

  pub fn is_cache_cleared(&self) -> bool {
    self.cache_cleared
  }

  pub fn is_synced(&self) -> bool {
    self.synced
  }

  pub fn phase(&self) -> SessionPhase {
    match (self.cache_cleared, self.synced) {
      (true, true) => SessionPhase::Launched,
      (true, false) => SessionPhase::Cleared,
      _ => SessionPhase::Dirty,
    }
  }
}

/// Resolves single pages through the request builder and the cache.
struct PageFetcher<S: BlobStore, T: Transport> {
  cache: CacheStore<S>,
  transport: Arc<T>,
  builder: RequestBuilder,
}

impl<S: BlobStore, T: Transport> PageFetcher<S, T> {
  async fn fetch(&self, query: &Query, token: &EpochToken) -> Result<Value> {
    let requests = self.builder.pair(query)?;
    let transport = Arc::clone(&self.transport);
    self
      .cache
      .get_or_fetch(&requests, query.page, token, |request| async move {
        transport.fetch(&request).await
      })
      .await
  }

  /// Fetch `plan` sequentially for `query`, one page at a time.
  async fn sweep(&self, query: &Query, plan: SweepPlan, token: EpochToken) -> Result<SweepReport> {
    sweep::run(plan, token.clone(), |page| {
      let query = query.with_page(page);
      let token = token.clone();
      async move { self.fetch(&query, &token).await.map(|_| ()) }
    })
    .await
  }
}

impl<S: BlobStore, T: Transport> Clone for PageFetcher<S, T> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      transport: Arc::clone(&self.transport),
      builder: self.builder,
    }
  }
}

/// Prefetching page cache for one host.
pub struct SyncEngine<S: BlobStore, T: Transport> {
  fetcher: PageFetcher<S, T>,
  session: Mutex<SyncSession>,
  clock: EpochClock,
  sweep: Mutex<Sweep>,
}

impl<S: BlobStore + 'static, T: Transport + 'static> SyncEngine<S, T> {
  pub fn new(cache: CacheStore<S>, transport: T, builder: RequestBuilder) -> Self {
    Self {
      fetcher: PageFetcher {
        cache,
        transport: Arc::new(transport),
        builder,
      },
      session: Mutex::new(SyncSession::new()),
      clock: EpochClock::default(),
      sweep: Mutex::new(Sweep::idle()),
    }
  }

  pub fn cache(&self) -> &CacheStore<S> {
    &self.fetcher.cache
  }

  pub fn transport(&self) -> &T {
    &self.fetcher.transport
  }

  /// Snapshot of the session state.
  pub fn session(&self) -> SyncSession {
    self.lock_session().clone()
  }

  pub fn epoch(&self) -> u64 {
    self.clock.current()
  }

  pub fn sweep_state(&self) -> SweepState {
    self.lock_sweep().state()
  }

  /// Wait for the most recently launched sweep to stop.
  pub async fn wait_for_sweep(&self) -> SweepState {
    let watcher = self.lock_sweep().watcher();
    sweep::wait(watcher).await
  }

  /// Serve one host request and make sure its epoch is being prefetched.
  ///
  /// Returns the requested page's decoded data without waiting for the
  /// sweep. Fetch failures and [`SyncError::PageCount`] propagate; a failed
  /// cache clear is only logged.
  pub async fn handle_request(&self, query: Query) -> Result<Value> {
    let (query, token, needs_clear) = {
      let mut session = self.lock_session();
      if session.observe(&query) {
        let epoch = self.clock.advance();
        info!(epoch, "sort/filter changed, starting new cache epoch");
      }

      let needs_clear = !session.cache_cleared;
      session.cache_cleared = true;
      (
        query.with_sort_filter(session.sort_filter()),
        self.clock.token(),
        needs_clear,
      )
    };

    if needs_clear {
      match self.fetcher.cache.clear() {
        Ok(()) => debug!(epoch = token.epoch(), "cache cleared"),
        Err(e) => error!(error = %e, "failed to clear cache"),
      }
    }

    let data = self.fetcher.fetch(&query, &token).await?;

    let page_count = {
      let mut session = self.lock_session();
      if session.synced || !token.is_current() {
        None
      } else {
        let count = page_count(&data, query.page_size, self.fetcher.cache.page_limit())?;
        session.synced = true;
        Some(count)
      }
    };

    if let Some(page_count) = page_count {
      self.launch_sweep(query, page_count, token);
    }

    Ok(data)
  }

  /// Prefetch pages `start..=end` of `query` in the foreground.
  ///
  /// Does nothing when `start > end`.
  pub async fn background_sync(&self, query: &Query, start: u32, end: u32) -> Result<SweepReport> {
    self
      .fetcher
      .sweep(query, SweepPlan::new(start, end), self.clock.token())
      .await
  }

  /// Re-fetch a page and overwrite its cache entry if it has one.
  ///
  /// Never creates entries; returns whether one was replaced.
  pub async fn refresh(&self, query: &Query) -> Result<bool> {
    let query = query.with_sort_filter(self.lock_session().sort_filter());
    let requests = self.fetcher.builder.pair(&query)?;
    let response = self.fetcher.transport.fetch(&requests.network).await?;
    self.fetcher.cache.update(&requests.cache, &response)
  }

  fn launch_sweep(&self, query: Query, page_count: u32, token: EpochToken) {
    let fetcher = self.fetcher.clone();
    let epoch = token.epoch();
    info!(epoch, pages = page_count, "launching background sweep");

    let sweep = Sweep::spawn(async move {
      let result = fetcher.sweep(&query, SweepPlan::new(1, page_count), token).await;
      match &result {
        Ok(report) => info!(
          epoch,
          pages = report.pages_fetched,
          stopped_early = report.stopped_early,
          "background sweep finished"
        ),
        Err(e) => warn!(epoch, error = %e, "background sweep halted"),
      }
      result
    });

    // The previous sweep, if any, is detached rather than aborted.
    *self.lock_sweep() = sweep;
  }

  fn lock_session(&self) -> MutexGuard<'_, SyncSession> {
    self.session.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn lock_sweep(&self) -> MutexGuard<'_, Sweep> {
    self.sweep.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Number of pages implied by the first response, capped at `limit`.
fn page_count(data: &Value, page_size: u32, limit: u32) -> Result<u32> {
  let len = data
    .as_array()
    .map(Vec::len)
    .ok_or_else(|| SyncError::PageCount("response is not an array".to_string()))?;

  if page_size == 0 {
    return Err(SyncError::PageCount("page size is zero".to_string()));
  }

  let count = len / page_size as usize;
  Ok(count.min(limit as usize) as u32)
}
