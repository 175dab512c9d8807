//! Background page sweeps.
//!
//! A sweep walks a finite [`SweepPlan`] one page at a time, awaiting each
//! page before asking for the next. It runs as a spawned task whose
//! progress is published through a watch channel, so any number of callers
//! can check on it or wait for it without owning it.
//!
//! # Example
//!
//! ```ignore
//! let sweep = Sweep::spawn(async move { sweep::run(plan, token, fetch_page).await });
//!
//! // Later, without blocking
//! if sweep.state().is_running() { /* still prefetching */ }
//!
//! // Or wait for it
//! let state = sweep::wait(sweep.watcher()).await;
//! ```

use std::future::Future;
use std::ops::RangeInclusive;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::EpochToken;
use crate::error::Result;

/// Pages a sweep will visit, in order. Empty when `start > end`.
#[derive(Debug, Clone)]
pub struct SweepPlan(RangeInclusive<u32>);

impl SweepPlan {
  pub fn new(start: u32, end: u32) -> Self {
    Self(start..=end)
  }
}

impl Iterator for SweepPlan {
  type Item = u32;

  fn next(&mut self) -> Option<u32> {
    self.0.next()
  }
}

/// Outcome of a sweep that ran to its end or was overtaken by a new epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
  pub epoch: u64,
  pub pages_fetched: u32,
  /// The epoch changed before the plan was exhausted
  pub stopped_early: bool,
}

/// The state of the current epoch's sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepState {
  /// No sweep launched yet
  Idle,
  /// Pages are being fetched
  Synchronizing,
  /// The sweep finished
  Complete(SweepReport),
  /// A page failed and the sweep stopped there
  Failed(String),
}

impl SweepState {
  pub fn is_running(&self) -> bool {
    matches!(self, SweepState::Synchronizing)
  }

  pub fn report(&self) -> Option<&SweepReport> {
    match self {
      SweepState::Complete(report) => Some(report),
      _ => None,
    }
  }
}

/// Handle on a spawned sweep.
///
/// Dropping the handle detaches the task; it keeps running until its plan
/// is exhausted or its epoch goes stale.
pub struct Sweep {
  state: watch::Receiver<SweepState>,
  handle: Option<JoinHandle<()>>,
}

impl Sweep {
  pub fn idle() -> Self {
    let (_tx, rx) = watch::channel(SweepState::Idle);
    Self {
      state: rx,
      handle: None,
    }
  }

  /// Spawn `sweep` on the runtime and track its outcome.
  pub fn spawn<Fut>(sweep: Fut) -> Self
  where
    Fut: Future<Output = Result<SweepReport>> + Send + 'static,
  {
    let (tx, rx) = watch::channel(SweepState::Synchronizing);
    let handle = tokio::spawn(async move {
      let state = match sweep.await {
        Ok(report) => SweepState::Complete(report),
        Err(e) => SweepState::Failed(e.to_string()),
      };
      tx.send_replace(state);
    });

    Self {
      state: rx,
      handle: Some(handle),
    }
  }

  pub fn state(&self) -> SweepState {
    self.state.borrow().clone()
  }

  /// A receiver that can outlive this handle, for waiting.
  pub fn watcher(&self) -> watch::Receiver<SweepState> {
    self.state.clone()
  }

  pub fn is_finished(&self) -> bool {
    self.handle.as_ref().map_or(true, JoinHandle::is_finished)
  }
}

impl std::fmt::Debug for Sweep {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Sweep")
      .field("state", &*self.state.borrow())
      .field("finished", &self.is_finished())
      .finish()
  }
}

/// Wait until the watched sweep is no longer running.
pub async fn wait(mut watcher: watch::Receiver<SweepState>) -> SweepState {
  match watcher.wait_for(|state| !state.is_running()).await {
    Ok(state) => state.clone(),
    // Sender dropped without publishing: the task panicked
    Err(_) => SweepState::Failed("sweep task ended unexpectedly".to_string()),
  }
}

/// Walk `plan` sequentially, fetching each page with `fetch_page`.
///
/// Stops scheduling pages as soon as `token` goes stale; the first failing
/// page ends the sweep with its error.
pub async fn run<F, Fut>(plan: SweepPlan, token: EpochToken, mut fetch_page: F) -> Result<SweepReport>
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<()>>,
{
  let mut report = SweepReport {
    epoch: token.epoch(),
    pages_fetched: 0,
    stopped_early: false,
  };

  for page in plan {
    if !token.is_current() {
      debug!(epoch = token.epoch(), page, "epoch changed, sweep stopping");
      report.stopped_early = true;
      break;
    }

    fetch_page(page).await?;
    report.pages_fetched += 1;
  }

  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::EpochClock;
  use crate::error::SyncError;
  use std::sync::{Arc, Mutex};
  use std::time::Duration;

  #[test]
  fn test_plan_is_inclusive_and_empty_when_reversed() {
    assert_eq!(SweepPlan::new(1, 4).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    assert_eq!(SweepPlan::new(5, 3).count(), 0);
    assert_eq!(SweepPlan::new(u32::MAX, u32::MAX).count(), 1);
  }

  #[tokio::test]
  async fn test_run_visits_pages_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let token = EpochClock::default().token();

    let report = run(SweepPlan::new(2, 5), token, |page| {
      let seen = Arc::clone(&seen);
      async move {
        seen.lock().unwrap().push(page);
        Ok(())
      }
    })
    .await
    .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![2, 3, 4, 5]);
    assert_eq!(report.pages_fetched, 4);
    assert!(!report.stopped_early);
  }

  #[tokio::test]
  async fn test_run_with_reversed_range_fetches_nothing() {
    let mut calls = 0;
    let report = run(SweepPlan::new(5, 3), EpochClock::default().token(), |_| {
      calls += 1;
      async { Ok(()) }
    })
    .await
    .unwrap();

    assert_eq!(calls, 0);
    assert_eq!(report.pages_fetched, 0);
  }

  #[tokio::test]
  async fn test_run_stops_when_epoch_changes() {
    let clock = EpochClock::default();
    let token = clock.token();

    let report = run(SweepPlan::new(1, 10), token, |page| {
      if page == 3 {
        clock.advance();
      }
      async { Ok(()) }
    })
    .await
    .unwrap();

    assert_eq!(report.pages_fetched, 3);
    assert!(report.stopped_early);
  }

  #[tokio::test]
  async fn test_run_halts_on_first_error() {
    let mut visited = Vec::new();
    let err = run(SweepPlan::new(1, 5), EpochClock::default().token(), |page| {
      visited.push(page);
      async move {
        if page == 2 {
          Err(SyncError::Transport("boom".to_string()))
        } else {
          Ok(())
        }
      }
    })
    .await
    .unwrap_err();

    assert!(matches!(err, SyncError::Transport(_)));
    assert_eq!(visited, vec![1, 2]);
  }

  #[tokio::test]
  async fn test_spawned_sweep_publishes_outcome() {
    let sweep = Sweep::spawn(async {
      tokio::time::sleep(Duration::from_millis(20)).await;
      Ok(SweepReport {
        epoch: 1,
        pages_fetched: 4,
        stopped_early: false,
      })
    });
    assert_eq!(sweep.state(), SweepState::Synchronizing);

    let state = wait(sweep.watcher()).await;
    assert_eq!(state.report().map(|r| r.pages_fetched), Some(4));
    assert_eq!(sweep.state(), state);
  }

  #[tokio::test]
  async fn test_failed_sweep_reports_error() {
    let sweep = Sweep::spawn(async { Err(SyncError::PageCount("bad".to_string())) });
    let state = wait(sweep.watcher()).await;
    assert!(matches!(state, SweepState::Failed(msg) if msg.contains("bad")));
  }

  #[tokio::test]
  async fn test_idle_sweep_does_not_block_waiters() {
    let sweep = Sweep::idle();
    assert!(sweep.is_finished());
    assert_eq!(wait(sweep.watcher()).await, SweepState::Idle);
  }
}
