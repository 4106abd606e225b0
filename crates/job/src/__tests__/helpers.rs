//! Shared helpers for the job store tests: tiny job constructors and a
//! hand-driven worker loop so tests control exactly when jobs run and
//! finish.

use std::time::Duration;

use loom_core::DirHandle;
use tokio_util::sync::CancellationToken;

use crate::{func, ClaimedJob, Job, JobId, JobStore, JobType, Priority};

pub fn dir(path: &str) -> DirHandle {
  DirHandle::new(path)
}

/// A job whose body does nothing and succeeds.
pub fn noop(dir_path: &str, job_type: JobType) -> Job {
  Job::new(dir(dir_path), job_type, func(|_ctx| async { Ok(()) }))
}

/// Claim the next runnable job of the tier, failing the test if none shows
/// up within a second.
pub async fn claim(store: &JobStore, priority: Priority) -> (JobId, ClaimedJob) {
  let cancel = CancellationToken::new();
  tokio::time::timeout(Duration::from_secs(1), store.await_next_job(&cancel, priority))
    .await
    .expect("a job should become runnable")
    .expect("await_next_job should succeed")
}

/// Claim, execute and finish the next runnable job of the tier the way a
/// worker would, without a scheduler in the loop.
pub async fn run_next(store: &JobStore, priority: Priority) -> JobId {
  let (id, claimed) = claim(store, priority).await;
  let ctx = claimed.ctx(CancellationToken::new());
  let outcome = (claimed.func)(ctx).await;
  store.finish_job(id, outcome, vec![]);
  id
}

/// Assert that no job of the tier becomes runnable within a short window.
pub async fn assert_no_runnable(store: &JobStore, priority: Priority) {
  let cancel = CancellationToken::new();
  let result = tokio::time::timeout(Duration::from_millis(100), store.await_next_job(&cancel, priority)).await;
  assert!(result.is_err(), "expected no runnable job in tier {priority:?}");
}
