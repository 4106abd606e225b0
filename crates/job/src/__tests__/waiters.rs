//! Waiter semantics: set completion, transitive deferrals, cancellation.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use super::helpers::{claim, noop, run_next};
use crate::{JobFailure, JobStore, JobStoreError, JobType, Priority};

#[tokio::test]
async fn test_wait_on_empty_set_returns_immediately() {
  let store = JobStore::new();
  let cancel = CancellationToken::new();

  store.wait_for_jobs(&cancel, &[]).await.expect("empty set");
}

#[tokio::test]
async fn test_wait_returns_after_all_terminal() {
  let store = Arc::new(JobStore::new());
  let cancel = CancellationToken::new();

  let a = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");
  let b = store.enqueue_job(noop("/w/m", JobType::ParseVariables)).expect("enqueue");

  let waiter = {
    let store = store.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { store.wait_for_jobs(&cancel, &[a, b]).await })
  };

  run_next(&store, Priority::Normal).await;
  run_next(&store, Priority::Normal).await;

  tokio::time::timeout(Duration::from_secs(1), waiter)
    .await
    .expect("waiter should return")
    .expect("waiter task should not panic")
    .expect("all jobs succeeded");
}

#[tokio::test]
async fn test_wait_on_already_terminal_set() {
  let store = JobStore::new();
  let cancel = CancellationToken::new();

  let a = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");
  run_next(&store, Priority::Normal).await;

  store.wait_for_jobs(&cancel, &[a]).await.expect("already terminal");
}

#[tokio::test]
async fn test_wait_reports_first_failure_by_lowest_id() {
  let store = JobStore::new();
  let cancel = CancellationToken::new();

  let a = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");
  let b = store.enqueue_job(noop("/w/m", JobType::ParseVariables)).expect("enqueue");

  let (id, _claimed) = claim(&store, Priority::Normal).await;
  store.finish_job(id, Err(JobFailure::op("first")), vec![]);
  let (id, _claimed) = claim(&store, Priority::Normal).await;
  store.finish_job(id, Err(JobFailure::op("second")), vec![]);

  let err = store.wait_for_jobs(&cancel, &[b, a]).await.expect_err("both failed");
  assert_eq!(
    err,
    JobStoreError::JobFailed {
      id: a,
      failure: JobFailure::op("first"),
    }
  );
}

#[tokio::test]
async fn test_transitive_wait_includes_deferred_jobs() {
  let store = Arc::new(JobStore::new());
  let cancel = CancellationToken::new();

  let parse = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");

  let waiter = {
    let store = store.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { store.wait_for_jobs(&cancel, &[parse]).await })
  };

  // Finish the parse job with a deferred follow-up.
  let (id, _claimed) = claim(&store, Priority::Normal).await;
  let spawned = store.finish_job(id, Ok(()), vec![noop("/w/m", JobType::Validate)]);
  assert_eq!(spawned.len(), 1);

  // The waiter's effective set grew; it must not return yet.
  tokio::time::sleep(Duration::from_millis(100)).await;
  assert!(!waiter.is_finished(), "waiter must wait for the deferred job");

  run_next(&store, Priority::Normal).await;

  tokio::time::timeout(Duration::from_secs(1), waiter)
    .await
    .expect("waiter should return after the deferred job")
    .expect("waiter task should not panic")
    .expect("all jobs succeeded");
}

#[tokio::test]
async fn test_exact_wait_ignores_deferred_jobs() {
  let store = Arc::new(JobStore::new());
  let cancel = CancellationToken::new();

  let parse = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");

  let (id, _claimed) = claim(&store, Priority::Normal).await;
  store.finish_job(id, Ok(()), vec![noop("/w/m", JobType::Validate)]);

  // The deferred job is still queued, but the named id is terminal.
  store
    .wait_for_jobs_exact(&cancel, &[parse])
    .await
    .expect("named id is terminal");
}

#[tokio::test]
async fn test_cancelled_wait_leaves_jobs_running() {
  let store = Arc::new(JobStore::new());

  let a = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");

  let cancel = CancellationToken::new();
  let waiter = {
    let store = store.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { store.wait_for_jobs(&cancel, &[a]).await })
  };

  tokio::time::sleep(Duration::from_millis(50)).await;
  cancel.cancel();

  let result = tokio::time::timeout(Duration::from_secs(1), waiter)
    .await
    .expect("waiter should wake on cancellation")
    .expect("waiter task should not panic");
  assert_eq!(result, Err(JobStoreError::Cancelled));

  // The job is untouched and runs to its actual outcome; a later wait
  // observes it.
  let (id, _claimed) = claim(&store, Priority::Normal).await;
  store.finish_job(id, Err(JobFailure::op("boom")), vec![]);

  let fresh = CancellationToken::new();
  let err = store.wait_for_jobs(&fresh, &[a]).await.expect_err("job failed");
  assert_eq!(
    err,
    JobStoreError::JobFailed {
      id: a,
      failure: JobFailure::op("boom"),
    }
  );
}

#[tokio::test]
async fn test_blocked_wait_wakes_on_stop() {
  let store = Arc::new(JobStore::new());

  let a = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");

  let waiter = {
    let store = store.clone();
    tokio::spawn(async move {
      let cancel = CancellationToken::new();
      store.wait_for_jobs(&cancel, &[a]).await
    })
  };

  tokio::time::sleep(Duration::from_millis(50)).await;
  store.stop();

  let result = tokio::time::timeout(Duration::from_secs(1), waiter)
    .await
    .expect("waiter should wake on stop")
    .expect("waiter task should not panic");
  assert_eq!(result, Err(JobStoreError::Shutdown));
}
