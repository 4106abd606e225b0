//! Dispatch order, dependency gating, failure cascade, and shutdown.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::helpers::{assert_no_runnable, claim, dir, noop, run_next};
use crate::{func, Job, JobFailure, JobId, JobState, JobStore, JobStoreError, JobType, Priority};

#[tokio::test]
async fn test_fifo_within_tier() {
  let store = JobStore::new();

  let a = store.enqueue_job(noop("/w/a", JobType::ParseConfig)).expect("enqueue");
  let b = store.enqueue_job(noop("/w/b", JobType::ParseConfig)).expect("enqueue");
  let c = store.enqueue_job(noop("/w/c", JobType::ParseConfig)).expect("enqueue");

  assert_eq!(run_next(&store, Priority::Normal).await, a);
  assert_eq!(run_next(&store, Priority::Normal).await, b);
  assert_eq!(run_next(&store, Priority::Normal).await, c);
}

#[tokio::test]
async fn test_strict_tier_isolation() {
  let store = JobStore::new();

  store
    .enqueue_job(noop("/w/m", JobType::FetchRegistryModule).priority(Priority::Low))
    .expect("enqueue");

  // A normal-tier worker never sees the low-tier job.
  assert_no_runnable(&store, Priority::Normal).await;
  run_next(&store, Priority::Low).await;
}

#[tokio::test]
async fn test_dependency_gates_dispatch() {
  let store = JobStore::new();

  let parse = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");
  let meta = store
    .enqueue_job(noop("/w/m", JobType::LoadMetadata).depends_on([parse]))
    .expect("enqueue");

  let (id, claimed) = claim(&store, Priority::Normal).await;
  assert_eq!(id, parse);

  // Dependency still running: the dependent stays blocked.
  assert_eq!(store.job_state(meta), Some(JobState::Blocked));
  assert_no_runnable(&store, Priority::Normal).await;

  let outcome = (claimed.func)(claimed.ctx(CancellationToken::new())).await;
  store.finish_job(parse, outcome, vec![]);

  assert_eq!(run_next(&store, Priority::Normal).await, meta);
}

#[tokio::test]
async fn test_failure_cascades_to_transitive_dependents() {
  let store = JobStore::new();

  let parse = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");
  let meta = store
    .enqueue_job(noop("/w/m", JobType::LoadMetadata).depends_on([parse]))
    .expect("enqueue");
  let targets = store
    .enqueue_job(noop("/w/m", JobType::DecodeReferenceTargets).depends_on([meta]))
    .expect("enqueue");

  let (id, _claimed) = claim(&store, Priority::Normal).await;
  assert_eq!(id, parse);
  store.finish_job(parse, Err(JobFailure::op("syntax error")), vec![]);

  // Each cascaded job records its immediate failed dependency as the cause.
  assert_eq!(store.job_state(meta), Some(JobState::Failed));
  assert_eq!(store.job_failure(meta), Some(JobFailure::DependencyFailed(parse)));
  assert_eq!(store.job_state(targets), Some(JobState::Failed));
  assert_eq!(store.job_failure(targets), Some(JobFailure::DependencyFailed(meta)));
}

#[tokio::test]
async fn test_dependency_on_succeeded_job_is_satisfied() {
  let store = JobStore::new();

  let parse = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");
  run_next(&store, Priority::Normal).await;

  let meta = store
    .enqueue_job(noop("/w/m", JobType::LoadMetadata).depends_on([parse]))
    .expect("enqueue");
  assert_eq!(store.job_state(meta), Some(JobState::Queued));
  assert_eq!(run_next(&store, Priority::Normal).await, meta);
}

#[tokio::test]
async fn test_dependency_on_failed_job_fails_at_enqueue() {
  let store = JobStore::new();

  let parse = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");
  let (id, _claimed) = claim(&store, Priority::Normal).await;
  store.finish_job(id, Err(JobFailure::op("boom")), vec![]);

  let meta = store
    .enqueue_job(noop("/w/m", JobType::LoadMetadata).depends_on([parse]))
    .expect("enqueue");
  assert_eq!(store.job_state(meta), Some(JobState::Failed));
  assert_eq!(store.job_failure(meta), Some(JobFailure::DependencyFailed(parse)));
}

#[tokio::test]
async fn test_unknown_dependency_rejected() {
  let store = JobStore::new();

  let err = store
    .enqueue_job(noop("/w/m", JobType::LoadMetadata).depends_on([JobId(42)]))
    .expect_err("forward reference should be rejected");
  assert_eq!(err, JobStoreError::UnknownDependency(JobId(42)));
  assert!(store.is_empty(), "rejected enqueue must leave the store unchanged");
}

#[tokio::test]
async fn test_self_dependency_rejected_as_cycle() {
  let store = JobStore::new();

  // The next id to be assigned is 0; depending on it is a length-1 cycle.
  let err = store
    .enqueue_job(noop("/w/m", JobType::ParseConfig).depends_on([JobId(0)]))
    .expect_err("self reference should be rejected");
  assert_eq!(err, JobStoreError::DependencyCycle(JobId(0)));
  assert!(store.is_empty());
}

#[tokio::test]
async fn test_enqueue_and_await_fail_fast_after_stop() {
  let store = JobStore::new();
  store.stop();

  let err = store
    .enqueue_job(noop("/w/m", JobType::ParseConfig))
    .expect_err("enqueue after stop");
  assert_eq!(err, JobStoreError::Shutdown);

  let cancel = CancellationToken::new();
  let err = store
    .await_next_job(&cancel, Priority::Normal)
    .await
    .expect_err("await after stop");
  assert_eq!(err, JobStoreError::Shutdown);
}

#[tokio::test]
async fn test_blocked_await_wakes_on_stop() {
  let store = std::sync::Arc::new(JobStore::new());

  let waiting = {
    let store = store.clone();
    tokio::spawn(async move {
      let cancel = CancellationToken::new();
      store.await_next_job(&cancel, Priority::Normal).await
    })
  };

  tokio::time::sleep(Duration::from_millis(50)).await;
  store.stop();

  let result = tokio::time::timeout(Duration::from_secs(1), waiting)
    .await
    .expect("await should wake on stop")
    .expect("worker task should not panic");
  assert_eq!(result.map(|(id, _)| id), Err(JobStoreError::Shutdown));
}

#[tokio::test]
async fn test_await_returns_cancelled() {
  let store = JobStore::new();
  let cancel = CancellationToken::new();

  let pending = store.await_next_job(&cancel, Priority::Normal);
  cancel.cancel();

  let result = tokio::time::timeout(Duration::from_secs(1), pending)
    .await
    .expect("await should wake on cancellation");
  assert_eq!(result.map(|(id, _)| id), Err(JobStoreError::Cancelled));
}

#[tokio::test]
#[should_panic(expected = "not running")]
async fn test_finish_on_non_running_job_panics() {
  let store = JobStore::new();
  let id = store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");
  store.finish_job(id, Ok(()), vec![]);
}

#[tokio::test]
async fn test_terminal_records_superseded_by_newer_instance() {
  let store = JobStore::new();

  store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");
  run_next(&store, Priority::Normal).await;
  assert_eq!(store.len(), 1);

  store.enqueue_job(noop("/w/m", JobType::ParseConfig)).expect("enqueue");
  run_next(&store, Priority::Normal).await;

  // Only the newest terminal record per (dir, type) is retained.
  assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_body_error_recorded_on_job() {
  let store = JobStore::new();

  let id = store
    .enqueue_job(Job::new(
      dir("/w/m"),
      JobType::ParseConfig,
      func(|_ctx| async { Err(JobFailure::op("unclosed block")) }),
    ))
    .expect("enqueue");

  run_next(&store, Priority::Normal).await;
  assert_eq!(store.job_state(id), Some(JobState::Failed));
  assert_eq!(store.job_failure(id), Some(JobFailure::op("unclosed block")));
}
