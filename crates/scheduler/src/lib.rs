//! Worker pool driving one priority tier of the job store.
//!
//! Each worker repeatedly claims the next runnable job of its tier, runs the
//! body with the worker's cancellation token in the execution context, runs
//! the deferral hook with the body's outcome, and reports both back to the
//! store in one atomic finish. A process typically runs two schedulers: a
//! wide one for the normal tier and a single-worker one for low-priority
//! background fetches, so network traffic cannot starve interactive work.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use job::{ClaimedJob, JobFailure, JobId, JobStore, JobStoreError, Priority};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub struct Scheduler {
  store: Arc<JobStore>,
  priority: Priority,
  parallelism: usize,
  cancel: CancellationToken,
  workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
  /// Create a scheduler serving one tier with the given worker count.
  /// A parallelism of zero is clamped to one.
  pub fn new(store: Arc<JobStore>, parallelism: usize, priority: Priority) -> Self {
    Self {
      store,
      priority,
      parallelism: parallelism.max(1),
      cancel: CancellationToken::new(),
      workers: Vec::new(),
    }
  }

  pub fn parallelism(&self) -> usize {
    self.parallelism
  }

  /// Spawn the worker tasks.
  pub fn start(&mut self) {
    info!(priority = ?self.priority, parallelism = self.parallelism, "starting scheduler");
    for worker in 0..self.parallelism {
      let store = self.store.clone();
      let cancel = self.cancel.clone();
      let priority = self.priority;
      self
        .workers
        .push(tokio::spawn(eval_loop(store, cancel, priority, worker)));
    }
  }

  /// Cancel the workers and wait for each to drain its current job to a
  /// terminal state. After this returns, no job of this tier executes.
  pub async fn stop(&mut self) {
    self.cancel.cancel();
    for worker in self.workers.drain(..) {
      if let Err(err) = worker.await {
        // Body panics are contained in the eval loop; a join error here is a
        // bug in the scheduler itself.
        error!(error = %err, "worker task panicked");
      }
    }
    debug!(priority = ?self.priority, "scheduler stopped");
  }
}

async fn eval_loop(store: Arc<JobStore>, cancel: CancellationToken, priority: Priority, worker: usize) {
  debug!(worker, priority = ?priority, "worker started");

  loop {
    let (id, claimed) = match store.await_next_job(&cancel, priority).await {
      Ok(next) => next,
      Err(JobStoreError::Cancelled | JobStoreError::Shutdown) => break,
      Err(err) => {
        error!(worker, error = %err, "failed to obtain next job");
        break;
      }
    };

    let span = info_span!("job", job_id = %id, job_type = %claimed.job_type, dir = %claimed.dir);
    run_one(&store, &cancel, id, claimed).instrument(span).await;

    if cancel.is_cancelled() {
      break;
    }
  }

  debug!(worker, "worker stopped");
}

/// Run one claimed job: body, deferral hook, atomic finish.
async fn run_one(store: &JobStore, cancel: &CancellationToken, id: JobId, claimed: ClaimedJob) {
  let ctx = claimed.ctx(cancel.clone());

  let outcome = match AssertUnwindSafe((claimed.func)(ctx.clone())).catch_unwind().await {
    Ok(outcome) => outcome,
    Err(_) => {
      error!("job body panicked");
      Err(JobFailure::Panic)
    }
  };

  if let Err(failure) = &outcome {
    debug!(failure = %failure, "job failed");
  }

  // The hook runs outside the store mutex; its follow-ups are enqueued
  // atomically with the finish below. Hook errors never block the finish.
  let mut deferred = Vec::new();
  if let Some(hook) = &claimed.defer {
    match AssertUnwindSafe(hook(ctx, outcome.clone())).catch_unwind().await {
      Ok(Ok(jobs)) => deferred = jobs,
      Ok(Err(err)) => warn!(error = %err, "deferral hook failed"),
      Err(_) => warn!("deferral hook panicked"),
    }
  }

  store.finish_job(id, outcome, deferred);
}
