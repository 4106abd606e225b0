use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::id::JobId;

/// Terminal failure recorded on a job.
///
/// Cheap to clone; the same value is observed by waiters and copied into
/// the cascade cause of dependents.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum JobFailure {
  /// The job body returned an error.
  #[error("{0}")]
  Op(Arc<str>),

  /// The worker's context was cancelled while the body ran.
  #[error("cancelled")]
  Cancelled,

  /// A dependency reached `Failed`, so this job never ran.
  #[error("dependency {0} failed")]
  DependencyFailed(JobId),

  /// The job body panicked; the worker converted it into a failure.
  #[error("internal error: job body panicked")]
  Panic,
}

impl JobFailure {
  /// Wrap an operation error into a stored failure.
  pub fn op(err: impl fmt::Display) -> Self {
    Self::Op(err.to_string().into())
  }
}

/// Errors surfaced by [`JobStore`](crate::JobStore) operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum JobStoreError {
  /// Enqueue referenced an id the store has never assigned.
  #[error("unknown dependency {0}")]
  UnknownDependency(JobId),

  /// Enqueue would make a job reachable from its own dependency set.
  #[error("dependency cycle through {0}")]
  DependencyCycle(JobId),

  /// The store was stopped; enqueue/await/wait fail fast.
  #[error("job store is stopped")]
  Shutdown,

  /// The caller's context was cancelled while blocked.
  #[error("cancelled while waiting on job store")]
  Cancelled,

  /// A waited-on job failed. Carries the lowest-id failure in the set.
  #[error("job {id} failed: {failure}")]
  JobFailed {
    id: JobId,
    #[source]
    failure: JobFailure,
  },
}
