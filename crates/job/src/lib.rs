//! Job types and the job store.
//!
//! A [`Job`] is one unit of background indexing work targeting a module
//! directory. The [`JobStore`] is the authoritative table of every job and
//! its state: it validates dependencies, deduplicates per `(dir, type)`,
//! hands runnable jobs to workers in priority/FIFO order, and lets request
//! handlers block until a set of jobs (plus everything their deferral hooks
//! spawned) has settled.

mod ctx;
mod error;
mod id;
mod job;
mod store;

#[cfg(test)]
mod __tests__;

pub use ctx::JobCtx;
pub use error::{JobFailure, JobStoreError};
pub use id::JobId;
pub use job::{defer_fn, func, DeferFn, Job, JobFn, JobResult, JobType, Priority};
pub use store::{ClaimedJob, JobState, JobStore};
