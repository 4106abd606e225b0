use std::{fmt, future::Future, sync::Arc};

use futures::future::BoxFuture;
use loom_core::DirHandle;

use crate::{ctx::JobCtx, error::JobFailure, id::JobId};

/// Outcome of a job body.
pub type JobResult = Result<(), JobFailure>;

/// A job body: invoked with the execution context, returns the outcome.
pub type JobFn = Arc<dyn Fn(JobCtx) -> BoxFuture<'static, JobResult> + Send + Sync>;

/// A deferral hook: invoked after the body with the body's outcome, returns
/// follow-up jobs to enqueue atomically as part of the finish step.
pub type DeferFn = Arc<dyn Fn(JobCtx, JobResult) -> BoxFuture<'static, Result<Vec<Job>, JobFailure>> + Send + Sync>;

/// Wrap an async closure into a [`JobFn`].
pub fn func<F, Fut>(f: F) -> JobFn
where
  F: Fn(JobCtx) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = JobResult> + Send + 'static,
{
  Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Wrap an async closure into a [`DeferFn`].
pub fn defer_fn<F, Fut>(f: F) -> DeferFn
where
  F: Fn(JobCtx, JobResult) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Vec<Job>, JobFailure>> + Send + 'static,
{
  Arc::new(move |ctx, outcome| Box::pin(f(ctx, outcome)))
}

/// The closed set of job types.
///
/// Together with the target directory this is the deduplication key: at most
/// one instance per `(dir, type)` is ever runnable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobType {
  ParseConfig,
  LoadMetadata,
  PreloadEmbeddedSchema,
  DecodeReferenceTargets,
  DecodeReferenceOrigins,
  ParseVariables,
  DecodeVarsReferences,
  FetchRegistryModule,
  Validate,
}

impl JobType {
  pub fn as_str(self) -> &'static str {
    match self {
      JobType::ParseConfig => "parse-config",
      JobType::LoadMetadata => "load-metadata",
      JobType::PreloadEmbeddedSchema => "preload-embedded-schema",
      JobType::DecodeReferenceTargets => "decode-reference-targets",
      JobType::DecodeReferenceOrigins => "decode-reference-origins",
      JobType::ParseVariables => "parse-variables",
      JobType::DecodeVarsReferences => "decode-vars-references",
      JobType::FetchRegistryModule => "fetch-module-from-registry",
      JobType::Validate => "validate",
    }
  }
}

impl fmt::Display for JobType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Priority tier. Each scheduler serves exactly one tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
  /// Direct user-visible preconditions (reserved)
  High,
  /// Parse, decode, metadata, reference resolution
  #[default]
  Normal,
  /// Registry fetches and other best-effort background work
  Low,
}

/// One unit of background work. Immutable after enqueue.
#[derive(Clone)]
pub struct Job {
  /// Target directory; coarse unit of locking and deduplication.
  pub dir: DirHandle,
  pub job_type: JobType,
  pub func: JobFn,
  /// Jobs that must reach `Succeeded` before this one becomes runnable.
  pub depends_on: Vec<JobId>,
  pub priority: Priority,
  /// Bypass "module already in this processing state" short-circuits, and
  /// request fresh work instead of coalescing onto a live duplicate.
  pub ignore_state: bool,
  pub defer: Option<DeferFn>,
}

impl Job {
  pub fn new(dir: DirHandle, job_type: JobType, func: JobFn) -> Self {
    Self {
      dir,
      job_type,
      func,
      depends_on: Vec::new(),
      priority: Priority::default(),
      ignore_state: false,
      defer: None,
    }
  }

  pub fn depends_on(mut self, deps: impl IntoIterator<Item = JobId>) -> Self {
    self.depends_on.extend(deps);
    self
  }

  pub fn priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }

  pub fn ignore_state(mut self, ignore_state: bool) -> Self {
    self.ignore_state = ignore_state;
    self
  }

  pub fn defer(mut self, hook: DeferFn) -> Self {
    self.defer = Some(hook);
    self
  }
}

impl fmt::Debug for Job {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Job")
      .field("dir", &self.dir)
      .field("job_type", &self.job_type)
      .field("depends_on", &self.depends_on)
      .field("priority", &self.priority)
      .field("ignore_state", &self.ignore_state)
      .field("defer", &self.defer.is_some())
      .finish_non_exhaustive()
  }
}
