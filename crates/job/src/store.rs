//! The job store: authoritative record of every job and its state.
//!
//! All mutations happen under a single mutex held only for structural work;
//! job bodies run entirely outside it. Blocked callers
//! ([`JobStore::await_next_job`], [`JobStore::wait_for_jobs`]) park on one
//! shared [`Notify`] and re-check their predicate on every wakeup, so
//! spurious wakeups are harmless.
//!
//! # Lifecycle
//!
//! `Queued -> Running -> {Succeeded, Failed}`. A queued job whose
//! dependencies are not all `Succeeded` is reported as `Blocked`, a derived
//! view that is never stored. Terminal records stay observable until they
//! are superseded by a newer terminal job for the same `(dir, type)` and no
//! waiter or pending dependent references them; after that they are
//! collected and treated as satisfied wherever they are still named.

use std::{
  collections::{BTreeSet, HashMap, HashSet},
  sync::{Mutex, MutexGuard, PoisonError},
};

use loom_core::DirHandle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
  ctx::JobCtx,
  error::{JobFailure, JobStoreError},
  id::JobId,
  job::{DeferFn, Job, JobFn, JobResult, JobType, Priority},
};

// ============================================================================
// Public types
// ============================================================================

/// Observable lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
  Queued,
  /// Queued with at least one non-terminal dependency. Derived view; the
  /// store itself only ever records `Queued`.
  Blocked,
  Running,
  Succeeded,
  Failed,
}

impl JobState {
  pub fn is_terminal(self) -> bool {
    matches!(self, JobState::Succeeded | JobState::Failed)
  }
}

/// A job handed to a worker by [`JobStore::await_next_job`]. The store keeps
/// the bookkeeping record; the closures move to the worker.
pub struct ClaimedJob {
  pub dir: DirHandle,
  pub job_type: JobType,
  pub ignore_state: bool,
  pub func: JobFn,
  pub defer: Option<DeferFn>,
}

impl std::fmt::Debug for ClaimedJob {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ClaimedJob")
      .field("dir", &self.dir)
      .field("job_type", &self.job_type)
      .field("ignore_state", &self.ignore_state)
      .field("defer", &self.defer.is_some())
      .finish_non_exhaustive()
  }
}

impl ClaimedJob {
  /// Derive the execution context for this job from a worker's token.
  pub fn ctx(&self, cancel: CancellationToken) -> JobCtx {
    JobCtx::new(cancel).with_ignore_state(self.ignore_state)
  }
}

// ============================================================================
// Internal records
// ============================================================================

struct JobRecord {
  dir: DirHandle,
  job_type: JobType,
  priority: Priority,
  ignore_state: bool,
  /// Pending dependencies; ids already `Succeeded` are pruned at enqueue.
  depends_on: Vec<JobId>,
  /// Taken by the claiming worker.
  func: Option<JobFn>,
  defer: Option<DeferFn>,
  state: JobState,
  failure: Option<JobFailure>,
  /// Reverse dependency edges among live jobs.
  dependents: Vec<JobId>,
  /// Jobs enqueued by this job's deferral hook.
  spawned: Vec<JobId>,
}

struct Waiter {
  ids: Vec<JobId>,
  /// Whether the effective set grows through `spawned` edges.
  transitive: bool,
}

#[derive(Default)]
struct StoreState {
  next_id: u64,
  shutdown: bool,
  jobs: HashMap<JobId, JobRecord>,
  /// Queued jobs per tier, ascending id = FIFO by enqueue time.
  queued: BTreeSet<(Priority, JobId)>,
  /// Newest non-terminal job per `(dir, type)`.
  dedup: HashMap<(DirHandle, JobType), JobId>,
  waiters: HashMap<u64, Waiter>,
  next_waiter: u64,
}

// ============================================================================
// JobStore
// ============================================================================

/// In-memory transactional table of jobs. See the module docs for the state
/// machine and retention rules.
#[derive(Default)]
pub struct JobStore {
  state: Mutex<StoreState>,
  signal: Notify,
}

impl JobStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn locked(&self) -> MutexGuard<'_, StoreState> {
    // A poisoning panic can only come from inside the store's own critical
    // sections, which never unwind mid-mutation.
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Enqueue a job. Returns the assigned id, or the id of a live duplicate
  /// when the job coalesces onto an existing `(dir, type)` instance.
  pub fn enqueue_job(&self, job: Job) -> Result<JobId, JobStoreError> {
    let id = self.locked().enqueue(job)?;
    self.signal.notify_waiters();
    Ok(id)
  }

  /// Block until a job of the given tier is runnable, claim it, and
  /// transition it to `Running`.
  pub async fn await_next_job(
    &self,
    cancel: &CancellationToken,
    priority: Priority,
  ) -> Result<(JobId, ClaimedJob), JobStoreError> {
    loop {
      // Enable the wakeup before checking the predicate so a signal raised
      // between the check and the await is not lost.
      let notified = self.signal.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      {
        let mut state = self.locked();
        if state.shutdown {
          return Err(JobStoreError::Shutdown);
        }
        if let Some(id) = state.next_runnable(priority) {
          let claimed = state.claim(id);
          return Ok((id, claimed));
        }
      }
      tokio::select! {
        _ = &mut notified => {}
        _ = cancel.cancelled() => return Err(JobStoreError::Cancelled),
      }
    }
  }

  /// Transition a running job to its terminal state and, in the same
  /// critical section, enqueue the deferral follow-ups. Returns the ids of
  /// the follow-ups that were enqueued.
  ///
  /// Finishing a job that is not `Running` is a programming error and
  /// panics.
  pub fn finish_job(&self, id: JobId, outcome: JobResult, deferred: Vec<Job>) -> Vec<JobId> {
    let spawned = self.locked().finish(id, outcome, deferred);
    self.signal.notify_waiters();
    spawned
  }

  /// Block until every id in the set, and every job transitively enqueued
  /// by deferral hooks of jobs in the set, is terminal. Returns the first
  /// failure in the set (lowest id), success if all succeeded, or
  /// [`JobStoreError::Cancelled`] if the caller's token fires first.
  pub async fn wait_for_jobs(&self, cancel: &CancellationToken, ids: &[JobId]) -> Result<(), JobStoreError> {
    self.wait(cancel, ids, true).await
  }

  /// Like [`wait_for_jobs`](Self::wait_for_jobs) but without following
  /// deferral edges: only the named ids are awaited.
  pub async fn wait_for_jobs_exact(&self, cancel: &CancellationToken, ids: &[JobId]) -> Result<(), JobStoreError> {
    self.wait(cancel, ids, false).await
  }

  async fn wait(&self, cancel: &CancellationToken, ids: &[JobId], transitive: bool) -> Result<(), JobStoreError> {
    if ids.is_empty() {
      return Ok(());
    }

    let waiter_id = {
      let mut state = self.locked();
      if state.shutdown {
        return Err(JobStoreError::Shutdown);
      }
      state.add_waiter(ids, transitive)
    };

    loop {
      let notified = self.signal.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      {
        let mut state = self.locked();
        if state.shutdown {
          state.remove_waiter(waiter_id);
          return Err(JobStoreError::Shutdown);
        }
        if let Some(result) = state.waiter_result(waiter_id) {
          state.remove_waiter(waiter_id);
          return result;
        }
      }
      tokio::select! {
        _ = &mut notified => {}
        _ = cancel.cancelled() => {
          self.locked().remove_waiter(waiter_id);
          return Err(JobStoreError::Cancelled);
        }
      }
    }
  }

  /// Stop the store. Subsequent enqueue/await/wait calls fail fast with
  /// [`JobStoreError::Shutdown`]; in-flight finishes still land so workers
  /// can drain their current job.
  pub fn stop(&self) {
    self.locked().shutdown = true;
    self.signal.notify_waiters();
  }

  // ==========================================================================
  // Inspection
  // ==========================================================================

  /// Current state of a job, with `Blocked` derived for queued jobs whose
  /// dependencies are still pending. `None` once the record is collected.
  pub fn job_state(&self, id: JobId) -> Option<JobState> {
    let state = self.locked();
    let rec = state.jobs.get(&id)?;
    Some(match rec.state {
      JobState::Queued if !state.deps_satisfied(rec) => JobState::Blocked,
      other => other,
    })
  }

  /// The failure recorded on a job, if it failed and is still retained.
  pub fn job_failure(&self, id: JobId) -> Option<JobFailure> {
    self.locked().jobs.get(&id).and_then(|rec| rec.failure.clone())
  }

  /// Number of job records currently retained (live and observable-terminal).
  pub fn len(&self) -> usize {
    self.locked().jobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

// ============================================================================
// State machine
// ============================================================================

impl StoreState {
  fn enqueue(&mut self, job: Job) -> Result<JobId, JobStoreError> {
    if self.shutdown {
      return Err(JobStoreError::Shutdown);
    }

    // Dependencies may only name ids this store has assigned. The next id
    // is the job's own, so referencing it is the one way to close a cycle.
    for &dep in &job.depends_on {
      if dep.0 == self.next_id {
        return Err(JobStoreError::DependencyCycle(dep));
      }
      if dep.0 > self.next_id {
        return Err(JobStoreError::UnknownDependency(dep));
      }
    }

    let key = (job.dir.clone(), job.job_type);
    let mut depends_on = job.depends_on;

    if let Some(&existing) = self.dedup.get(&key) {
      if !job.ignore_state {
        debug!(job_id = %existing, job_type = %job.job_type, dir = %job.dir, "coalescing duplicate job");
        return Ok(existing);
      }
      // Fresh work was requested: queue behind the live instance so the
      // (dir, type) serialization holds.
      if !depends_on.contains(&existing) {
        depends_on.push(existing);
      }
    }

    let id = JobId(self.next_id);
    self.next_id += 1;

    // Prune dependencies that already completed. A collected record was
    // observable-terminal, which satisfies the gate.
    let mut pending = Vec::new();
    for dep in depends_on {
      match self.jobs.get(&dep).map(|rec| rec.state) {
        None | Some(JobState::Succeeded) => {}
        Some(JobState::Failed) => {
          self.jobs.insert(
            id,
            JobRecord {
              dir: job.dir,
              job_type: job.job_type,
              priority: job.priority,
              ignore_state: job.ignore_state,
              depends_on: Vec::new(),
              func: None,
              defer: None,
              state: JobState::Failed,
              failure: Some(JobFailure::DependencyFailed(dep)),
              dependents: Vec::new(),
              spawned: Vec::new(),
            },
          );
          return Ok(id);
        }
        Some(_) => pending.push(dep),
      }
    }

    for &dep in &pending {
      if let Some(rec) = self.jobs.get_mut(&dep) {
        rec.dependents.push(id);
      }
    }

    self.jobs.insert(
      id,
      JobRecord {
        dir: job.dir,
        job_type: job.job_type,
        priority: job.priority,
        ignore_state: job.ignore_state,
        depends_on: pending,
        func: Some(job.func),
        defer: job.defer,
        state: JobState::Queued,
        failure: None,
        dependents: Vec::new(),
        spawned: Vec::new(),
      },
    );
    self.queued.insert((job.priority, id));
    self.dedup.insert(key, id);

    Ok(id)
  }

  /// Lowest-id queued job of the tier whose dependencies are all satisfied.
  fn next_runnable(&self, priority: Priority) -> Option<JobId> {
    self
      .queued
      .range((priority, JobId(0))..=(priority, JobId(u64::MAX)))
      .map(|&(_, id)| id)
      .find(|id| self.jobs.get(id).is_some_and(|rec| self.deps_satisfied(rec)))
  }

  fn deps_satisfied(&self, rec: &JobRecord) -> bool {
    rec
      .depends_on
      .iter()
      .all(|dep| match self.jobs.get(dep).map(|d| d.state) {
        None | Some(JobState::Succeeded) => true,
        Some(_) => false,
      })
  }

  fn claim(&mut self, id: JobId) -> ClaimedJob {
    let Some(rec) = self.jobs.get_mut(&id) else {
      panic!("claim: unknown job {id}");
    };
    rec.state = JobState::Running;
    let func = rec.func.take().unwrap_or_else(|| panic!("claim: job {id} claimed twice"));
    let priority = rec.priority;
    let claimed = ClaimedJob {
      dir: rec.dir.clone(),
      job_type: rec.job_type,
      ignore_state: rec.ignore_state,
      func,
      defer: rec.defer.take(),
    };
    self.queued.remove(&(priority, id));
    claimed
  }

  fn finish(&mut self, id: JobId, outcome: JobResult, deferred: Vec<Job>) -> Vec<JobId> {
    let failed = {
      let Some(rec) = self.jobs.get_mut(&id) else {
        panic!("finish_job: unknown job {id}");
      };
      assert!(
        rec.state == JobState::Running,
        "finish_job: job {id} is {:?}, not running",
        rec.state
      );
      match outcome {
        Ok(()) => {
          rec.state = JobState::Succeeded;
          false
        }
        Err(failure) => {
          rec.state = JobState::Failed;
          rec.failure = Some(failure);
          true
        }
      }
    };

    self.clear_dedup(id);
    if failed {
      self.fail_dependents(id);
    }

    let mut spawned = Vec::new();
    for follow_up in deferred {
      match self.enqueue(follow_up) {
        Ok(follow_id) => spawned.push(follow_id),
        Err(err) => warn!(job_id = %id, error = %err, "dropping deferred job"),
      }
    }
    if let Some(rec) = self.jobs.get_mut(&id) {
      rec.spawned.extend(spawned.iter().copied());
    }

    self.gc();
    spawned
  }

  fn clear_dedup(&mut self, id: JobId) {
    let Some(rec) = self.jobs.get(&id) else { return };
    let key = (rec.dir.clone(), rec.job_type);
    if self.dedup.get(&key) == Some(&id) {
      self.dedup.remove(&key);
    }
  }

  /// Cascade a failure: every queued job depending (transitively) on the
  /// failed id is itself failed with its immediate failed dependency as the
  /// cause, and never runs.
  fn fail_dependents(&mut self, failed: JobId) {
    let mut stack: Vec<(JobId, JobId)> = match self.jobs.get(&failed) {
      Some(rec) => rec.dependents.iter().map(|&d| (d, failed)).collect(),
      None => return,
    };

    while let Some((id, cause)) = stack.pop() {
      let Some(rec) = self.jobs.get_mut(&id) else { continue };
      if rec.state != JobState::Queued {
        continue;
      }
      rec.state = JobState::Failed;
      rec.failure = Some(JobFailure::DependencyFailed(cause));
      rec.func = None;
      rec.defer = None;
      let priority = rec.priority;
      let next: Vec<(JobId, JobId)> = rec.dependents.iter().map(|&d| (d, id)).collect();
      self.queued.remove(&(priority, id));
      self.clear_dedup(id);
      stack.extend(next);
      debug!(job_id = %id, cause = %cause, "job failed through dependency");
    }
  }

  fn add_waiter(&mut self, ids: &[JobId], transitive: bool) -> u64 {
    let waiter_id = self.next_waiter;
    self.next_waiter += 1;
    self.waiters.insert(
      waiter_id,
      Waiter {
        ids: ids.to_vec(),
        transitive,
      },
    );
    waiter_id
  }

  fn remove_waiter(&mut self, waiter_id: u64) {
    self.waiters.remove(&waiter_id);
    self.gc();
  }

  /// `None` while any job in the waiter's effective set is non-terminal;
  /// otherwise the waiter's result.
  fn waiter_result(&self, waiter_id: u64) -> Option<Result<(), JobStoreError>> {
    let waiter = self.waiters.get(&waiter_id)?;
    let mut set = HashSet::new();
    self.collect_closure(&waiter.ids, waiter.transitive, &mut set);

    let mut first_failed: Option<JobId> = None;
    for &id in &set {
      match self.jobs.get(&id) {
        // Collected records were observable-terminal; count them satisfied.
        None => {}
        Some(rec) => {
          if !rec.state.is_terminal() {
            return None;
          }
          if rec.state == JobState::Failed && first_failed.map_or(true, |f| id < f) {
            first_failed = Some(id);
          }
        }
      }
    }

    Some(match first_failed {
      None => Ok(()),
      Some(id) => {
        let failure = self
          .jobs
          .get(&id)
          .and_then(|rec| rec.failure.clone())
          .unwrap_or_else(|| panic!("waiter_result: failed job {id} has no recorded failure"));
        Err(JobStoreError::JobFailed { id, failure })
      }
    })
  }

  /// Expand a root set through `spawned` edges (when transitive).
  fn collect_closure(&self, roots: &[JobId], transitive: bool, out: &mut HashSet<JobId>) {
    let mut stack: Vec<JobId> = roots.to_vec();
    while let Some(id) = stack.pop() {
      if !out.insert(id) || !transitive {
        continue;
      }
      if let Some(rec) = self.jobs.get(&id) {
        stack.extend(rec.spawned.iter().copied());
      }
    }
  }

  /// Collect terminal records nothing can observe anymore. Retained are:
  /// live jobs, anything referenced by an active waiter (transitively) or
  /// by a live job's dependency set, and the newest terminal record per
  /// `(dir, type)`, which stays as the observable outcome until superseded.
  fn gc(&mut self) {
    let mut referenced: HashSet<JobId> = HashSet::new();

    for waiter in self.waiters.values() {
      let mut set = HashSet::new();
      self.collect_closure(&waiter.ids, waiter.transitive, &mut set);
      referenced.extend(set);
    }

    let mut newest: HashMap<(DirHandle, JobType), JobId> = HashMap::new();
    for (&id, rec) in &self.jobs {
      if rec.state.is_terminal() {
        let entry = newest.entry((rec.dir.clone(), rec.job_type)).or_insert(id);
        if id > *entry {
          *entry = id;
        }
      } else {
        referenced.extend(rec.depends_on.iter().copied());
      }
    }
    referenced.extend(newest.into_values());

    self
      .jobs
      .retain(|id, rec| !rec.state.is_terminal() || referenced.contains(id));
  }
}
