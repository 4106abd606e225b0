//! Composition root: wires the job store, the two schedulers, the stores
//! and the indexer into one running session, and exposes the document
//! lifecycle entry points request handlers call.
//!
//! A handler that mutates a document calls the matching `did_*` method and
//! then [`Session::wait_for`] on the returned ids, so derived state is
//! fresh before it replies.

use std::sync::Arc;

use indexer::{Collaborators, Indexer};
use job::{JobId, JobStore, JobStoreError, Priority};
use loom_core::{Config, DirHandle, DocumentHandle};
use scheduler::Scheduler;
use state::{DocumentError, DocumentStore, ModuleStore, RegistryStore, SchemaStore};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SessionError {
  #[error(transparent)]
  Document(#[from] DocumentError),

  #[error(transparent)]
  JobStore(#[from] JobStoreError),
}

pub struct Session {
  jobs: Arc<JobStore>,
  documents: Arc<DocumentStore>,
  modules: Arc<ModuleStore>,
  schemas: Arc<SchemaStore>,
  registry: Arc<RegistryStore>,
  indexer: Indexer,
  normal: Scheduler,
  low: Scheduler,
}

impl Session {
  /// Build the stores, the indexer and both schedulers, and start the
  /// worker pools.
  pub fn start(config: &Config, collab: Collaborators) -> Self {
    let jobs = Arc::new(JobStore::new());
    let documents = Arc::new(DocumentStore::new());
    let modules = Arc::new(ModuleStore::new());
    let schemas = Arc::new(SchemaStore::new());
    let registry = Arc::new(RegistryStore::new());

    let indexer = Indexer::new(
      jobs.clone(),
      documents.clone(),
      modules.clone(),
      schemas.clone(),
      registry.clone(),
      collab,
    );

    let mut normal = Scheduler::new(jobs.clone(), config.indexing.normal_parallelism, Priority::Normal);
    let mut low = Scheduler::new(jobs.clone(), config.indexing.low_parallelism, Priority::Low);
    normal.start();
    low.start();

    info!(
      normal_parallelism = normal.parallelism(),
      low_parallelism = low.parallelism(),
      "session started"
    );

    Self {
      jobs,
      documents,
      modules,
      schemas,
      registry,
      indexer,
      normal,
      low,
    }
  }

  // ==========================================================================
  // Document lifecycle
  // ==========================================================================

  /// `didOpen`: record the document and index its module.
  pub fn did_open(&self, handle: &DocumentHandle, text: &str, version: i32) -> Result<Vec<JobId>, SessionError> {
    self.documents.open(handle.clone(), text, version)?;
    self.modules.add_module(&handle.dir);
    Ok(self.indexer.document_opened(&handle.dir)?)
  }

  /// `didChange`: out-of-order updates are dropped here, before they ever
  /// reach the indexer.
  pub fn did_change(&self, handle: &DocumentHandle, text: &str, version: i32) -> Result<Vec<JobId>, SessionError> {
    match self.documents.update(handle, text, version) {
      Ok(()) => {}
      Err(DocumentError::StaleVersion { version, current, .. }) => {
        debug!(doc = %handle, version, current, "dropping out-of-order update");
        return Ok(Vec::new());
      }
      Err(err) => return Err(err.into()),
    }
    Ok(self.indexer.document_changed(&handle.dir)?)
  }

  /// `didSave`: refresh whatever is stale without forcing fresh work.
  pub fn did_save(&self, handle: &DocumentHandle) -> Result<Vec<JobId>, SessionError> {
    Ok(self.indexer.document_saved(&handle.dir)?)
  }

  /// `didClose`: drop the document; the module's derived state goes with
  /// the last open document.
  pub fn did_close(&self, handle: &DocumentHandle) -> Result<Vec<JobId>, SessionError> {
    self.documents.close(handle)?;
    Ok(self.indexer.document_closed(&handle.dir)?)
  }

  /// Workspace discovery found a module directory.
  pub fn workspace_discovered(&self, dir: &DirHandle) -> Result<Vec<JobId>, SessionError> {
    Ok(self.indexer.workspace_discovered(dir)?)
  }

  /// The file watcher reported a change on disk.
  pub fn watched_file_changed(&self, dir: &DirHandle) -> Result<Vec<JobId>, SessionError> {
    Ok(self.indexer.watched_file_changed(dir)?)
  }

  /// Block until the given jobs and their transitive deferrals settle.
  pub async fn wait_for(&self, cancel: &CancellationToken, ids: &[JobId]) -> Result<(), JobStoreError> {
    self.jobs.wait_for_jobs(cancel, ids).await
  }

  /// Stop both schedulers (draining in-flight jobs), then the store.
  pub async fn stop(&mut self) {
    self.normal.stop().await;
    self.low.stop().await;
    self.jobs.stop();
    info!("session stopped");
  }

  // ==========================================================================
  // Store access for request handlers
  // ==========================================================================

  pub fn jobs(&self) -> &Arc<JobStore> {
    &self.jobs
  }

  pub fn documents(&self) -> &DocumentStore {
    &self.documents
  }

  pub fn modules(&self) -> &ModuleStore {
    &self.modules
  }

  pub fn schemas(&self) -> &SchemaStore {
    &self.schemas
  }

  pub fn registry(&self) -> &RegistryStore {
    &self.registry
  }
}
