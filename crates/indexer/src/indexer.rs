//! Event-to-DAG composition.
//!
//! Every document lifecycle event maps to the same canonical job graph:
//!
//! ```text
//! parse-config ─→ load-metadata ─→ { preload-embedded-schema,
//!                                    decode-reference-targets,
//!                                    decode-reference-origins }
//! parse-variables ─→ decode-vars-references
//! fetch-module-from-registry   (low priority, no dependencies)
//! ```
//!
//! What differs per event is only the ignore-state flag: editor-driven
//! events (open/change) know the content changed and force fresh work,
//! while background events (save/watch/discovery) coalesce into whatever
//! state is already fresh.

use std::sync::Arc;

use job::{func, Job, JobFailure, JobId, JobStore, JobStoreError, JobType, Priority};
use loom_core::{ConfigParser, DirHandle, RegistryClient, SchemaSource};
use state::{DocumentStore, ModuleStore, RegistryStore, SchemaStore};
use tracing::debug;

use crate::ops::{self, OpError};

fn op_failure(err: OpError) -> JobFailure {
  match err {
    OpError::Cancelled => JobFailure::Cancelled,
    other => JobFailure::op(other),
  }
}

/// External collaborators the job bodies consume.
#[derive(Clone)]
pub struct Collaborators {
  pub parser: Arc<dyn ConfigParser>,
  pub schema_source: Arc<dyn SchemaSource>,
  pub registry_client: Arc<dyn RegistryClient>,
}

/// Composes job graphs in reaction to document lifecycle events.
///
/// Holds the job store by reference; the store knows nothing about the
/// indexer. Job bodies capture only the stores they touch.
#[derive(Clone)]
pub struct Indexer {
  jobs: Arc<JobStore>,
  documents: Arc<DocumentStore>,
  modules: Arc<ModuleStore>,
  schemas: Arc<SchemaStore>,
  registry: Arc<RegistryStore>,
  collab: Collaborators,
}

impl Indexer {
  pub fn new(
    jobs: Arc<JobStore>,
    documents: Arc<DocumentStore>,
    modules: Arc<ModuleStore>,
    schemas: Arc<SchemaStore>,
    registry: Arc<RegistryStore>,
    collab: Collaborators,
  ) -> Self {
    Self {
      jobs,
      documents,
      modules,
      schemas,
      registry,
      collab,
    }
  }

  // ==========================================================================
  // Entry points
  // ==========================================================================

  /// A document in the module was opened. Freshness is unknown, so every
  /// job forces fresh work.
  pub fn document_opened(&self, dir: &DirHandle) -> Result<Vec<JobId>, JobStoreError> {
    self.index_module(dir, true)
  }

  /// A document in the module changed. The canonical change graph: all
  /// derived state is recomputed against the post-change content.
  pub fn document_changed(&self, dir: &DirHandle) -> Result<Vec<JobId>, JobStoreError> {
    self.index_module(dir, true)
  }

  /// A document was saved. Saved-but-unchanged content coalesces into
  /// already-fresh facets instead of recomputing them.
  pub fn document_saved(&self, dir: &DirHandle) -> Result<Vec<JobId>, JobStoreError> {
    self.index_module(dir, false)
  }

  /// A document was closed. No jobs; once the last open document in the
  /// module is gone, its document-derived state is dropped.
  pub fn document_closed(&self, dir: &DirHandle) -> Result<Vec<JobId>, JobStoreError> {
    if !self.documents.has_open_documents(dir) && self.modules.module_exists(dir) {
      if let Err(err) = self.modules.clear_derived(dir) {
        debug!(dir = %dir, error = %err, "module already evicted");
      }
    }
    Ok(Vec::new())
  }

  /// Workspace discovery found a module directory. Background discovery
  /// must not clobber fresher editor-driven state.
  pub fn workspace_discovered(&self, dir: &DirHandle) -> Result<Vec<JobId>, JobStoreError> {
    self.modules.add_module(dir);
    self.index_module(dir, false)
  }

  /// The file watcher reported a change on disk. Only known modules are
  /// re-indexed; the watcher can race the editor, and editor-driven state
  /// wins.
  pub fn watched_file_changed(&self, dir: &DirHandle) -> Result<Vec<JobId>, JobStoreError> {
    if !self.modules.module_exists(dir) {
      debug!(dir = %dir, "watched change for unknown module, ignoring");
      return Ok(Vec::new());
    }
    self.index_module(dir, false)
  }

  // ==========================================================================
  // Graph construction
  // ==========================================================================

  fn index_module(&self, dir: &DirHandle, ignore_state: bool) -> Result<Vec<JobId>, JobStoreError> {
    let mut ids = Vec::new();

    let parse_id = self.jobs.enqueue_job(self.parse_config_job(dir, ignore_state))?;
    ids.push(parse_id);

    ids.extend(self.decode_module(dir, vec![parse_id], ignore_state)?);

    let parse_vars_id = self.jobs.enqueue_job(self.parse_variables_job(dir, ignore_state))?;
    ids.push(parse_vars_id);

    let vars_refs_id = self
      .jobs
      .enqueue_job(self.decode_vars_references_job(dir, vec![parse_vars_id], ignore_state))?;
    ids.push(vars_refs_id);

    debug!(dir = %dir, jobs = ids.len(), ignore_state, "module indexing enqueued");
    Ok(ids)
  }

  /// The decode bundle: metadata, then schema preload and reference
  /// decoding fanned out behind it, plus the registry fetch off to the
  /// side in the low tier.
  fn decode_module(&self, dir: &DirHandle, depends_on: Vec<JobId>, ignore_state: bool) -> Result<Vec<JobId>, JobStoreError> {
    let mut ids = Vec::new();

    let meta_id = self
      .jobs
      .enqueue_job(self.load_metadata_job(dir, depends_on, ignore_state))?;
    ids.push(meta_id);

    ids.push(
      self
        .jobs
        .enqueue_job(self.preload_schema_job(dir, vec![meta_id], ignore_state))?,
    );
    ids.push(
      self
        .jobs
        .enqueue_job(self.decode_targets_job(dir, vec![meta_id], ignore_state))?,
    );
    ids.push(
      self
        .jobs
        .enqueue_job(self.decode_origins_job(dir, vec![meta_id], ignore_state))?,
    );

    // Only populates auxiliary registry data; not part of the dependency
    // chain consumers wait on for correctness.
    ids.push(self.jobs.enqueue_job(self.fetch_registry_job(dir))?);

    Ok(ids)
  }

  // ==========================================================================
  // Job constructors
  // ==========================================================================

  fn parse_config_job(&self, dir: &DirHandle, ignore_state: bool) -> Job {
    let documents = self.documents.clone();
    let modules = self.modules.clone();
    let parser = self.collab.parser.clone();
    let dir_key = dir.clone();
    Job::new(
      dir.clone(),
      JobType::ParseConfig,
      func(move |ctx| {
        let documents = documents.clone();
        let modules = modules.clone();
        let parser = parser.clone();
        let dir = dir_key.clone();
        async move {
          ops::parse_config(&ctx, &documents, &modules, parser.as_ref(), &dir)
            .await
            .map_err(op_failure)
        }
      }),
    )
    .ignore_state(ignore_state)
  }

  fn load_metadata_job(&self, dir: &DirHandle, depends_on: Vec<JobId>, ignore_state: bool) -> Job {
    let modules = self.modules.clone();
    let dir_key = dir.clone();
    Job::new(
      dir.clone(),
      JobType::LoadMetadata,
      func(move |ctx| {
        let modules = modules.clone();
        let dir = dir_key.clone();
        async move { ops::load_metadata(&ctx, &modules, &dir).await.map_err(op_failure) }
      }),
    )
    .depends_on(depends_on)
    .ignore_state(ignore_state)
  }

  fn preload_schema_job(&self, dir: &DirHandle, depends_on: Vec<JobId>, ignore_state: bool) -> Job {
    let modules = self.modules.clone();
    let schemas = self.schemas.clone();
    let source = self.collab.schema_source.clone();
    let dir_key = dir.clone();
    Job::new(
      dir.clone(),
      JobType::PreloadEmbeddedSchema,
      func(move |ctx| {
        let modules = modules.clone();
        let schemas = schemas.clone();
        let source = source.clone();
        let dir = dir_key.clone();
        async move {
          ops::preload_embedded_schema(&ctx, &modules, &schemas, source.as_ref(), &dir)
            .await
            .map_err(op_failure)
        }
      }),
    )
    .depends_on(depends_on)
    .ignore_state(ignore_state)
  }

  fn decode_targets_job(&self, dir: &DirHandle, depends_on: Vec<JobId>, ignore_state: bool) -> Job {
    let modules = self.modules.clone();
    let dir_key = dir.clone();
    Job::new(
      dir.clone(),
      JobType::DecodeReferenceTargets,
      func(move |ctx| {
        let modules = modules.clone();
        let dir = dir_key.clone();
        async move {
          ops::decode_reference_targets(&ctx, &modules, &dir)
            .await
            .map_err(op_failure)
        }
      }),
    )
    .depends_on(depends_on)
    .ignore_state(ignore_state)
  }

  fn decode_origins_job(&self, dir: &DirHandle, depends_on: Vec<JobId>, ignore_state: bool) -> Job {
    let modules = self.modules.clone();
    let dir_key = dir.clone();
    Job::new(
      dir.clone(),
      JobType::DecodeReferenceOrigins,
      func(move |ctx| {
        let modules = modules.clone();
        let dir = dir_key.clone();
        async move {
          ops::decode_reference_origins(&ctx, &modules, &dir)
            .await
            .map_err(op_failure)
        }
      }),
    )
    .depends_on(depends_on)
    .ignore_state(ignore_state)
  }

  fn parse_variables_job(&self, dir: &DirHandle, ignore_state: bool) -> Job {
    let documents = self.documents.clone();
    let modules = self.modules.clone();
    let parser = self.collab.parser.clone();
    let dir_key = dir.clone();
    Job::new(
      dir.clone(),
      JobType::ParseVariables,
      func(move |ctx| {
        let documents = documents.clone();
        let modules = modules.clone();
        let parser = parser.clone();
        let dir = dir_key.clone();
        async move {
          ops::parse_variables(&ctx, &documents, &modules, parser.as_ref(), &dir)
            .await
            .map_err(op_failure)
        }
      }),
    )
    .ignore_state(ignore_state)
  }

  fn decode_vars_references_job(&self, dir: &DirHandle, depends_on: Vec<JobId>, ignore_state: bool) -> Job {
    let modules = self.modules.clone();
    let dir_key = dir.clone();
    Job::new(
      dir.clone(),
      JobType::DecodeVarsReferences,
      func(move |ctx| {
        let modules = modules.clone();
        let dir = dir_key.clone();
        async move {
          ops::decode_vars_references(&ctx, &modules, &dir)
            .await
            .map_err(op_failure)
        }
      }),
    )
    .depends_on(depends_on)
    .ignore_state(ignore_state)
  }

  fn fetch_registry_job(&self, dir: &DirHandle) -> Job {
    let modules = self.modules.clone();
    let registry = self.registry.clone();
    let client = self.collab.registry_client.clone();
    let dir_key = dir.clone();
    Job::new(
      dir.clone(),
      JobType::FetchRegistryModule,
      func(move |ctx| {
        let modules = modules.clone();
        let registry = registry.clone();
        let client = client.clone();
        let dir = dir_key.clone();
        async move {
          ops::fetch_registry_module(&ctx, &modules, &registry, client.as_ref(), &dir)
            .await
            .map_err(op_failure)
        }
      }),
    )
    .priority(Priority::Low)
  }
}
