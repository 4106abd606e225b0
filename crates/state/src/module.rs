//! Per-directory module records.
//!
//! Each record holds the derived facets of one module (parsed config,
//! metadata, references, variables) together with a per-facet processing
//! state. The `begin`/`set_*`/`abort` transitions implement the
//! "module already in this processing state" short-circuit that jobs with
//! the ignore-state flag bypass.

use std::sync::Arc;

use dashmap::DashMap;
use loom_core::{
  DirHandle, ModuleMetadata, ParsedConfig, ParsedVariables, ReferenceOrigin, ReferenceTarget, VarsReference,
};
use thiserror::Error;
use tracing::debug;

/// The derived facets of a module record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Facet {
  Config,
  Metadata,
  Schema,
  RefTargets,
  RefOrigins,
  Variables,
  VarsRefs,
  Registry,
}

/// Processing state of one facet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FacetState {
  #[default]
  NotStarted,
  InProgress,
  Done,
}

#[derive(Debug, Error)]
pub enum ModuleStoreError {
  #[error("module {0} is not indexed")]
  ModuleNotFound(DirHandle),
}

#[derive(Default)]
struct ModuleRecord {
  config_state: FacetState,
  parsed_config: Option<Arc<ParsedConfig>>,

  meta_state: FacetState,
  meta: Option<Arc<ModuleMetadata>>,

  schema_state: FacetState,

  targets_state: FacetState,
  ref_targets: Vec<ReferenceTarget>,

  origins_state: FacetState,
  ref_origins: Vec<ReferenceOrigin>,

  vars_state: FacetState,
  parsed_vars: Option<Arc<ParsedVariables>>,

  vars_refs_state: FacetState,
  vars_refs: Vec<VarsReference>,

  registry_state: FacetState,
}

impl ModuleRecord {
  fn facet_state_mut(&mut self, facet: Facet) -> &mut FacetState {
    match facet {
      Facet::Config => &mut self.config_state,
      Facet::Metadata => &mut self.meta_state,
      Facet::Schema => &mut self.schema_state,
      Facet::RefTargets => &mut self.targets_state,
      Facet::RefOrigins => &mut self.origins_state,
      Facet::Variables => &mut self.vars_state,
      Facet::VarsRefs => &mut self.vars_refs_state,
      Facet::Registry => &mut self.registry_state,
    }
  }

  fn facet_state(&self, facet: Facet) -> FacetState {
    match facet {
      Facet::Config => self.config_state,
      Facet::Metadata => self.meta_state,
      Facet::Schema => self.schema_state,
      Facet::RefTargets => self.targets_state,
      Facet::RefOrigins => self.origins_state,
      Facet::Variables => self.vars_state,
      Facet::VarsRefs => self.vars_refs_state,
      Facet::Registry => self.registry_state,
    }
  }
}

/// Table of module records, keyed by directory.
#[derive(Default)]
pub struct ModuleStore {
  modules: DashMap<DirHandle, ModuleRecord>,
}

impl ModuleStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a module. Returns false if it was already known.
  pub fn add_module(&self, dir: &DirHandle) -> bool {
    match self.modules.entry(dir.clone()) {
      dashmap::mapref::entry::Entry::Occupied(_) => false,
      dashmap::mapref::entry::Entry::Vacant(vacant) => {
        vacant.insert(ModuleRecord::default());
        debug!(dir = %dir, "module added");
        true
      }
    }
  }

  pub fn remove_module(&self, dir: &DirHandle) -> bool {
    self.modules.remove(dir).is_some()
  }

  pub fn module_exists(&self, dir: &DirHandle) -> bool {
    self.modules.contains_key(dir)
  }

  pub fn list(&self) -> Vec<DirHandle> {
    self.modules.iter().map(|entry| entry.key().clone()).collect()
  }

  /// Begin processing a facet.
  ///
  /// Returns `Ok(false)` when the facet is already `Done` and the caller did
  /// not ask to ignore state: the job short-circuits without doing work.
  pub fn begin(&self, dir: &DirHandle, facet: Facet, ignore_state: bool) -> Result<bool, ModuleStoreError> {
    let mut record = self.record_mut(dir)?;
    let state = record.facet_state_mut(facet);
    if *state == FacetState::Done && !ignore_state {
      debug!(dir = %dir, facet = ?facet, "facet already processed, skipping");
      return Ok(false);
    }
    *state = FacetState::InProgress;
    Ok(true)
  }

  /// Abandon an in-progress facet after a failure so later runs retry it.
  pub fn abort(&self, dir: &DirHandle, facet: Facet) -> Result<(), ModuleStoreError> {
    let mut record = self.record_mut(dir)?;
    *record.facet_state_mut(facet) = FacetState::NotStarted;
    Ok(())
  }

  pub fn facet_state(&self, dir: &DirHandle, facet: Facet) -> Option<FacetState> {
    self.modules.get(dir).map(|record| record.facet_state(facet))
  }

  /// Reset the document-derived facets (everything except schema and
  /// registry data) when the module's last document closes.
  pub fn clear_derived(&self, dir: &DirHandle) -> Result<(), ModuleStoreError> {
    let mut record = self.record_mut(dir)?;
    let schema_state = record.schema_state;
    let registry_state = record.registry_state;
    *record = ModuleRecord {
      schema_state,
      registry_state,
      ..ModuleRecord::default()
    };
    debug!(dir = %dir, "document-derived module state cleared");
    Ok(())
  }

  // ==========================================================================
  // Facet data
  // ==========================================================================

  pub fn set_parsed_config(&self, dir: &DirHandle, config: Arc<ParsedConfig>) -> Result<(), ModuleStoreError> {
    let mut record = self.record_mut(dir)?;
    record.parsed_config = Some(config);
    record.config_state = FacetState::Done;
    Ok(())
  }

  pub fn parsed_config(&self, dir: &DirHandle) -> Option<Arc<ParsedConfig>> {
    self.modules.get(dir)?.parsed_config.clone()
  }

  pub fn set_metadata(&self, dir: &DirHandle, meta: Arc<ModuleMetadata>) -> Result<(), ModuleStoreError> {
    let mut record = self.record_mut(dir)?;
    record.meta = Some(meta);
    record.meta_state = FacetState::Done;
    Ok(())
  }

  pub fn metadata(&self, dir: &DirHandle) -> Option<Arc<ModuleMetadata>> {
    self.modules.get(dir)?.meta.clone()
  }

  pub fn set_schema_ready(&self, dir: &DirHandle) -> Result<(), ModuleStoreError> {
    let mut record = self.record_mut(dir)?;
    record.schema_state = FacetState::Done;
    Ok(())
  }

  pub fn set_reference_targets(&self, dir: &DirHandle, targets: Vec<ReferenceTarget>) -> Result<(), ModuleStoreError> {
    let mut record = self.record_mut(dir)?;
    record.ref_targets = targets;
    record.targets_state = FacetState::Done;
    Ok(())
  }

  pub fn reference_targets(&self, dir: &DirHandle) -> Option<Vec<ReferenceTarget>> {
    self.modules.get(dir).map(|record| record.ref_targets.clone())
  }

  pub fn set_reference_origins(&self, dir: &DirHandle, origins: Vec<ReferenceOrigin>) -> Result<(), ModuleStoreError> {
    let mut record = self.record_mut(dir)?;
    record.ref_origins = origins;
    record.origins_state = FacetState::Done;
    Ok(())
  }

  pub fn reference_origins(&self, dir: &DirHandle) -> Option<Vec<ReferenceOrigin>> {
    self.modules.get(dir).map(|record| record.ref_origins.clone())
  }

  pub fn set_parsed_variables(&self, dir: &DirHandle, vars: Arc<ParsedVariables>) -> Result<(), ModuleStoreError> {
    let mut record = self.record_mut(dir)?;
    record.parsed_vars = Some(vars);
    record.vars_state = FacetState::Done;
    Ok(())
  }

  pub fn parsed_variables(&self, dir: &DirHandle) -> Option<Arc<ParsedVariables>> {
    self.modules.get(dir)?.parsed_vars.clone()
  }

  pub fn set_vars_references(&self, dir: &DirHandle, refs: Vec<VarsReference>) -> Result<(), ModuleStoreError> {
    let mut record = self.record_mut(dir)?;
    record.vars_refs = refs;
    record.vars_refs_state = FacetState::Done;
    Ok(())
  }

  pub fn vars_references(&self, dir: &DirHandle) -> Option<Vec<VarsReference>> {
    self.modules.get(dir).map(|record| record.vars_refs.clone())
  }

  pub fn set_registry_fetched(&self, dir: &DirHandle) -> Result<(), ModuleStoreError> {
    let mut record = self.record_mut(dir)?;
    record.registry_state = FacetState::Done;
    Ok(())
  }

  fn record_mut(&self, dir: &DirHandle) -> Result<dashmap::mapref::one::RefMut<'_, DirHandle, ModuleRecord>, ModuleStoreError> {
    self
      .modules
      .get_mut(dir)
      .ok_or_else(|| ModuleStoreError::ModuleNotFound(dir.clone()))
  }
}
