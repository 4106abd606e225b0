//! Registry module metadata store.

use std::sync::Arc;

use dashmap::DashMap;
use loom_core::RegistryModule;
use tracing::debug;

/// Metadata fetched from the module registry, keyed by source address.
/// Populated by the low-priority background fetch job; best effort only.
#[derive(Default)]
pub struct RegistryStore {
  modules: DashMap<String, Arc<RegistryModule>>,
}

impl RegistryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, module: RegistryModule) {
    debug!(source = %module.source, version = %module.version, "registry module stored");
    self.modules.insert(module.source.clone(), Arc::new(module));
  }

  pub fn get(&self, source: &str) -> Option<Arc<RegistryModule>> {
    self.modules.get(source).map(|module| module.clone())
  }

  pub fn exists(&self, source: &str) -> bool {
    self.modules.contains_key(source)
  }

  pub fn len(&self) -> usize {
    self.modules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.modules.is_empty()
  }
}
