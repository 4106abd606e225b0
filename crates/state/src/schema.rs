//! Provider schema store.

use std::sync::Arc;

use dashmap::DashMap;
use loom_core::ProviderSchema;
use tracing::debug;

/// Preloaded provider schemas, keyed by provider address and version.
#[derive(Default)]
pub struct SchemaStore {
  schemas: DashMap<(String, String), Arc<ProviderSchema>>,
}

impl SchemaStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, schema: ProviderSchema) {
    debug!(provider = %schema.provider, version = %schema.version, "schema stored");
    self
      .schemas
      .insert((schema.provider.clone(), schema.version.clone()), Arc::new(schema));
  }

  pub fn get(&self, provider: &str, version: &str) -> Option<Arc<ProviderSchema>> {
    self
      .schemas
      .get(&(provider.to_string(), version.to_string()))
      .map(|schema| schema.clone())
  }

  /// Whether any version of the provider's schema is loaded.
  pub fn has_provider(&self, provider: &str) -> bool {
    self.schemas.iter().any(|entry| entry.key().0 == provider)
  }

  pub fn len(&self) -> usize {
    self.schemas.len()
  }

  pub fn is_empty(&self) -> bool {
    self.schemas.is_empty()
  }
}
