//! Provider schema types and the embedded-schema lookup seam.

use std::collections::BTreeMap;

/// Schema for one provider at one version.
#[derive(Clone, Debug)]
pub struct ProviderSchema {
  pub provider: String,
  pub version: String,
  /// Component type name -> attribute names the provider accepts.
  pub components: BTreeMap<String, Vec<String>>,
}

/// Lookup into the schema bundle embedded in the server binary.
///
/// The bundle itself (blob format, decompression) lives outside the core;
/// the preload job only asks whether a schema matching a module's provider
/// requirement is available.
pub trait SchemaSource: Send + Sync {
  fn provider_schema(&self, provider: &str, constraint: &str) -> Option<ProviderSchema>;
}
