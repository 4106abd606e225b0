//! Module registry client seam.
//!
//! The HTTP client implementation lives outside the core; the low-priority
//! registry job only consumes this trait.

use async_trait::async_trait;
use thiserror::Error;

/// Registry metadata for one module at one version.
#[derive(Clone, Debug)]
pub struct RegistryModule {
  pub source: String,
  pub version: String,
  pub inputs: Vec<RegistryInput>,
  pub outputs: Vec<String>,
}

/// One declared input of a registry module.
#[derive(Clone, Debug)]
pub struct RegistryInput {
  pub name: String,
  pub required: bool,
}

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("registry request failed: {0}")]
  Request(String),
  #[error("module {0} not found in registry")]
  NotFound(String),
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
  /// Published versions of a module, newest first.
  async fn module_versions(&self, source: &str) -> Result<Vec<String>, RegistryError>;

  /// Full metadata for one module version.
  async fn module_metadata(&self, source: &str, version: &str) -> Result<RegistryModule, RegistryError>;
}
