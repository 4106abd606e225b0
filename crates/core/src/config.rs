//! Server configuration.
//!
//! Plain serde structs with documented defaults; every section defaults
//! sensibly so a missing or partial config file still yields a working
//! server.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
  /// Indexing and scheduling settings
  pub indexing: IndexingConfig,
}

/// Worker-pool sizing for the two scheduler tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
  /// Workers serving parse/decode jobs (default: max(2, cpu count))
  pub normal_parallelism: usize,

  /// Workers serving background registry fetches (default: 1)
  ///
  /// Kept low so network traffic cannot starve interactive work.
  pub low_parallelism: usize,
}

impl Default for IndexingConfig {
  fn default() -> Self {
    Self {
      normal_parallelism: 2.max(num_cpus::get()),
      low_parallelism: 1,
    }
  }
}
