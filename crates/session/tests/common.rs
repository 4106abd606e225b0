//! Shared fixtures for the session integration tests: a line-oriented
//! parser double, static schema/registry doubles, and sample documents.

use std::{
  collections::BTreeMap,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
  time::Duration,
};

use async_trait::async_trait;
use indexer::Collaborators;
use loom_core::{
  Block, BlockKind, Config, ConfigParser, DirHandle, DocumentHandle, ParseDiagnostic, ParseError, ParsedConfig,
  ParsedVariables, ProviderSchema, RegistryClient, RegistryError, RegistryInput, RegistryModule, SchemaSource,
  SourceFile, VarFile,
};
use session::Session;

pub const MAIN_LOOM: &str = r#"
provider "cloud" {
  version = ">= 1.2"
}

variable "region" {
  default = "us-1"
  description = "deployment region"
}

component "web" {
  image = var.region
  replicas = 3
}

include "net" {
  source = "registry.loom.dev/core/net"
  version = "0.3.0"
}

output "url" {
  value = component.web
}
"#;

pub const PROD_LOOMVARS: &str = "region = \"eu-1\"\n";

pub fn handle(dir: &str, name: &str) -> DocumentHandle {
  DocumentHandle::new(DirHandle::new(dir), name)
}

// ============================================================================
// Parser double
// ============================================================================

/// Line-oriented parser for the test documents. Counts invocations and
/// tracks peak concurrency so scheduling behavior can be asserted; an
/// optional delay keeps bodies in flight long enough to observe overlap.
#[derive(Default)]
pub struct LineParser {
  pub parse_calls: AtomicUsize,
  pub max_concurrency: AtomicUsize,
  current: AtomicUsize,
  delay: Option<Duration>,
}

impl LineParser {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_delay(delay: Duration) -> Self {
    Self {
      delay: Some(delay),
      ..Self::default()
    }
  }

  fn enter(&self) {
    self.parse_calls.fetch_add(1, Ordering::SeqCst);
    let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_concurrency.fetch_max(now, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      std::thread::sleep(delay);
    }
  }

  fn exit(&self) {
    self.current.fetch_sub(1, Ordering::SeqCst);
  }
}

impl ConfigParser for LineParser {
  fn parse_config(&self, files: &[SourceFile]) -> Result<ParsedConfig, ParseError> {
    self.enter();
    let result = parse_config_files(files);
    self.exit();
    result
  }

  fn parse_variables(&self, files: &[SourceFile]) -> Result<ParsedVariables, ParseError> {
    let mut parsed = ParsedVariables::default();
    for file in files {
      check_marker(file)?;
      let mut var_file = VarFile::default();
      for line in file.text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
          continue;
        }
        if let Some((name, value)) = line.split_once('=') {
          var_file
            .assignments
            .insert(name.trim().to_string(), value.trim().trim_matches('"').to_string());
        }
      }
      parsed.files.insert(file.name.clone(), var_file);
    }
    Ok(parsed)
  }
}

fn check_marker(file: &SourceFile) -> Result<(), ParseError> {
  if file.text.contains("!!syntax-error") {
    return Err(ParseError::Syntax {
      file: file.name.clone(),
      message: "invalid token `!!`".to_string(),
    });
  }
  Ok(())
}

fn parse_config_files(files: &[SourceFile]) -> Result<ParsedConfig, ParseError> {
  let mut config = ParsedConfig::default();

  for file in files {
    check_marker(file)?;

    let mut current: Option<Block> = None;
    for line in file.text.lines() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      if line == "}" {
        if let Some(block) = current.take() {
          config.blocks.push(block);
        }
        continue;
      }
      if let Some(ref mut block) = current {
        if let Some((key, value)) = line.split_once('=') {
          block
            .attributes
            .insert(key.trim().to_string(), value.trim().trim_matches('"').to_string());
        }
        continue;
      }

      let mut parts = line.split_whitespace();
      let kind = match parts.next() {
        Some("component") => BlockKind::Component,
        Some("variable") => BlockKind::Variable,
        Some("output") => BlockKind::Output,
        Some("provider") => BlockKind::Provider,
        Some("include") => BlockKind::Include,
        _ => {
          config.diagnostics.push(ParseDiagnostic {
            file: file.name.clone(),
            message: format!("unknown block: {line}"),
          });
          continue;
        }
      };
      let label = parts.next().unwrap_or("").trim_matches('"').to_string();
      current = Some(Block {
        kind,
        labels: vec![label],
        attributes: BTreeMap::new(),
        file: file.name.clone(),
      });
    }
  }

  Ok(config)
}

// ============================================================================
// Schema and registry doubles
// ============================================================================

pub struct StaticSchemas;

impl SchemaSource for StaticSchemas {
  fn provider_schema(&self, provider: &str, _constraint: &str) -> Option<ProviderSchema> {
    (provider == "cloud").then(|| ProviderSchema {
      provider: provider.to_string(),
      version: "1.4.0".to_string(),
      components: BTreeMap::from([(
        "web".to_string(),
        vec!["image".to_string(), "replicas".to_string()],
      )]),
    })
  }
}

pub struct StaticRegistry;

#[async_trait]
impl RegistryClient for StaticRegistry {
  async fn module_versions(&self, source: &str) -> Result<Vec<String>, RegistryError> {
    if source.starts_with("registry.loom.dev/") {
      Ok(vec!["0.3.0".to_string(), "0.2.0".to_string()])
    } else {
      Err(RegistryError::NotFound(source.to_string()))
    }
  }

  async fn module_metadata(&self, source: &str, version: &str) -> Result<RegistryModule, RegistryError> {
    if !source.starts_with("registry.loom.dev/") {
      return Err(RegistryError::NotFound(source.to_string()));
    }
    Ok(RegistryModule {
      source: source.to_string(),
      version: version.to_string(),
      inputs: vec![RegistryInput {
        name: "cidr".to_string(),
        required: true,
      }],
      outputs: vec!["id".to_string()],
    })
  }
}

// ============================================================================
// Session construction
// ============================================================================

/// Route session logs to the test output when RUST_LOG is set.
fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

pub fn collaborators(parser: Arc<LineParser>) -> Collaborators {
  Collaborators {
    parser,
    schema_source: Arc::new(StaticSchemas),
    registry_client: Arc::new(StaticRegistry),
  }
}

pub fn start_session(parser: Arc<LineParser>) -> Session {
  start_session_with_config(&Config::default(), parser)
}

pub fn start_session_with_config(config: &Config, parser: Arc<LineParser>) -> Session {
  init_tracing();
  Session::start(config, collaborators(parser))
}
