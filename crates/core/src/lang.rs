//! Loom language data model.
//!
//! The syntax-level types ([`ParsedConfig`], [`Block`]) are what the parser
//! produces from raw document text; the semantic types ([`ModuleMetadata`])
//! are derived from them by the indexing jobs. The parser itself ships in a
//! separate crate and is only consumed here through the [`ConfigParser`]
//! trait.

use std::{collections::BTreeMap, sync::Arc};

use thiserror::Error;

// ============================================================================
// Source input
// ============================================================================

/// One document handed to the parser: file name plus full text.
#[derive(Clone, Debug)]
pub struct SourceFile {
  pub name: String,
  pub text: Arc<str>,
}

// ============================================================================
// Syntax level
// ============================================================================

/// Top-level block kinds of the Loom configuration language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockKind {
  /// `component "name" { ... }`, a managed piece of infrastructure
  Component,
  /// `variable "name" { ... }`
  Variable,
  /// `output "name" { ... }`
  Output,
  /// `provider "addr" { ... }`
  Provider,
  /// `include "name" { source = ..., version = ... }`, a nested module call
  Include,
}

impl BlockKind {
  /// The address prefix blocks of this kind are referred to by.
  pub fn addr_prefix(self) -> &'static str {
    match self {
      BlockKind::Component => "component",
      BlockKind::Variable => "var",
      BlockKind::Output => "output",
      BlockKind::Provider => "provider",
      BlockKind::Include => "include",
    }
  }
}

/// One parsed top-level block.
#[derive(Clone, Debug)]
pub struct Block {
  pub kind: BlockKind,
  /// Block labels, e.g. `component "web"` carries `["web"]`.
  pub labels: Vec<String>,
  /// Attribute name -> raw value expression text.
  pub attributes: BTreeMap<String, String>,
  /// File the block was parsed from.
  pub file: String,
}

impl Block {
  /// The address this block is referred to by, e.g. `var.region`.
  pub fn addr(&self) -> Option<String> {
    let name = self.labels.first()?;
    Some(format!("{}.{}", self.kind.addr_prefix(), name))
  }
}

/// Non-fatal problem reported by the parser.
#[derive(Clone, Debug)]
pub struct ParseDiagnostic {
  pub file: String,
  pub message: String,
}

/// Full parse result for a module's configuration documents.
#[derive(Clone, Debug, Default)]
pub struct ParsedConfig {
  pub blocks: Vec<Block>,
  pub diagnostics: Vec<ParseDiagnostic>,
}

/// One variable-definitions file (`*.loomvars`).
#[derive(Clone, Debug, Default)]
pub struct VarFile {
  /// Variable name -> raw value expression text.
  pub assignments: BTreeMap<String, String>,
}

/// Parse result for a module's variable-definitions documents.
#[derive(Clone, Debug, Default)]
pub struct ParsedVariables {
  /// File name -> parsed content.
  pub files: BTreeMap<String, VarFile>,
}

#[derive(Debug, Error)]
pub enum ParseError {
  #[error("{file}: {message}")]
  Syntax { file: String, message: String },
}

/// The configuration-language parser, provided by an external collaborator.
pub trait ConfigParser: Send + Sync {
  fn parse_config(&self, files: &[SourceFile]) -> Result<ParsedConfig, ParseError>;
  fn parse_variables(&self, files: &[SourceFile]) -> Result<ParsedVariables, ParseError>;
}

// ============================================================================
// Semantic level
// ============================================================================

/// Declared variable.
#[derive(Clone, Debug, Default)]
pub struct VariableDecl {
  pub default: Option<String>,
  pub description: Option<String>,
}

/// Declared output.
#[derive(Clone, Debug, Default)]
pub struct OutputDecl {
  pub value: Option<String>,
}

/// A nested module call (`include` block).
#[derive(Clone, Debug)]
pub struct IncludeCall {
  pub source: String,
  pub version: Option<String>,
}

impl IncludeCall {
  /// Whether the call's source points at a module registry rather than a
  /// local path.
  pub fn is_registry_source(&self) -> bool {
    !self.source.starts_with("./") && !self.source.starts_with("../") && self.source.contains('/')
  }
}

/// Metadata derived from a module's parsed configuration.
#[derive(Clone, Debug, Default)]
pub struct ModuleMetadata {
  pub variables: BTreeMap<String, VariableDecl>,
  pub outputs: BTreeMap<String, OutputDecl>,
  /// Provider address -> version constraint.
  pub provider_requirements: BTreeMap<String, String>,
  /// Include name -> call.
  pub includes: BTreeMap<String, IncludeCall>,
}

impl ModuleMetadata {
  /// Derive metadata from a parsed configuration.
  pub fn from_config(config: &ParsedConfig) -> Self {
    let mut meta = Self::default();

    for block in &config.blocks {
      let Some(name) = block.labels.first() else {
        continue;
      };

      match block.kind {
        BlockKind::Variable => {
          meta.variables.insert(
            name.clone(),
            VariableDecl {
              default: block.attributes.get("default").cloned(),
              description: block.attributes.get("description").cloned(),
            },
          );
        }
        BlockKind::Output => {
          meta.outputs.insert(
            name.clone(),
            OutputDecl {
              value: block.attributes.get("value").cloned(),
            },
          );
        }
        BlockKind::Provider => {
          let constraint = block.attributes.get("version").cloned().unwrap_or_default();
          meta.provider_requirements.insert(name.clone(), constraint);
        }
        BlockKind::Include => {
          let Some(source) = block.attributes.get("source") else {
            continue;
          };
          meta.includes.insert(
            name.clone(),
            IncludeCall {
              source: source.clone(),
              version: block.attributes.get("version").cloned(),
            },
          );
        }
        BlockKind::Component => {}
      }
    }

    meta
  }
}
