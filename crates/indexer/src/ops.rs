//! Job bodies: the operations that read documents and mutate the module,
//! schema and registry stores.
//!
//! Every operation follows the same shape: check cancellation, begin its
//! facet (short-circuiting when the module is already in that processing
//! state, unless the context carries the ignore-state flag), do the work,
//! and either publish the result or abort the facet so a later run retries.

use std::sync::Arc;

use job::JobCtx;
use loom_core::{
  ConfigParser, DirHandle, DocumentLanguage, ModuleMetadata, ParseError, ReferenceOrigin, ReferenceTarget,
  RegistryClient, RegistryError, SchemaSource, VarsReference,
};
use state::{DocumentStore, Facet, ModuleStore, ModuleStoreError, RegistryStore, SchemaStore};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OpError {
  #[error(transparent)]
  Module(#[from] ModuleStoreError),

  #[error(transparent)]
  Parse(#[from] ParseError),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error("module {dir} is missing {what}")]
  Missing { dir: DirHandle, what: &'static str },

  #[error("operation cancelled")]
  Cancelled,
}

fn checkpoint(ctx: &JobCtx) -> Result<(), OpError> {
  if ctx.is_cancelled() {
    Err(OpError::Cancelled)
  } else {
    Ok(())
  }
}

/// Parse the module's open configuration documents.
pub async fn parse_config(
  ctx: &JobCtx,
  documents: &DocumentStore,
  modules: &ModuleStore,
  parser: &dyn ConfigParser,
  dir: &DirHandle,
) -> Result<(), OpError> {
  checkpoint(ctx)?;
  if !modules.begin(dir, Facet::Config, ctx.ignore_state())? {
    return Ok(());
  }

  let sources = documents.sources_in_dir(dir, DocumentLanguage::Config);
  match parser.parse_config(&sources) {
    Ok(parsed) => {
      debug!(dir = %dir, blocks = parsed.blocks.len(), "configuration parsed");
      modules.set_parsed_config(dir, Arc::new(parsed))?;
      Ok(())
    }
    Err(err) => {
      modules.abort(dir, Facet::Config)?;
      Err(err.into())
    }
  }
}

/// Derive module metadata (variables, outputs, provider requirements,
/// include calls) from the parsed configuration.
pub async fn load_metadata(ctx: &JobCtx, modules: &ModuleStore, dir: &DirHandle) -> Result<(), OpError> {
  checkpoint(ctx)?;
  if !modules.begin(dir, Facet::Metadata, ctx.ignore_state())? {
    return Ok(());
  }

  let Some(config) = modules.parsed_config(dir) else {
    modules.abort(dir, Facet::Metadata)?;
    return Err(OpError::Missing {
      dir: dir.clone(),
      what: "parsed configuration",
    });
  };

  let meta = ModuleMetadata::from_config(&config);
  debug!(dir = %dir, variables = meta.variables.len(), includes = meta.includes.len(), "metadata loaded");
  modules.set_metadata(dir, Arc::new(meta))?;
  Ok(())
}

/// Make the embedded schemas for the module's provider requirements
/// available in the schema store.
pub async fn preload_embedded_schema(
  ctx: &JobCtx,
  modules: &ModuleStore,
  schemas: &SchemaStore,
  source: &dyn SchemaSource,
  dir: &DirHandle,
) -> Result<(), OpError> {
  checkpoint(ctx)?;
  if !modules.begin(dir, Facet::Schema, ctx.ignore_state())? {
    return Ok(());
  }

  let Some(meta) = modules.metadata(dir) else {
    modules.abort(dir, Facet::Schema)?;
    return Err(OpError::Missing {
      dir: dir.clone(),
      what: "metadata",
    });
  };

  for (provider, constraint) in &meta.provider_requirements {
    if ctx.is_cancelled() {
      modules.abort(dir, Facet::Schema)?;
      return Err(OpError::Cancelled);
    }
    match source.provider_schema(provider, constraint) {
      Some(schema) => schemas.insert(schema),
      None => debug!(provider = %provider, constraint = %constraint, "no embedded schema available"),
    }
  }

  modules.set_schema_ready(dir)?;
  Ok(())
}

/// Collect the addresses the module's blocks expose.
pub async fn decode_reference_targets(ctx: &JobCtx, modules: &ModuleStore, dir: &DirHandle) -> Result<(), OpError> {
  checkpoint(ctx)?;
  if !modules.begin(dir, Facet::RefTargets, ctx.ignore_state())? {
    return Ok(());
  }

  let Some(config) = modules.parsed_config(dir) else {
    modules.abort(dir, Facet::RefTargets)?;
    return Err(OpError::Missing {
      dir: dir.clone(),
      what: "parsed configuration",
    });
  };

  let mut targets: Vec<ReferenceTarget> = config
    .blocks
    .iter()
    .filter_map(|block| block.addr())
    .map(|addr| ReferenceTarget { addr })
    .collect();
  targets.sort();
  targets.dedup();

  debug!(dir = %dir, targets = targets.len(), "reference targets decoded");
  modules.set_reference_targets(dir, targets)?;
  Ok(())
}

/// Collect the references the module's attribute values make.
pub async fn decode_reference_origins(ctx: &JobCtx, modules: &ModuleStore, dir: &DirHandle) -> Result<(), OpError> {
  checkpoint(ctx)?;
  if !modules.begin(dir, Facet::RefOrigins, ctx.ignore_state())? {
    return Ok(());
  }

  let Some(config) = modules.parsed_config(dir) else {
    modules.abort(dir, Facet::RefOrigins)?;
    return Err(OpError::Missing {
      dir: dir.clone(),
      what: "parsed configuration",
    });
  };

  let mut origins = Vec::new();
  for block in &config.blocks {
    let Some(from_base) = block.addr() else { continue };
    for (attr, value) in &block.attributes {
      for addr in collect_refs(value) {
        origins.push(ReferenceOrigin {
          addr,
          from: format!("{from_base}.{attr}"),
        });
      }
    }
  }
  origins.sort();
  origins.dedup();

  debug!(dir = %dir, origins = origins.len(), "reference origins decoded");
  modules.set_reference_origins(dir, origins)?;
  Ok(())
}

/// Parse the module's open variable-definitions documents.
pub async fn parse_variables(
  ctx: &JobCtx,
  documents: &DocumentStore,
  modules: &ModuleStore,
  parser: &dyn ConfigParser,
  dir: &DirHandle,
) -> Result<(), OpError> {
  checkpoint(ctx)?;
  if !modules.begin(dir, Facet::Variables, ctx.ignore_state())? {
    return Ok(());
  }

  let sources = documents.sources_in_dir(dir, DocumentLanguage::Vars);
  match parser.parse_variables(&sources) {
    Ok(parsed) => {
      debug!(dir = %dir, files = parsed.files.len(), "variables parsed");
      modules.set_parsed_variables(dir, Arc::new(parsed))?;
      Ok(())
    }
    Err(err) => {
      modules.abort(dir, Facet::Variables)?;
      Err(err.into())
    }
  }
}

/// Resolve which variables the module's variable-definitions files assign.
pub async fn decode_vars_references(ctx: &JobCtx, modules: &ModuleStore, dir: &DirHandle) -> Result<(), OpError> {
  checkpoint(ctx)?;
  if !modules.begin(dir, Facet::VarsRefs, ctx.ignore_state())? {
    return Ok(());
  }

  let Some(vars) = modules.parsed_variables(dir) else {
    modules.abort(dir, Facet::VarsRefs)?;
    return Err(OpError::Missing {
      dir: dir.clone(),
      what: "parsed variables",
    });
  };

  let mut refs = Vec::new();
  for (file, var_file) in &vars.files {
    for name in var_file.assignments.keys() {
      refs.push(VarsReference {
        name: name.clone(),
        file: file.clone(),
      });
    }
  }

  debug!(dir = %dir, refs = refs.len(), "vars references decoded");
  modules.set_vars_references(dir, refs)?;
  Ok(())
}

/// Fetch registry metadata for the module's registry-sourced includes.
/// Best effort: runs without metadata being guaranteed; when it is not
/// there yet, the facet is left untouched so a later fetch retries.
pub async fn fetch_registry_module(
  ctx: &JobCtx,
  modules: &ModuleStore,
  registry: &RegistryStore,
  client: &dyn RegistryClient,
  dir: &DirHandle,
) -> Result<(), OpError> {
  checkpoint(ctx)?;
  if !modules.begin(dir, Facet::Registry, ctx.ignore_state())? {
    return Ok(());
  }

  let Some(meta) = modules.metadata(dir) else {
    modules.abort(dir, Facet::Registry)?;
    return Ok(());
  };

  for call in meta.includes.values() {
    if !call.is_registry_source() || registry.exists(&call.source) {
      continue;
    }
    if ctx.is_cancelled() {
      modules.abort(dir, Facet::Registry)?;
      return Err(OpError::Cancelled);
    }

    let fetched = fetch_one(client, &call.source, call.version.as_deref()).await;
    match fetched {
      Ok(module) => registry.insert(module),
      Err(err) => {
        modules.abort(dir, Facet::Registry)?;
        return Err(err.into());
      }
    }
  }

  modules.set_registry_fetched(dir)?;
  Ok(())
}

async fn fetch_one(
  client: &dyn RegistryClient,
  source: &str,
  pinned: Option<&str>,
) -> Result<loom_core::RegistryModule, RegistryError> {
  let version = match pinned {
    Some(version) => version.to_string(),
    None => client
      .module_versions(source)
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| RegistryError::NotFound(source.to_string()))?,
  };
  client.module_metadata(source, &version).await
}

/// Extract address-like tokens (`var.x`, `component.web.id`, ...) from a
/// raw attribute value.
fn collect_refs(value: &str) -> Vec<String> {
  const PREFIXES: [&str; 4] = ["var", "component", "output", "include"];

  value
    .split(|c: char| !(c.is_alphanumeric() || c == '.' || c == '_' || c == '-'))
    .filter_map(|token| {
      let token = token.trim_end_matches('.');
      let (head, rest) = token.split_once('.')?;
      (PREFIXES.contains(&head) && !rest.is_empty()).then(|| token.to_string())
    })
    .collect()
}
