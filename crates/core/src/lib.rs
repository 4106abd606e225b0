mod config;
mod document;
mod lang;
mod reference;
mod registry;
mod schema;

pub use config::{Config, IndexingConfig};
pub use document::{DirHandle, DocumentHandle, DocumentLanguage};
pub use lang::{
  Block, BlockKind, ConfigParser, IncludeCall, ModuleMetadata, OutputDecl, ParseDiagnostic, ParseError, ParsedConfig,
  ParsedVariables, SourceFile, VarFile, VariableDecl,
};
pub use reference::{ReferenceOrigin, ReferenceTarget, VarsReference};
pub use registry::{RegistryClient, RegistryError, RegistryInput, RegistryModule};
pub use schema::{ProviderSchema, SchemaSource};
