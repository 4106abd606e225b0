//! Thread-safe in-memory stores the indexing jobs read and mutate.
//!
//! Every store is keyed on `DashMap` for lock-free concurrent access, the
//! same way the rest of the server shares per-key state. None of this
//! persists: the stores live for the process lifetime only.

mod document;
mod module;
mod registry;
mod schema;

pub use document::{Document, DocumentError, DocumentStore};
pub use module::{Facet, FacetState, ModuleStore, ModuleStoreError};
pub use registry::RegistryStore;
pub use schema::SchemaStore;
