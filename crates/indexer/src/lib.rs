//! The indexer: translates document lifecycle events into the canonical job
//! graphs and supplies the job bodies that drive the stores.

mod indexer;
pub mod ops;

pub use indexer::{Collaborators, Indexer};
