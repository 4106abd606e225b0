//! Open-document table.
//!
//! Tracks the text and version of every document the client has open.
//! Versions are strictly increasing per document; an out-of-order update is
//! rejected and the caller drops it before it ever reaches the indexer.

use std::sync::Arc;

use dashmap::DashMap;
use loom_core::{DirHandle, DocumentHandle, DocumentLanguage, SourceFile};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct Document {
  pub handle: DocumentHandle,
  pub language: DocumentLanguage,
  pub text: Arc<str>,
  pub version: i32,
}

#[derive(Debug, Error)]
pub enum DocumentError {
  #[error("document {0} is not open")]
  NotOpen(DocumentHandle),

  #[error("document {0} has no supported language")]
  UnsupportedLanguage(DocumentHandle),

  #[error("stale version {version} for document {handle} (have {current})")]
  StaleVersion {
    handle: DocumentHandle,
    version: i32,
    current: i32,
  },
}

#[derive(Default)]
pub struct DocumentStore {
  docs: DashMap<DocumentHandle, Document>,
}

impl DocumentStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Open a document (or replace a re-opened one).
  pub fn open(&self, handle: DocumentHandle, text: impl Into<Arc<str>>, version: i32) -> Result<(), DocumentError> {
    let language = handle
      .language()
      .ok_or_else(|| DocumentError::UnsupportedLanguage(handle.clone()))?;
    debug!(doc = %handle, version, "document opened");
    self.docs.insert(
      handle.clone(),
      Document {
        handle,
        language,
        text: text.into(),
        version,
      },
    );
    Ok(())
  }

  /// Replace a document's content. The version must be strictly greater
  /// than the stored one.
  pub fn update(&self, handle: &DocumentHandle, text: impl Into<Arc<str>>, version: i32) -> Result<(), DocumentError> {
    let mut doc = self
      .docs
      .get_mut(handle)
      .ok_or_else(|| DocumentError::NotOpen(handle.clone()))?;
    if version <= doc.version {
      return Err(DocumentError::StaleVersion {
        handle: handle.clone(),
        version,
        current: doc.version,
      });
    }
    doc.text = text.into();
    doc.version = version;
    Ok(())
  }

  pub fn close(&self, handle: &DocumentHandle) -> Result<(), DocumentError> {
    self
      .docs
      .remove(handle)
      .map(|_| debug!(doc = %handle, "document closed"))
      .ok_or_else(|| DocumentError::NotOpen(handle.clone()))
  }

  pub fn get(&self, handle: &DocumentHandle) -> Option<Document> {
    self.docs.get(handle).map(|doc| doc.clone())
  }

  pub fn has_open_documents(&self, dir: &DirHandle) -> bool {
    self.docs.iter().any(|entry| &entry.key().dir == dir)
  }

  /// All open documents of one language in a directory, ordered by file
  /// name so parse inputs are deterministic.
  pub fn sources_in_dir(&self, dir: &DirHandle, language: DocumentLanguage) -> Vec<SourceFile> {
    let mut sources: Vec<SourceFile> = self
      .docs
      .iter()
      .filter(|entry| &entry.key().dir == dir && entry.value().language == language)
      .map(|entry| SourceFile {
        name: entry.key().filename.to_string(),
        text: entry.value().text.clone(),
      })
      .collect();
    sources.sort_by(|a, b| a.name.cmp(&b.name));
    sources
  }
}
