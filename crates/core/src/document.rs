//! Directory and document handles.
//!
//! A [`DirHandle`] is the canonical absolute path of one Loom module
//! directory. It is the coarse key everything else in the server hangs off
//! of: job deduplication, module records, and document grouping. Handles are
//! cheap to clone and safe to use as map keys.

use std::{
  fmt,
  path::{Path, PathBuf},
  sync::Arc,
};

/// Canonical absolute path of a module directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirHandle(Arc<Path>);

impl DirHandle {
  /// Create a handle from an absolute directory path.
  ///
  /// The path is used verbatim as the identity of the module; callers are
  /// expected to pass an already-normalized absolute path.
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self(Arc::from(path.as_ref()))
  }

  pub fn path(&self) -> &Path {
    &self.0
  }
}

impl fmt::Display for DirHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.display().fmt(f)
  }
}

/// Handle to a single open document: the module directory plus the file name
/// within it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentHandle {
  pub dir: DirHandle,
  pub filename: Arc<str>,
}

impl DocumentHandle {
  pub fn new(dir: DirHandle, filename: impl Into<Arc<str>>) -> Self {
    Self {
      dir,
      filename: filename.into(),
    }
  }

  /// The language of this document, derived from its file extension.
  pub fn language(&self) -> Option<DocumentLanguage> {
    DocumentLanguage::from_filename(&self.filename)
  }

  pub fn full_path(&self) -> PathBuf {
    self.dir.path().join(self.filename.as_ref())
  }
}

impl fmt::Display for DocumentHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.dir, self.filename)
  }
}

/// The two document languages the indexer distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DocumentLanguage {
  /// Module configuration (`*.loom`)
  Config,
  /// Variable definitions (`*.loomvars`)
  Vars,
}

impl DocumentLanguage {
  pub fn from_filename(name: &str) -> Option<Self> {
    if name.ends_with(".loomvars") {
      Some(Self::Vars)
    } else if name.ends_with(".loom") {
      Some(Self::Config)
    } else {
      None
    }
  }
}
