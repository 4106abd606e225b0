//! Reference model: addresses a module exposes and the places that point
//! at them. Completion and go-to-definition read these; the indexing jobs
//! write them.

/// A referenceable address produced by a module, e.g. `var.region`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReferenceTarget {
  pub addr: String,
}

/// A reference made from inside a block attribute to some target address.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReferenceOrigin {
  /// The address being referred to, e.g. `var.region`.
  pub addr: String,
  /// Where the reference occurs, e.g. `component.web.image`.
  pub from: String,
}

/// A variable assignment found in a variable-definitions file.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct VarsReference {
  /// The variable the assignment refers to.
  pub name: String,
  /// File the assignment lives in.
  pub file: String,
}
