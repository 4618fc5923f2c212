//! Instance lifetime policy.
//!
//! [`Lifetime`] decides what a resolver does with the instances it produces:
//! - [`Lifetime::Global`] is computed once and reused forever. Dependents
//!   bake the value into their compiled plans as a constant.
//! - [`Lifetime::Local`] is recomputed on every resolve.
//!
//! Per-unit-of-work caching is layered on top of `Local` via
//! [`crate::scope::Scope`], keyed per dependency.

use std::fmt;

/// Defines how long an instance produced by a resolver lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// One instance shared across the whole container lifetime.
    ///
    /// Computed at most once; dependents constant-fold the value into
    /// their instantiation plans at build time.
    Global,

    /// A fresh instance on every resolve call. Never cached by the
    /// resolver itself.
    Local,
}

impl Lifetime {
    /// Returns `true` if instances are shared rather than rebuilt per call.
    #[inline]
    pub fn is_shared(&self) -> bool {
        matches!(self, Lifetime::Global)
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Global => write!(f, "Global"),
            Lifetime::Local => write!(f, "Local"),
        }
    }
}
