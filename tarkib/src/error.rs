//! Error types for resolution engine operations.
//!
//! Every failure path surfaces a typed error; a missing resolver is never
//! represented by a null-like placeholder. Shape and constructor problems
//! surface at build time so misconfiguration is caught before the first
//! resolve. Resolve-time errors are non-retryable: the engine performs no
//! fallback or partial construction.

use std::fmt;

use crate::enumerable::SequenceShape;
use crate::key::{ContractKey, Qualifier};

/// Main error type for resolution operations.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No resolver is registered for the requested contract.
    #[error("{}", .0)]
    NotRegistered(NotRegisteredError),

    /// A constructor parameter has no registered resolver.
    #[error("{}", .0)]
    MissingDependency(MissingDependencyError),

    /// The target type cannot be instantiated.
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    /// A circular constructor graph was detected while compiling a plan.
    #[error("{}", .0)]
    CircularDependency(CircularDependencyError),

    /// The requested collection shape cannot hold enumerable results.
    #[error(
        "unsupported container shape {shape:?} for element {element}\
         \n  Hint: ordered shapes (Sequence, List, Queue) preserve registration order; unordered shapes cannot"
    )]
    UnsupportedContainer {
        shape: SequenceShape,
        element: ContractKey,
    },

    /// A cached-instance lookup hit a scope that was already closed.
    #[error(transparent)]
    ScopeClosed(#[from] ScopeClosedError),

    /// A typed resolve produced an instance of a different concrete type.
    #[error("type mismatch resolving {key}: stored instance is not a {expected}")]
    TypeMismatch {
        key: ContractKey,
        expected: &'static str,
    },
}

/// Errors raised while compiling an instantiation plan for a concrete type.
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    /// The target type exposes no constructor.
    #[error("type {0} has no constructor\n  Hint: register a constructor descriptor for it")]
    NoConstructor(ContractKey),

    /// The target type exposes more than one constructor.
    #[error("type {key} has {count} constructors; exactly one is required")]
    AmbiguousConstructor { key: ContractKey, count: usize },

    /// The target is an interface or abstract type and cannot be built.
    #[error("cannot construct {0}: target is not an instantiable type")]
    NotInstantiable(ContractKey),

    /// Resolve was invoked on a resolver whose plan was never compiled.
    #[error("resolver for {0} was not built before resolve")]
    NotBuilt(ContractKey),
}

/// Error when a requested contract has no resolver.
#[derive(Debug)]
pub struct NotRegisteredError {
    /// The contract that was requested.
    pub requested: ContractKey,
    /// The qualifier used for the lookup, if any.
    pub qualifier: Option<Qualifier>,
}

impl fmt::Display for NotRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no resolver registered for {}", self.requested)?;
        if let Some(qualifier) = self.qualifier {
            write!(f, " (qualifier {qualifier:?})")?;
        }
        write!(
            f,
            "\n  Hint: register an implementation for {} before resolving",
            self.requested.type_name()
        )
    }
}

/// Error when a constructor parameter cannot be satisfied.
#[derive(Debug)]
pub struct MissingDependencyError {
    /// The type whose plan was being compiled.
    pub target: ContractKey,
    /// The parameter contract that has no resolver.
    pub parameter: ContractKey,
    /// The qualifier attached to the parameter, if any.
    pub qualifier: Option<Qualifier>,
}

impl fmt::Display for MissingDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot build {}: no resolver for parameter {}",
            self.target, self.parameter
        )?;
        if let Some(qualifier) = self.qualifier {
            write!(f, " (qualifier {qualifier:?})")?;
        }
        write!(
            f,
            "\n  Hint: register {} or fix the parameter qualifier",
            self.parameter.type_name()
        )
    }
}

/// Error when the constructor graph loops back on itself.
///
/// Shows the full chain so you can see where the cycle is.
#[derive(Debug)]
pub struct CircularDependencyError {
    /// The chain of contracts that forms the cycle, first to last.
    pub chain: Vec<ContractKey>,
}

impl fmt::Display for CircularDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain: Vec<&str> = self.chain.iter().map(ContractKey::type_name).collect();
        write!(f, "circular dependency detected:\n  {}", chain.join(" -> "))?;
        write!(f, "\n  Hint: break the cycle or inject a factory instead")
    }
}

/// Error when a scope is used after `close()`.
#[derive(Debug, thiserror::Error)]
#[error("scope #{scope_id} is closed; cached lookups after close are a usage error")]
pub struct ScopeClosedError {
    /// Identifier of the closed scope.
    pub scope_id: u64,
}

/// Convenient result alias for engine operations.
pub type Result<T> = std::result::Result<T, ResolveError>;
