//! # Tarkib — resolution engine for a dependency injection container
//!
//! Given a requested contract, the engine produces a fully constructed
//! object graph: it discovers registered resolvers, resolves constructor
//! parameters recursively, applies lifetime policy, composes multiple
//! registrations into a decorator chain and caches instances per
//! hierarchical scope.
//!
//! # Architecture
//! ```text
//! ResolverRepository ──lookup──> Resolver
//!        │                         ├─ InstanceFactory      (leaf producer)
//!        │                         ├─ ObjectBuilder        (compiled ctor plan)
//!        │                         ├─ EnumerableResolver   (collections)
//!        │                         ├─ DecoratorChainResolver
//!        │                         └─ ScopedResolver ──> Scope / ScopeService
//!        │
//!   build() once, resolve() many
//! ```
//!
//! Registration and metadata extraction happen in a front end above this
//! crate; the engine receives ready-made descriptors and exposes the
//! resolve and scope lifecycle entry points.
//!
//! # Examples
//! ```
//! use tarkib::prelude::*;
//! use std::sync::Arc;
//!
//! struct Greeter {
//!     greeting: Arc<String>,
//! }
//!
//! let repo = ResolverRepository::new();
//! repo.register_instance(
//!     ContractKey::of::<String>(),
//!     None,
//!     Arc::new(String::from("hello")),
//! );
//! repo.register_type(
//!     ContractKey::of::<Greeter>(),
//!     None,
//!     Lifetime::Local,
//!     TargetShape::Concrete(vec![ConstructorSpec::new(
//!         vec![ParamSpec::of::<String>()],
//!         |args| {
//!             let greeting = args[0].clone().downcast::<String>().unwrap();
//!             instance_of(Greeter { greeting })
//!         },
//!     )]),
//! );
//!
//! let greeter = repo.resolve_as::<Greeter>().unwrap();
//! assert_eq!(&**greeter.greeting, "hello");
//! ```

pub mod builder;
pub mod chain;
pub mod enumerable;
pub mod error;
pub mod key;
pub mod lifetime;
pub mod repository;
pub mod resolver;
pub mod scope;

pub use builder::{ConstructorSpec, ObjectBuilder, ParamSpec, TargetShape};
pub use chain::DecoratorChainResolver;
pub use enumerable::{EnumerableResolver, SequenceRequest, SequenceShape};
pub use error::{ConstructionError, ResolveError, Result, ScopeClosedError};
pub use key::{ContractKey, Qualifier};
pub use lifetime::Lifetime;
pub use repository::ResolverRepository;
pub use resolver::{
    DecoratingFactory, Instance, InstanceFactory, Next, Resolver, instance_of,
};
pub use scope::{Finalizer, Scope, ScopeKey, ScopeService, ScopedEntry, ScopedResolver};

/// Commonly used engine types.
pub mod prelude {
    pub use crate::builder::{ConstructorSpec, ParamSpec, TargetShape};
    pub use crate::enumerable::{SequenceRequest, SequenceShape};
    pub use crate::error::{ResolveError, Result};
    pub use crate::key::ContractKey;
    pub use crate::lifetime::Lifetime;
    pub use crate::repository::ResolverRepository;
    pub use crate::resolver::{Instance, Resolver, instance_of};
    pub use crate::scope::{Scope, ScopeService, ScopedEntry, ScopedResolver};
}
