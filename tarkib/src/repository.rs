//! Resolver repository: the contract index and the resolve entry points.
//!
//! The repository maps a [`ContractKey`] to the ordered list of resolvers
//! registered for it. It performs no construction itself; it is a pure
//! index that the builders and collection resolvers consult. Registration
//! is append-only during setup; afterwards the index is read concurrently,
//! which is why it lives in a [`DashMap`].
//!
//! # Examples
//! ```
//! use tarkib::prelude::*;
//! use std::sync::Arc;
//!
//! let repo = ResolverRepository::new();
//! repo.register_instance(
//!     ContractKey::of::<String>(),
//!     None,
//!     Arc::new(String::from("postgres://localhost")),
//! );
//!
//! let url = repo.resolve_as::<String>().unwrap();
//! assert_eq!(&*url, "postgres://localhost");
//! ```

use std::any::type_name;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::builder::{ObjectBuilder, TargetShape};
use crate::chain::DecoratorChainResolver;
use crate::enumerable::{EnumerableResolver, SequenceRequest};
use crate::error::{NotRegisteredError, ResolveError, Result};
use crate::key::{ContractKey, Qualifier};
use crate::lifetime::Lifetime;
use crate::resolver::{DecoratingFactory, Instance, InstanceFactory, Next, Resolver};

#[derive(Default)]
struct ContractSlot {
    entries: Vec<(Option<Qualifier>, Arc<dyn Resolver>)>,
}

/// Registry mapping `(contract, qualifier)` to ordered resolver lists.
///
/// Duplicate registrations under one `(contract, qualifier)` pair never
/// overwrite each other; lookups compose them into a decorator chain in
/// registration order.
#[derive(Default)]
pub struct ResolverRepository {
    contracts: DashMap<ContractKey, ContractSlot>,
    // Composed lookups are cached so their one-time build state survives
    // across resolves. Registration is append-only during setup and the
    // caches are populated on first lookup afterwards.
    chains: DashMap<(ContractKey, Option<Qualifier>), Arc<DecoratorChainResolver>>,
    sequences: DashMap<SequenceRequest, Arc<EnumerableResolver>>,
}

impl ResolverRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ──

    /// Appends a resolver for a contract. Never overwrites.
    pub fn register(
        &self,
        contract: ContractKey,
        qualifier: Option<Qualifier>,
        resolver: Arc<dyn Resolver>,
    ) {
        debug!(contract = %contract, ?qualifier, lifetime = %resolver.lifetime(), "registered resolver");
        self.contracts
            .entry(contract)
            .or_default()
            .entries
            .push((qualifier, resolver));
    }

    /// Registers a pre-built instance (always `Global`).
    pub fn register_instance(
        &self,
        contract: ContractKey,
        qualifier: Option<Qualifier>,
        instance: Instance,
    ) {
        self.register(
            contract,
            qualifier,
            Arc::new(InstanceFactory::from_instance(instance)),
        );
    }

    /// Registers a zero-argument factory function.
    pub fn register_factory(
        &self,
        contract: ContractKey,
        qualifier: Option<Qualifier>,
        lifetime: Lifetime,
        producer: impl Fn() -> Instance + Send + Sync + 'static,
    ) {
        self.register(
            contract,
            qualifier,
            Arc::new(InstanceFactory::new(lifetime, producer)),
        );
    }

    /// Registers a concrete constructible type by its shape descriptor.
    pub fn register_type(
        &self,
        contract: ContractKey,
        qualifier: Option<Qualifier>,
        lifetime: Lifetime,
        shape: TargetShape,
    ) {
        let builder = ObjectBuilder::new(contract.clone(), lifetime, shape);
        self.register(contract, qualifier, Arc::new(builder));
    }

    /// Registers a decorator stage for a contract.
    pub fn register_decorator(
        &self,
        contract: ContractKey,
        qualifier: Option<Qualifier>,
        decorate: impl Fn(Option<&Next>) -> Result<Instance> + Send + Sync + 'static,
    ) {
        self.register(contract, qualifier, Arc::new(DecoratingFactory::new(decorate)));
    }

    // ── Lookup ──

    /// Looks up the resolver for `(contract, qualifier)`.
    ///
    /// # Errors
    /// [`ResolveError::NotRegistered`] when nothing matches. Multiple
    /// matches compose into a [`DecoratorChainResolver`].
    pub fn get_resolver(
        &self,
        contract: &ContractKey,
        qualifier: Option<Qualifier>,
    ) -> Result<Arc<dyn Resolver>> {
        let mut matches: Vec<Arc<dyn Resolver>> = match self.contracts.get(contract) {
            Some(slot) => slot
                .entries
                .iter()
                .filter(|(registered, _)| *registered == qualifier)
                .map(|(_, resolver)| resolver.clone())
                .collect(),
            None => Vec::new(),
        };

        match matches.len() {
            0 => Err(ResolveError::NotRegistered(NotRegisteredError {
                requested: contract.clone(),
                qualifier,
            })),
            1 => Ok(matches.remove(0)),
            count => {
                trace!(contract = %contract, stages = count, "composing decorator chain");
                let chain = self
                    .chains
                    .entry((contract.clone(), qualifier))
                    .or_insert_with(|| {
                        Arc::new(DecoratorChainResolver::new(contract.clone(), qualifier, matches))
                    })
                    .clone();
                Ok(chain)
            }
        }
    }

    /// Returns every resolver registered for a contract, in registration
    /// order and regardless of qualifier. Empty when nothing is registered.
    pub fn get_resolvers(&self, contract: &ContractKey) -> Vec<Arc<dyn Resolver>> {
        self.contracts
            .get(contract)
            .map(|slot| {
                slot.entries
                    .iter()
                    .map(|(_, resolver)| resolver.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of contracts with at least one registration.
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    // ── Resolution entry points ──

    /// Resolves a contract: repository lookup, one-time build, resolve.
    pub fn resolve(&self, contract: &ContractKey) -> Result<Instance> {
        self.resolve_keyed(contract, None)
    }

    /// Resolves a contract under a dependency qualifier.
    pub fn resolve_keyed(
        &self,
        contract: &ContractKey,
        qualifier: Option<Qualifier>,
    ) -> Result<Instance> {
        trace!(contract = %contract, ?qualifier, "resolving");
        let resolver = self.get_resolver(contract, qualifier)?;
        resolver.build(self)?;
        resolver.resolve()
    }

    /// Resolves a collection-shaped request. The built collection resolver
    /// is cached per distinct request so the strategy is chosen once.
    pub fn resolve_sequence(&self, request: SequenceRequest) -> Result<Instance> {
        let resolver = self
            .sequences
            .entry(request.clone())
            .or_insert_with(|| Arc::new(EnumerableResolver::new(request)))
            .clone();
        resolver.build(self)?;
        resolver.resolve()
    }

    // ── Typed convenience ──

    /// Resolves a contract and downcasts to the expected concrete type.
    pub fn resolve_as<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.resolve_keyed_as::<T>(None)
    }

    /// Qualified variant of [`ResolverRepository::resolve_as`].
    pub fn resolve_keyed_as<T: Send + Sync + 'static>(
        &self,
        qualifier: Option<Qualifier>,
    ) -> Result<Arc<T>> {
        let key = ContractKey::of::<T>();
        let instance = self.resolve_keyed(&key, qualifier)?;
        instance
            .downcast::<T>()
            .map_err(|_| ResolveError::TypeMismatch {
                key,
                expected: type_name::<T>(),
            })
    }
}

impl std::fmt::Debug for ResolverRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRepository")
            .field("contracts", &self.contracts.len())
            .finish()
    }
}
