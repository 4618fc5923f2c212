//! Object builder: compiles a constructor-call plan for a concrete type.
//!
//! The builder is the "build once, invoke many" core of the engine. At
//! build time it picks the single constructor of its target, resolves every
//! parameter recursively and compiles a [`Plan`]: `Global` parameters are
//! baked in as constants, `Local` parameters keep a reference to their
//! resolver and are re-resolved per call. At resolve time the plan is
//! invoked directly; no metadata is inspected on that path.
//!
//! # Concurrency
//! Plan compilation and the `Global` singleton value are both memoized
//! through [`OnceCell`]: competing first builders block on the cell and
//! exactly one performs the work, so two distinct singletons can never be
//! constructed for the same resolver.

use std::cell::RefCell;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{instrument, trace};

use crate::error::{
    CircularDependencyError, ConstructionError, MissingDependencyError, ResolveError, Result,
};
use crate::key::{ContractKey, Qualifier};
use crate::lifetime::Lifetime;
use crate::repository::ResolverRepository;
use crate::resolver::{Instance, Resolver};

/// Instantiation closure supplied by the registration descriptor. Receives
/// the resolved parameters in declaration order.
pub type ConstructFn = Arc<dyn Fn(&[Instance]) -> Instance + Send + Sync>;

/// One constructor parameter: the contract to look up and the pre-extracted
/// dependency qualifier, if the parameter carried one.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub contract: ContractKey,
    pub qualifier: Option<Qualifier>,
}

impl ParamSpec {
    /// Parameter resolved by contract only.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            contract: ContractKey::of::<T>(),
            qualifier: None,
        }
    }

    /// Parameter resolved by contract plus qualifier.
    pub fn keyed<T: ?Sized + 'static>(qualifier: Qualifier) -> Self {
        Self {
            contract: ContractKey::of::<T>(),
            qualifier: Some(qualifier),
        }
    }
}

/// A single constructor: ordered parameters plus the instantiation closure.
#[derive(Clone)]
pub struct ConstructorSpec {
    pub params: Vec<ParamSpec>,
    pub construct: ConstructFn,
}

impl ConstructorSpec {
    /// Creates a constructor descriptor.
    pub fn new(
        params: Vec<ParamSpec>,
        construct: impl Fn(&[Instance]) -> Instance + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            construct: Arc::new(construct),
        }
    }
}

/// Shape of the registration target, as reported by the metadata layer.
///
/// `Abstract` targets (trait objects, abstract bases) fail the build with
/// [`ConstructionError::NotInstantiable`]; `Concrete` targets must expose
/// exactly one constructor.
pub enum TargetShape {
    Concrete(Vec<ConstructorSpec>),
    Abstract,
}

enum Slot {
    /// `Global` parameter, already computed at build time.
    Constant(Instance),
    /// `Local` parameter, re-resolved on every invocation.
    Deferred(Arc<dyn Resolver>),
}

struct Plan {
    slots: Vec<Slot>,
    construct: ConstructFn,
}

// Contracts currently being compiled on this thread. Build recursion that
// re-enters a contract means the constructor graph has a cycle.
thread_local! {
    static COMPILING: RefCell<Vec<ContractKey>> = const { RefCell::new(Vec::new()) };
}

struct CompileGuard;

impl CompileGuard {
    fn enter(key: &ContractKey) -> Result<Self> {
        COMPILING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(start) = stack.iter().position(|k| k == key) {
                let mut chain: Vec<ContractKey> = stack[start..].to_vec();
                chain.push(key.clone());
                return Err(ResolveError::CircularDependency(CircularDependencyError {
                    chain,
                }));
            }
            stack.push(key.clone());
            Ok(Self)
        })
    }
}

impl Drop for CompileGuard {
    fn drop(&mut self) {
        COMPILING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Resolver that builds instances of a concrete type from its constructor.
pub struct ObjectBuilder {
    target: ContractKey,
    shape: TargetShape,
    lifetime: Lifetime,
    plan: OnceCell<Plan>,
    shared: OnceCell<Instance>,
}

impl ObjectBuilder {
    /// Creates a builder for `target` with the given shape descriptor.
    pub fn new(target: ContractKey, lifetime: Lifetime, shape: TargetShape) -> Self {
        Self {
            target,
            shape,
            lifetime,
            plan: OnceCell::new(),
            shared: OnceCell::new(),
        }
    }

    /// Convenience for the common case: a concrete type with one constructor.
    pub fn concrete(target: ContractKey, lifetime: Lifetime, constructor: ConstructorSpec) -> Self {
        Self::new(target, lifetime, TargetShape::Concrete(vec![constructor]))
    }

    /// Returns the contract this builder produces.
    pub fn target(&self) -> &ContractKey {
        &self.target
    }

    #[instrument(level = "debug", skip_all, fields(contract = %self.target))]
    fn compile(&self, repository: &ResolverRepository) -> Result<Plan> {
        let constructor = match &self.shape {
            TargetShape::Abstract => {
                return Err(ConstructionError::NotInstantiable(self.target.clone()).into());
            }
            TargetShape::Concrete(constructors) => match constructors.as_slice() {
                [] => return Err(ConstructionError::NoConstructor(self.target.clone()).into()),
                [only] => only,
                many => {
                    return Err(ConstructionError::AmbiguousConstructor {
                        key: self.target.clone(),
                        count: many.len(),
                    }
                    .into());
                }
            },
        };

        let mut slots = Vec::with_capacity(constructor.params.len());
        for param in &constructor.params {
            let resolver = repository
                .get_resolver(&param.contract, param.qualifier)
                .map_err(|err| match err {
                    ResolveError::NotRegistered(_) => {
                        ResolveError::MissingDependency(MissingDependencyError {
                            target: self.target.clone(),
                            parameter: param.contract.clone(),
                            qualifier: param.qualifier,
                        })
                    }
                    other => other,
                })?;

            resolver.build(repository)?;

            // Global parameters fold to a constant; Local ones stay live.
            let slot = match resolver.lifetime() {
                Lifetime::Global => Slot::Constant(resolver.resolve()?),
                Lifetime::Local => Slot::Deferred(resolver),
            };
            slots.push(slot);
        }

        trace!(contract = %self.target, params = slots.len(), "compiled instantiation plan");
        Ok(Plan {
            slots,
            construct: constructor.construct.clone(),
        })
    }

    fn invoke(&self, plan: &Plan) -> Result<Instance> {
        let mut args = Vec::with_capacity(plan.slots.len());
        for slot in &plan.slots {
            args.push(match slot {
                Slot::Constant(instance) => instance.clone(),
                Slot::Deferred(resolver) => resolver.resolve()?,
            });
        }
        Ok((plan.construct)(&args))
    }
}

impl Resolver for ObjectBuilder {
    fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    fn build(&self, repository: &ResolverRepository) -> Result<()> {
        // The guard must run before touching the cell: a cyclic graph would
        // otherwise re-enter the in-flight initialization and deadlock.
        if self.plan.get().is_none() {
            let _guard = CompileGuard::enter(&self.target)?;
            self.plan.get_or_try_init(|| self.compile(repository))?;
        }
        if self.lifetime.is_shared() {
            if let Some(plan) = self.plan.get() {
                self.shared.get_or_try_init(|| self.invoke(plan))?;
            }
        }
        Ok(())
    }

    fn resolve(&self) -> Result<Instance> {
        let plan = self
            .plan
            .get()
            .ok_or_else(|| ConstructionError::NotBuilt(self.target.clone()))?;
        match self.lifetime {
            Lifetime::Global => self
                .shared
                .get_or_try_init(|| self.invoke(plan))
                .map(|instance| instance.clone()),
            Lifetime::Local => self.invoke(plan),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{InstanceFactory, instance_of};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Engine {
        label: &'static str,
    }

    struct Car {
        engine: Arc<Engine>,
    }

    fn car_constructor() -> ConstructorSpec {
        ConstructorSpec::new(vec![ParamSpec::of::<Engine>()], |args| {
            let engine = args[0].clone().downcast::<Engine>().unwrap();
            instance_of(Car { engine })
        })
    }

    fn register_engine(repo: &ResolverRepository, lifetime: Lifetime) {
        repo.register(
            ContractKey::of::<Engine>(),
            None,
            Arc::new(InstanceFactory::new(lifetime, || {
                instance_of(Engine { label: "v8" })
            })),
        );
    }

    #[test]
    fn builds_with_registered_dependency() {
        let repo = ResolverRepository::new();
        register_engine(&repo, Lifetime::Global);

        let builder = ObjectBuilder::concrete(
            ContractKey::of::<Car>(),
            Lifetime::Local,
            car_constructor(),
        );
        builder.build(&repo).unwrap();

        let car = builder.resolve().unwrap().downcast::<Car>().unwrap();
        assert_eq!(car.engine.label, "v8");
    }

    #[test]
    fn local_lifetime_builds_fresh_instances() {
        let repo = ResolverRepository::new();
        register_engine(&repo, Lifetime::Global);

        let builder = ObjectBuilder::concrete(
            ContractKey::of::<Car>(),
            Lifetime::Local,
            car_constructor(),
        );
        builder.build(&repo).unwrap();

        let a = builder.resolve().unwrap();
        let b = builder.resolve().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn global_lifetime_reuses_one_instance() {
        let repo = ResolverRepository::new();
        register_engine(&repo, Lifetime::Global);

        let builder = ObjectBuilder::concrete(
            ContractKey::of::<Car>(),
            Lifetime::Global,
            car_constructor(),
        );
        builder.build(&repo).unwrap();

        let a = builder.resolve().unwrap();
        let b = builder.resolve().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn global_parameter_is_constant_folded() {
        let repo = ResolverRepository::new();
        let engine_builds = Arc::new(AtomicU32::new(0));
        repo.register(
            ContractKey::of::<Engine>(),
            None,
            Arc::new(InstanceFactory::new(Lifetime::Global, {
                let engine_builds = engine_builds.clone();
                move || {
                    engine_builds.fetch_add(1, Ordering::SeqCst);
                    instance_of(Engine { label: "folded" })
                }
            })),
        );

        let builder = ObjectBuilder::concrete(
            ContractKey::of::<Car>(),
            Lifetime::Local,
            car_constructor(),
        );
        builder.build(&repo).unwrap();

        let a = builder.resolve().unwrap().downcast::<Car>().unwrap();
        let b = builder.resolve().unwrap().downcast::<Car>().unwrap();
        assert!(Arc::ptr_eq(&a.engine, &b.engine));
        assert_eq!(engine_builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn local_parameter_is_resolved_per_call() {
        let repo = ResolverRepository::new();
        register_engine(&repo, Lifetime::Local);

        let builder = ObjectBuilder::concrete(
            ContractKey::of::<Car>(),
            Lifetime::Local,
            car_constructor(),
        );
        builder.build(&repo).unwrap();

        let a = builder.resolve().unwrap().downcast::<Car>().unwrap();
        let b = builder.resolve().unwrap().downcast::<Car>().unwrap();
        assert!(!Arc::ptr_eq(&a.engine, &b.engine));
    }

    #[test]
    fn zero_constructors_fail_at_build() {
        let repo = ResolverRepository::new();
        let builder = ObjectBuilder::new(
            ContractKey::of::<Car>(),
            Lifetime::Local,
            TargetShape::Concrete(vec![]),
        );

        match builder.build(&repo).unwrap_err() {
            ResolveError::Construction(ConstructionError::NoConstructor(key)) => {
                assert_eq!(key, ContractKey::of::<Car>());
            }
            other => panic!("expected NoConstructor, got: {other:?}"),
        }
    }

    #[test]
    fn multiple_constructors_fail_at_build() {
        let repo = ResolverRepository::new();
        register_engine(&repo, Lifetime::Global);
        let builder = ObjectBuilder::new(
            ContractKey::of::<Car>(),
            Lifetime::Local,
            TargetShape::Concrete(vec![car_constructor(), car_constructor()]),
        );

        match builder.build(&repo).unwrap_err() {
            ResolveError::Construction(ConstructionError::AmbiguousConstructor { count, .. }) => {
                assert_eq!(count, 2);
            }
            other => panic!("expected AmbiguousConstructor, got: {other:?}"),
        }
    }

    #[test]
    fn abstract_target_fails_at_build() {
        let repo = ResolverRepository::new();
        trait Abstract {}
        let builder = ObjectBuilder::new(
            ContractKey::of::<dyn Abstract>(),
            Lifetime::Local,
            TargetShape::Abstract,
        );

        match builder.build(&repo).unwrap_err() {
            ResolveError::Construction(ConstructionError::NotInstantiable(_)) => {}
            other => panic!("expected NotInstantiable, got: {other:?}"),
        }
    }

    #[test]
    fn missing_parameter_fails_at_build() {
        let repo = ResolverRepository::new();
        let builder = ObjectBuilder::concrete(
            ContractKey::of::<Car>(),
            Lifetime::Local,
            car_constructor(),
        );

        match builder.build(&repo).unwrap_err() {
            ResolveError::MissingDependency(err) => {
                assert_eq!(err.target, ContractKey::of::<Car>());
                assert_eq!(err.parameter, ContractKey::of::<Engine>());
            }
            other => panic!("expected MissingDependency, got: {other:?}"),
        }
    }

    #[test]
    fn resolve_before_build_fails_typed() {
        let builder = ObjectBuilder::concrete(
            ContractKey::of::<Car>(),
            Lifetime::Local,
            car_constructor(),
        );
        match builder.resolve().unwrap_err() {
            ResolveError::Construction(ConstructionError::NotBuilt(_)) => {}
            other => panic!("expected NotBuilt, got: {other:?}"),
        }
    }

    #[test]
    fn concurrent_build_yields_exactly_one_singleton() {
        let repo = Arc::new(ResolverRepository::new());
        let constructions = Arc::new(AtomicU32::new(0));

        let constructor = ConstructorSpec::new(vec![], {
            let constructions = constructions.clone();
            move |_args| {
                constructions.fetch_add(1, Ordering::SeqCst);
                instance_of(Engine { label: "shared" })
            }
        });
        let builder: Arc<ObjectBuilder> = Arc::new(ObjectBuilder::concrete(
            ContractKey::of::<Engine>(),
            Lifetime::Global,
            constructor,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                let builder = builder.clone();
                std::thread::spawn(move || {
                    builder.build(&repo).unwrap();
                    builder.resolve().unwrap()
                })
            })
            .collect();

        let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        for instance in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], instance));
        }
    }

    #[test]
    fn cyclic_graph_fails_with_chain() {
        struct Hen;
        struct Egg;

        let repo = ResolverRepository::new();
        repo.register(
            ContractKey::of::<Hen>(),
            None,
            Arc::new(ObjectBuilder::concrete(
                ContractKey::of::<Hen>(),
                Lifetime::Local,
                ConstructorSpec::new(vec![ParamSpec::of::<Egg>()], |_| instance_of(Hen)),
            )),
        );
        repo.register(
            ContractKey::of::<Egg>(),
            None,
            Arc::new(ObjectBuilder::concrete(
                ContractKey::of::<Egg>(),
                Lifetime::Local,
                ConstructorSpec::new(vec![ParamSpec::of::<Hen>()], |_| instance_of(Egg)),
            )),
        );

        match repo.resolve(&ContractKey::of::<Hen>()).unwrap_err() {
            ResolveError::CircularDependency(err) => {
                assert!(err.chain.len() >= 3);
                assert_eq!(err.chain.first(), err.chain.last());
            }
            other => panic!("expected CircularDependency, got: {other:?}"),
        }
    }
}
