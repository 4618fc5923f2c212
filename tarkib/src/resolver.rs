//! The resolver capability and its leaf implementations.
//!
//! A [`Resolver`] produces instances of one contract and reports their
//! [`Lifetime`]. Building is separated from resolving: `build` compiles or
//! precomputes whatever the resolver needs exactly once, `resolve` must then
//! be cheap, repeatable and safe to call concurrently.
//!
//! Leaf resolvers live here:
//! - [`InstanceFactory`] wraps a caller-supplied zero-argument producer.
//! - [`DecoratingFactory`] wraps a producer that receives an optional
//!   continuation, for decorator registrations.

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::Result;
use crate::lifetime::Lifetime;
use crate::repository::ResolverRepository;

/// A resolved object. `Arc` carries the identity semantics that `Global`
/// lifetimes require: two resolves of the same singleton hand out the same
/// allocation.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Continuation handed to decorating resolvers: "resolve the previous
/// stage". A stage may invoke it zero or more times.
pub type Next<'a> = dyn Fn() -> Result<Instance> + 'a;

/// Zero-argument instance producer supplied at registration time.
pub type ProducerFn = Arc<dyn Fn() -> Instance + Send + Sync>;

/// Producer that may wrap the previous decoration stage.
pub type DecorateFn = Arc<dyn Fn(Option<&Next>) -> Result<Instance> + Send + Sync>;

/// Wraps a value into an [`Instance`].
#[inline]
pub fn instance_of<T: Send + Sync + 'static>(value: T) -> Instance {
    Arc::new(value)
}

/// Capability to produce instances of one contract.
pub trait Resolver: Send + Sync {
    /// Lifetime of the instances this resolver produces.
    fn lifetime(&self) -> Lifetime;

    /// One-time build step. Idempotent: concurrent first calls perform the
    /// underlying work at most once; later calls are no-ops.
    fn build(&self, repository: &ResolverRepository) -> Result<()>;

    /// Produces an instance. Must only be called after [`Resolver::build`].
    fn resolve(&self) -> Result<Instance>;

    /// Produces an instance, optionally wrapping the previous decoration
    /// stage. The default ignores the continuation entirely, which gives
    /// non-decorating resolvers full-override semantics inside a chain.
    fn resolve_next(&self, next: Option<&Next>) -> Result<Instance> {
        let _ = next;
        self.resolve()
    }
}

// ============================================================
// InstanceFactory
// ============================================================

/// Leaf resolver wrapping a zero-argument producer plus a lifetime tag.
///
/// Used for manual registrations, factory-lambda registrations and
/// pre-built instances. Build is a no-op. A `Global` factory computes its
/// value at most once, even under concurrent first resolves.
pub struct InstanceFactory {
    producer: ProducerFn,
    lifetime: Lifetime,
    shared: OnceCell<Instance>,
}

impl InstanceFactory {
    /// Creates a factory from a producer closure.
    pub fn new(lifetime: Lifetime, producer: impl Fn() -> Instance + Send + Sync + 'static) -> Self {
        Self {
            producer: Arc::new(producer),
            lifetime,
            shared: OnceCell::new(),
        }
    }

    /// Creates a `Global` factory around an already-built instance.
    pub fn from_instance(instance: Instance) -> Self {
        let seed = instance.clone();
        Self {
            producer: Arc::new(move || seed.clone()),
            lifetime: Lifetime::Global,
            shared: OnceCell::with_value(instance),
        }
    }
}

impl Resolver for InstanceFactory {
    fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    fn build(&self, _repository: &ResolverRepository) -> Result<()> {
        Ok(())
    }

    fn resolve(&self) -> Result<Instance> {
        match self.lifetime {
            Lifetime::Global => Ok(self.shared.get_or_init(|| (self.producer)()).clone()),
            Lifetime::Local => Ok((self.producer)()),
        }
    }
}

// ============================================================
// DecoratingFactory
// ============================================================

/// Leaf resolver for decorator registrations.
///
/// The closure receives the continuation for the previous stage when the
/// resolver participates in a chain, and `None` when resolved directly.
/// Always `Local`: a decorated value depends on what the continuation
/// returns, so it is never safe to constant-fold.
pub struct DecoratingFactory {
    decorate: DecorateFn,
}

impl DecoratingFactory {
    /// Creates a decorating factory from a continuation-accepting closure.
    pub fn new(
        decorate: impl Fn(Option<&Next>) -> Result<Instance> + Send + Sync + 'static,
    ) -> Self {
        Self {
            decorate: Arc::new(decorate),
        }
    }
}

impl Resolver for DecoratingFactory {
    fn lifetime(&self) -> Lifetime {
        Lifetime::Local
    }

    fn build(&self, _repository: &ResolverRepository) -> Result<()> {
        Ok(())
    }

    fn resolve(&self) -> Result<Instance> {
        (self.decorate)(None)
    }

    fn resolve_next(&self, next: Option<&Next>) -> Result<Instance> {
        (self.decorate)(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn local_factory_produces_fresh_instances() {
        let repo = ResolverRepository::new();
        let factory = InstanceFactory::new(Lifetime::Local, || instance_of(0u8));
        factory.build(&repo).unwrap();

        let a = factory.resolve().unwrap();
        let b = factory.resolve().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn global_factory_produces_one_instance() {
        let repo = ResolverRepository::new();
        let calls = Arc::new(AtomicU32::new(0));
        let factory = InstanceFactory::new(Lifetime::Global, {
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                instance_of(0u8)
            }
        });
        factory.build(&repo).unwrap();

        let a = factory.resolve().unwrap();
        let b = factory.resolve().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn global_factory_concurrent_first_resolve_is_single() {
        let calls = Arc::new(AtomicU32::new(0));
        let factory = Arc::new(InstanceFactory::new(Lifetime::Global, {
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                instance_of(String::from("singleton"))
            }
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = factory.clone();
                std::thread::spawn(move || factory.resolve().unwrap())
            })
            .collect();

        let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for instance in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], instance));
        }
    }

    #[test]
    fn prebuilt_instance_keeps_identity() {
        let value = instance_of(String::from("prebuilt"));
        let factory = InstanceFactory::from_instance(value.clone());

        let resolved = factory.resolve().unwrap();
        assert!(Arc::ptr_eq(&value, &resolved));
        assert_eq!(factory.lifetime(), Lifetime::Global);
    }

    #[test]
    fn decorating_factory_receives_continuation() {
        let factory = DecoratingFactory::new(|next| {
            let inner = match next {
                Some(next) => {
                    let instance = next()?;
                    let text = instance.downcast::<String>().unwrap();
                    format!("wrapped({text})")
                }
                None => String::from("bare"),
            };
            Ok(instance_of(inner))
        });

        let direct = factory.resolve().unwrap().downcast::<String>().unwrap();
        assert_eq!(&*direct, "bare");

        let chained = factory
            .resolve_next(Some(&|| Ok(instance_of(String::from("base")))))
            .unwrap()
            .downcast::<String>()
            .unwrap();
        assert_eq!(&*chained, "wrapped(base)");
    }
}
