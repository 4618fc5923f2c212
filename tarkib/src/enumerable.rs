//! Collection-shaped resolution.
//!
//! An [`EnumerableResolver`] aggregates every resolver registered for an
//! element contract into one collection result. The production strategy is
//! fixed once at build time from the element lifetimes:
//!
//! 1. all `Global`: the element array is computed once and the same shared
//!    collection is returned on every resolve;
//! 2. all `Local`: every element is re-resolved on every call;
//! 3. mixed: `Global` entries are precomputed constants, only the `Local`
//!    subset does work per call.
//!
//! Element order always matches registration order, which is also why
//! unordered container shapes are rejected.

use std::collections::VecDeque;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, instrument};

use crate::error::{ConstructionError, ResolveError, Result};
use crate::key::ContractKey;
use crate::lifetime::Lifetime;
use crate::repository::ResolverRepository;
use crate::resolver::{Instance, Resolver};

/// Container shape requested for a collection resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SequenceShape {
    /// Raw element sequence. When every element is `Global`, resolves to
    /// one shared array; otherwise a fresh array per call. The payload
    /// downcasts to `Vec<Instance>`.
    Sequence,
    /// A materialized list container, freshly allocated on every resolve
    /// even when all elements are constants. Downcasts to `Vec<Instance>`.
    List,
    /// A materialized queue container. Downcasts to `VecDeque<Instance>`.
    Queue,
    /// Unordered set. Not supported: sets cannot preserve registration
    /// order, so requesting one fails with `UnsupportedContainer`.
    Set,
}

/// A collection-shaped request: element contract plus container shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequenceRequest {
    pub element: ContractKey,
    pub shape: SequenceShape,
}

impl SequenceRequest {
    /// Request for element type `T` in the given shape.
    pub fn of<T: ?Sized + 'static>(shape: SequenceShape) -> Self {
        Self {
            element: ContractKey::of::<T>(),
            shape,
        }
    }
}

enum ElementSlot {
    /// `Global` element, computed at build time.
    Constant(Instance),
    /// `Local` element, re-resolved per call.
    Deferred(Arc<dyn Resolver>),
}

enum SeqPlan {
    /// All elements `Global` and the raw sequence shape was requested: one
    /// shared collection for every resolve.
    Shared(Instance),
    /// Element slots evaluated and materialized into a container per call.
    Slots(Vec<ElementSlot>),
}

/// Builder producing collection results for an element contract.
pub struct EnumerableResolver {
    request: SequenceRequest,
    plan: OnceCell<SeqPlan>,
}

impl EnumerableResolver {
    /// Creates a resolver for the given collection request.
    pub fn new(request: SequenceRequest) -> Self {
        Self {
            request,
            plan: OnceCell::new(),
        }
    }

    #[instrument(level = "debug", skip_all, fields(element = %self.request.element, shape = ?self.request.shape))]
    fn compile(&self, repository: &ResolverRepository) -> Result<SeqPlan> {
        if self.request.shape == SequenceShape::Set {
            return Err(ResolveError::UnsupportedContainer {
                shape: self.request.shape,
                element: self.request.element.clone(),
            });
        }

        // Zero registrations compile to an empty slot list: enumerable
        // resolution of an unknown element yields an empty collection.
        let resolvers = repository.get_resolvers(&self.request.element);
        for resolver in &resolvers {
            resolver.build(repository)?;
        }

        let all_global = !resolvers.is_empty()
            && resolvers.iter().all(|r| r.lifetime() == Lifetime::Global);

        if all_global && self.request.shape == SequenceShape::Sequence {
            let mut elements = Vec::with_capacity(resolvers.len());
            for resolver in &resolvers {
                elements.push(resolver.resolve()?);
            }
            debug!(element = %self.request.element, count = elements.len(), "compiled shared sequence");
            return Ok(SeqPlan::Shared(Arc::new(elements)));
        }

        let mut slots = Vec::with_capacity(resolvers.len());
        for resolver in resolvers {
            let slot = match resolver.lifetime() {
                Lifetime::Global => ElementSlot::Constant(resolver.resolve()?),
                Lifetime::Local => ElementSlot::Deferred(resolver),
            };
            slots.push(slot);
        }
        debug!(element = %self.request.element, count = slots.len(), "compiled per-call sequence");
        Ok(SeqPlan::Slots(slots))
    }

    fn materialize(&self, elements: Vec<Instance>) -> Result<Instance> {
        match self.request.shape {
            SequenceShape::Sequence | SequenceShape::List => Ok(Arc::new(elements)),
            SequenceShape::Queue => Ok(Arc::new(VecDeque::from(elements))),
            SequenceShape::Set => Err(ResolveError::UnsupportedContainer {
                shape: self.request.shape,
                element: self.request.element.clone(),
            }),
        }
    }
}

impl Resolver for EnumerableResolver {
    fn lifetime(&self) -> Lifetime {
        Lifetime::Local
    }

    fn build(&self, repository: &ResolverRepository) -> Result<()> {
        self.plan.get_or_try_init(|| self.compile(repository))?;
        Ok(())
    }

    fn resolve(&self) -> Result<Instance> {
        let plan = self
            .plan
            .get()
            .ok_or_else(|| ConstructionError::NotBuilt(self.request.element.clone()))?;

        match plan {
            SeqPlan::Shared(collection) => Ok(collection.clone()),
            SeqPlan::Slots(slots) => {
                let mut elements = Vec::with_capacity(slots.len());
                for slot in slots {
                    elements.push(match slot {
                        ElementSlot::Constant(instance) => instance.clone(),
                        ElementSlot::Deferred(resolver) => resolver.resolve()?,
                    });
                }
                self.materialize(elements)
            }
        }
    }
}
