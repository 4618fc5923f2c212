//! Decorator chain composition.
//!
//! When one contract carries several resolvers under the same qualifier,
//! they compose into a chain: the first-registered resolver is the
//! innermost ("base") stage, and every later stage receives a continuation
//! that resolves the previous one. A stage may invoke its continuation zero
//! or more times; ignoring it entirely gives full-override semantics.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{NotRegisteredError, ResolveError, Result};
use crate::key::{ContractKey, Qualifier};
use crate::lifetime::Lifetime;
use crate::repository::ResolverRepository;
use crate::resolver::{Instance, Resolver};

/// Composes the resolvers of one contract into a wrap chain.
///
/// The chain reports `Global` only when every stage is `Global`; the
/// composed value is then memoized once. Any `Local` stage makes the whole
/// chain `Local`.
pub struct DecoratorChainResolver {
    contract: ContractKey,
    qualifier: Option<Qualifier>,
    stages: Vec<Arc<dyn Resolver>>,
    lifetime: Lifetime,
    shared: OnceCell<Instance>,
}

impl DecoratorChainResolver {
    /// Creates a chain over `stages` in registration order. Chains compose
    /// per `(contract, qualifier)` group; the qualifier is carried for
    /// error reporting.
    pub fn new(
        contract: ContractKey,
        qualifier: Option<Qualifier>,
        stages: Vec<Arc<dyn Resolver>>,
    ) -> Self {
        let lifetime = if !stages.is_empty()
            && stages.iter().all(|stage| stage.lifetime().is_shared())
        {
            Lifetime::Global
        } else {
            Lifetime::Local
        };
        Self {
            contract,
            qualifier,
            stages,
            lifetime,
            shared: OnceCell::new(),
        }
    }

    fn empty_chain(&self) -> ResolveError {
        ResolveError::NotRegistered(NotRegisteredError {
            requested: self.contract.clone(),
            qualifier: self.qualifier,
        })
    }

    fn run(&self) -> Result<Instance> {
        // Closed forms for the common chain lengths; longer chains fold
        // from the last-registered stage down to the base.
        match self.stages.as_slice() {
            [] => Err(self.empty_chain()),
            [only] => only.resolve_next(None),
            [base, outer] => outer.resolve_next(Some(&|| base.resolve_next(None))),
            stages => fold(&self.contract, self.qualifier, stages),
        }
    }
}

fn fold(
    contract: &ContractKey,
    qualifier: Option<Qualifier>,
    stages: &[Arc<dyn Resolver>],
) -> Result<Instance> {
    match stages.split_last() {
        None => Err(ResolveError::NotRegistered(NotRegisteredError {
            requested: contract.clone(),
            qualifier,
        })),
        Some((outer, rest)) if rest.is_empty() => outer.resolve_next(None),
        Some((outer, rest)) => outer.resolve_next(Some(&|| fold(contract, qualifier, rest))),
    }
}

impl Resolver for DecoratorChainResolver {
    fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    fn build(&self, repository: &ResolverRepository) -> Result<()> {
        for stage in &self.stages {
            stage.build(repository)?;
        }
        Ok(())
    }

    fn resolve(&self) -> Result<Instance> {
        match self.lifetime {
            Lifetime::Global => self
                .shared
                .get_or_try_init(|| self.run())
                .map(|instance| instance.clone()),
            Lifetime::Local => self.run(),
        }
    }
}
