//! Hierarchical per-unit-of-work instance caching.
//!
//! A [`Scope`] is a bounded caching context: opened when a unit of work
//! begins, closed explicitly when it ends. `get` is atomic get-or-create
//! per key; `get_transparent` walks the parent chain so nested scopes share
//! one instance rooted at the top. Closing detaches the scope from the
//! [`ScopeService`] active set and runs every registered finalizer exactly
//! once; a closed scope fails every further lookup.
//!
//! # Concurrency
//! The per-scope map sits behind a read-biased `RwLock`; cache hits only
//! take the read lock. A miss inserts an empty per-key slot under a brief
//! write lock and then initializes it through a `OnceCell` outside the map
//! lock, so the first caller's factory wins, concurrent callers for the
//! same key block on that slot only, and unrelated keys never serialize
//! against each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{Result, ScopeClosedError};
use crate::lifetime::Lifetime;
use crate::repository::ResolverRepository;
use crate::resolver::{Instance, Resolver};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SCOPE_KEY: AtomicU64 = AtomicU64::new(1);

/// Disposal hook run when the owning scope closes.
pub type Finalizer = Box<dyn FnOnce() + Send>;

/// Opaque per-dependency cache key. A scope-backed resolver allocates one
/// key and uses it against whichever scope is active; it never owns the
/// cached instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeKey(u64);

impl ScopeKey {
    /// Allocates a fresh, process-unique key.
    pub fn next() -> Self {
        Self(NEXT_SCOPE_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// Value handed back by a scope factory: the instance plus an optional
/// disposal hook.
pub struct ScopedEntry {
    instance: Instance,
    finalizer: Option<Finalizer>,
}

impl ScopedEntry {
    /// Entry without disposal requirements.
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            finalizer: None,
        }
    }

    /// Entry whose finalizer runs exactly once when the scope closes.
    pub fn with_finalizer(instance: Instance, finalizer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            instance,
            finalizer: Some(Box::new(finalizer)),
        }
    }
}

struct SlotValue {
    instance: Instance,
    finalizer: Mutex<Option<Finalizer>>,
}

struct Slot {
    cell: OnceCell<SlotValue>,
}

enum ScopeState {
    Open(HashMap<ScopeKey, Arc<Slot>>),
    Closed,
}

type ScopeFactory<'a> = Box<dyn FnOnce() -> Result<ScopedEntry> + 'a>;

struct ScopeInner {
    id: u64,
    parent: Option<Arc<ScopeInner>>,
    state: RwLock<ScopeState>,
    service: Weak<ServiceInner>,
}

impl ScopeInner {
    fn slot(&self, key: ScopeKey) -> Result<Arc<Slot>> {
        {
            let state = self.state.read();
            match &*state {
                ScopeState::Closed => {
                    return Err(ScopeClosedError { scope_id: self.id }.into());
                }
                ScopeState::Open(map) => {
                    if let Some(slot) = map.get(&key) {
                        return Ok(slot.clone());
                    }
                }
            }
        }

        let mut state = self.state.write();
        match &mut *state {
            ScopeState::Closed => Err(ScopeClosedError { scope_id: self.id }.into()),
            ScopeState::Open(map) => Ok(map
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(Slot {
                        cell: OnceCell::new(),
                    })
                })
                .clone()),
        }
    }

    fn get(&self, key: ScopeKey, factory: impl FnOnce() -> Result<ScopedEntry>) -> Result<Instance> {
        let slot = self.slot(key)?;
        let value = slot.cell.get_or_try_init(|| -> Result<SlotValue> {
            trace!(scope = self.id, ?key, "materializing scoped instance");
            let entry = factory()?;
            Ok(SlotValue {
                instance: entry.instance,
                finalizer: Mutex::new(entry.finalizer),
            })
        })?;
        // A close that raced the factory drained the map without seeing
        // this slot. Dispose here and report the close; the finalizer
        // mutex keeps disposal at exactly once either way.
        if self.is_closed() {
            if let Some(finalizer) = value.finalizer.lock().take() {
                finalizer();
            }
            return Err(ScopeClosedError { scope_id: self.id }.into());
        }
        Ok(value.instance.clone())
    }

    // Transparent lookup: the instance materializes at the root and is
    // cached, finalizer-free, at every level walked, so repeat lookups in
    // this scope stay local. Only the creating level keeps the finalizer.
    fn get_transparent(&self, key: ScopeKey, factory: ScopeFactory<'_>) -> Result<Instance> {
        match &self.parent {
            None => self.get(key, factory),
            Some(parent) => {
                let parent = Arc::clone(parent);
                self.get(key, move || {
                    parent
                        .get_transparent(key, factory)
                        .map(ScopedEntry::new)
                })
            }
        }
    }

    fn close(&self) {
        let map = {
            let mut state = self.state.write();
            match std::mem::replace(&mut *state, ScopeState::Closed) {
                // Re-closing is a no-op; the first transition owns disposal.
                ScopeState::Closed => return,
                ScopeState::Open(map) => map,
            }
        };

        if let Some(service) = self.service.upgrade() {
            service.detach(self.id);
        }

        let mut disposed = 0usize;
        for slot in map.into_values() {
            if let Some(value) = slot.cell.get() {
                if let Some(finalizer) = value.finalizer.lock().take() {
                    finalizer();
                    disposed += 1;
                }
            }
        }
        debug!(scope = self.id, disposed, "scope closed");
    }

    fn is_closed(&self) -> bool {
        matches!(&*self.state.read(), ScopeState::Closed)
    }
}

/// Handle to one node of the scope tree.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Identifier of this scope, used in errors and logs.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Parent scope, if this scope was opened nested.
    pub fn parent(&self) -> Option<Scope> {
        self.inner.parent.clone().map(|inner| Scope { inner })
    }

    /// Returns `true` once [`Scope::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Atomic get-or-create for `key`.
    ///
    /// The first caller's factory wins; concurrent callers for the same key
    /// receive the identical instance and the factory never runs twice.
    ///
    /// # Errors
    /// [`crate::error::ScopeClosedError`] after [`Scope::close`]. This
    /// includes a close landing while the factory is still running: the
    /// freshly created entry is disposed immediately and the lookup fails,
    /// so a caller never receives an instance that close will not release.
    pub fn get(
        &self,
        key: ScopeKey,
        factory: impl FnOnce() -> Result<ScopedEntry>,
    ) -> Result<Instance> {
        self.inner.get(key, factory)
    }

    /// Get-or-create delegated through the parent chain so every scope in
    /// the hierarchy shares one instance per key.
    pub fn get_transparent(
        &self,
        key: ScopeKey,
        factory: impl FnOnce() -> Result<ScopedEntry>,
    ) -> Result<Instance> {
        self.inner.get_transparent(key, Box::new(factory))
    }

    /// Closes the scope: idempotent, detaches it from the service's active
    /// set and disposes every finalizer-carrying cached instance exactly
    /// once, in unspecified order.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================
// ScopeService
// ============================================================

thread_local! {
    // Ambient stack of scopes opened on this thread: (service address,
    // scope id, scope). Closed scopes are skipped and pruned lazily.
    static CURRENT: std::cell::RefCell<Vec<(usize, u64, Weak<ScopeInner>)>> =
        const { std::cell::RefCell::new(Vec::new()) };
}

#[derive(Default)]
struct ServiceInner {
    active: RwLock<HashMap<u64, Weak<ScopeInner>>>,
}

impl ServiceInner {
    fn detach(&self, id: u64) {
        self.active.write().remove(&id);
        CURRENT.with(|stack| {
            stack.borrow_mut().retain(|(_, scope_id, _)| *scope_id != id);
        });
    }
}

/// Tracks the tree of open scopes and the ambient current scope per thread.
///
/// Each unit of work opens a scope through the service and must close it;
/// the service holds only weak references and never owns cached instances.
#[derive(Clone, Default)]
pub struct ScopeService {
    inner: Arc<ServiceInner>,
}

impl ScopeService {
    /// Creates a service with no open scopes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a scope, optionally nested under `parent`, and makes it the
    /// current scope for the calling thread.
    pub fn open_scope(&self, parent: Option<&Scope>) -> Scope {
        let id = NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(ScopeInner {
            id,
            parent: parent.map(|p| p.inner.clone()),
            state: RwLock::new(ScopeState::Open(HashMap::new())),
            service: Arc::downgrade(&self.inner),
        });

        self.inner.active.write().insert(id, Arc::downgrade(&inner));
        CURRENT.with(|stack| {
            stack
                .borrow_mut()
                .push((Arc::as_ptr(&self.inner) as usize, id, Arc::downgrade(&inner)));
        });

        debug!(scope = id, parent = ?parent.map(Scope::id), "opened scope");
        Scope { inner }
    }

    /// The innermost open scope this thread opened through this service.
    pub fn current_scope(&self) -> Option<Scope> {
        let service_ptr = Arc::as_ptr(&self.inner) as usize;
        CURRENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.retain(|(_, _, weak)| {
                weak.upgrade().is_some_and(|inner| !inner.is_closed())
            });
            stack
                .iter()
                .rev()
                .find(|(ptr, _, _)| *ptr == service_ptr)
                .and_then(|(_, _, weak)| weak.upgrade())
                .map(|inner| Scope { inner })
        })
    }

    /// Number of scopes currently open.
    pub fn active_scopes(&self) -> usize {
        self.inner.active.read().len()
    }
}

// ============================================================
// ScopedResolver
// ============================================================

/// Resolver wrapper caching its inner result per active scope.
///
/// Reports `Local` so dependents never constant-fold the cached value into
/// their plans. Holds only the allocated [`ScopeKey`]; the instances belong
/// to the scope that created them. Without an active scope the inner
/// resolver runs fresh, like any other `Local` resolver.
pub struct ScopedResolver {
    inner: Arc<dyn Resolver>,
    key: ScopeKey,
    service: ScopeService,
    transparent: bool,
}

impl ScopedResolver {
    /// Caches per innermost active scope.
    pub fn new(inner: Arc<dyn Resolver>, service: ScopeService) -> Self {
        Self {
            inner,
            key: ScopeKey::next(),
            service,
            transparent: false,
        }
    }

    /// Caches transparently: nested scopes share the root instance.
    pub fn transparent(inner: Arc<dyn Resolver>, service: ScopeService) -> Self {
        Self {
            transparent: true,
            ..Self::new(inner, service)
        }
    }
}

impl Resolver for ScopedResolver {
    fn lifetime(&self) -> Lifetime {
        Lifetime::Local
    }

    fn build(&self, repository: &ResolverRepository) -> Result<()> {
        self.inner.build(repository)
    }

    fn resolve(&self) -> Result<Instance> {
        match self.service.current_scope() {
            Some(scope) => {
                let factory = || self.inner.resolve().map(ScopedEntry::new);
                if self.transparent {
                    scope.get_transparent(self.key, factory)
                } else {
                    scope.get(self.key, factory)
                }
            }
            None => self.inner.resolve(),
        }
    }
}
