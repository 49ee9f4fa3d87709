//! Fine-grained reactive signal system
//!
//! A push-pull hybrid in the style of Leptos/SolidJS signals:
//! - Signals push invalidation notifications to subscribers
//! - Derived values pull (lazily compute) their values when accessed
//! - Effects are queued and flushed synchronously, after the write that
//!   dirtied them (or at the end of the enclosing batch)
//!
//! # Owners
//!
//! Every effect and scope has an *owner*. Cleanups registered with
//! [`ReactiveGraph::on_cleanup`] while an effect runs are invoked before that
//! effect runs again and when it is disposed; effects, scopes and signals
//! created inside an owner are disposed together with it. This gives each
//! mounted component a construct/teardown pair with teardown guaranteed to
//! run before the next construct and on scope exit.
//!
//! ```ignore
//! use orrery_core::reactive::ReactiveGraph;
//!
//! let graph = ReactiveGraph::new();
//! let scope = graph.create_scope();
//! let count = scope.create_signal(0i32);
//!
//! scope.create_effect(move |g| {
//!     let value = g.get(count).unwrap_or(0);
//!     g.on_cleanup(move || println!("leaving {value}"));
//! });
//!
//! graph.set(count, 1); // prints "leaving 0"
//! scope.dispose();     // prints "leaving 1"
//! ```

use crate::error::{CoreError, Result};
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;

/// Upper bound on effect runs in a single flush before the queue is dropped
const MAX_EFFECT_RUNS_PER_FLUSH: usize = 100_000;

new_key_type! {
    /// Unique identifier for a signal
    pub struct SignalId;
    /// Unique identifier for a derived/computed value
    pub struct DerivedId;
    /// Unique identifier for an effect
    pub struct EffectId;
    /// Unique identifier for an owner scope
    pub struct ScopeId;
}

/// Nodes that can be read (and therefore tracked)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SourceId {
    Signal(SignalId),
    Derived(DerivedId),
}

/// Subscriber types that can react to signal changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberId {
    Derived(DerivedId),
    Effect(EffectId),
}

/// Nodes that can own other nodes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    Scope(ScopeId),
    Effect(EffectId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Owned {
    Signal(SignalId),
    Derived(DerivedId),
    Effect(EffectId),
    Scope(ScopeId),
}

type Cleanup = Box<dyn FnOnce()>;
type ComputeFn = Rc<dyn Fn(&ReactiveGraph) -> Box<dyn Any>>;

/// A reactive signal handle (cheap to copy)
#[derive(Debug)]
pub struct Signal<T> {
    id: SignalId,
    _marker: PhantomData<T>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Signal<T> {}

impl<T> Signal<T> {
    /// Get the signal's internal ID
    pub fn id(&self) -> SignalId {
        self.id
    }
}

/// A derived/computed value handle
#[derive(Debug)]
pub struct Derived<T> {
    id: DerivedId,
    _marker: PhantomData<T>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Derived<T> {}

impl<T> Derived<T> {
    pub fn id(&self) -> DerivedId {
        self.id
    }
}

/// An effect handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    id: EffectId,
}

impl Effect {
    pub fn id(&self) -> EffectId {
        self.id
    }
}

struct SignalNode {
    value: Box<dyn Any>,
    version: u64,
    subscribers: SmallVec<[SubscriberId; 4]>,
}

struct DerivedNode {
    value: Option<Box<dyn Any>>,
    compute: ComputeFn,
    dependencies: SmallVec<[SourceId; 4]>,
    subscribers: SmallVec<[SubscriberId; 4]>,
    dirty: bool,
}

struct EffectNode {
    /// Taken out while the effect runs
    run: Option<Box<dyn FnMut(&ReactiveGraph)>>,
    dependencies: SmallVec<[SourceId; 4]>,
    dirty: bool,
    owner: Option<Owner>,
    owned: Vec<Owned>,
    cleanups: Vec<Cleanup>,
}

struct ScopeNode {
    owner: Option<Owner>,
    owned: Vec<Owned>,
    cleanups: Vec<Cleanup>,
    contexts: FxHashMap<TypeId, Rc<dyn Any>>,
}

struct GraphInner {
    signals: RefCell<SlotMap<SignalId, SignalNode>>,
    derived: RefCell<SlotMap<DerivedId, DerivedNode>>,
    effects: RefCell<SlotMap<EffectId, EffectNode>>,
    scopes: RefCell<SlotMap<ScopeId, ScopeNode>>,
    pending_effects: RefCell<VecDeque<EffectId>>,
    /// Current batch depth (> 0 means we're in a batch)
    batch_depth: Cell<u32>,
    flushing: Cell<bool>,
    /// One frame per running effect/derived; `None` frames are untracked
    tracking: RefCell<Vec<Option<SmallVec<[SourceId; 4]>>>>,
    owner: Cell<Option<Owner>>,
    global_version: Cell<u64>,
}

/// The reactive graph that manages all signals, derived values, effects and scopes
///
/// Cloning the graph clones a handle; all clones share the same nodes.
#[derive(Clone)]
pub struct ReactiveGraph {
    inner: Rc<GraphInner>,
}

/// Restores the running owner and pops the tracking frame, even on unwind
struct RunGuard<'a> {
    graph: &'a ReactiveGraph,
    prev_owner: Option<Owner>,
    popped: bool,
}

impl<'a> RunGuard<'a> {
    fn enter(graph: &'a ReactiveGraph, owner: Option<Owner>, tracked: bool) -> Self {
        graph
            .inner
            .tracking
            .borrow_mut()
            .push(tracked.then(SmallVec::new));
        let prev_owner = graph.inner.owner.replace(owner);
        Self {
            graph,
            prev_owner,
            popped: false,
        }
    }

    fn finish(mut self) -> SmallVec<[SourceId; 4]> {
        self.popped = true;
        self.graph.inner.owner.set(self.prev_owner);
        self.graph
            .inner
            .tracking
            .borrow_mut()
            .pop()
            .flatten()
            .unwrap_or_default()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.popped {
            self.graph.inner.owner.set(self.prev_owner);
            self.graph.inner.tracking.borrow_mut().pop();
        }
    }
}

/// Resets the flushing flag, even on unwind
struct FlushGuard<'a>(&'a Cell<bool>);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl ReactiveGraph {
    /// Create a new reactive graph
    pub fn new() -> Self {
        Self {
            inner: Rc::new(GraphInner {
                signals: RefCell::new(SlotMap::with_key()),
                derived: RefCell::new(SlotMap::with_key()),
                effects: RefCell::new(SlotMap::with_key()),
                scopes: RefCell::new(SlotMap::with_key()),
                pending_effects: RefCell::new(VecDeque::new()),
                batch_depth: Cell::new(0),
                flushing: Cell::new(false),
                tracking: RefCell::new(Vec::new()),
                owner: Cell::new(None),
                global_version: Cell::new(0),
            }),
        }
    }

    /// Whether two handles refer to the same graph
    pub fn ptr_eq(&self, other: &ReactiveGraph) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // SIGNALS
    // =========================================================================

    /// Create a new signal with an initial value, owned by the current owner
    pub fn create_signal<T: 'static>(&self, initial: T) -> Signal<T> {
        let id = self.inner.signals.borrow_mut().insert(SignalNode {
            value: Box::new(initial),
            version: 0,
            subscribers: SmallVec::new(),
        });
        self.adopt(Owned::Signal(id));
        Signal {
            id,
            _marker: PhantomData,
        }
    }

    /// Get the current value of a signal
    ///
    /// If called within a tracking context (effect or derived), this signal
    /// will be recorded as a dependency.
    pub fn get<T: Clone + 'static>(&self, signal: Signal<T>) -> Option<T> {
        self.track(SourceId::Signal(signal.id));
        self.get_untracked(signal)
    }

    /// Get the current value without tracking as a dependency
    pub fn get_untracked<T: Clone + 'static>(&self, signal: Signal<T>) -> Option<T> {
        self.inner
            .signals
            .borrow()
            .get(signal.id)
            .and_then(|node| node.value.downcast_ref::<T>().cloned())
    }

    /// Set the value of a signal, triggering reactive updates
    ///
    /// Writing a disposed signal is a no-op.
    pub fn set<T: 'static>(&self, signal: Signal<T>, value: T) {
        let (previous, subscribers) = {
            let mut signals = self.inner.signals.borrow_mut();
            let Some(node) = signals.get_mut(signal.id) else {
                return;
            };
            let previous = std::mem::replace(&mut node.value, Box::new(value));
            node.version += 1;
            (previous, node.subscribers.clone())
        };
        // The old value may own handles whose drop glue touches the graph
        drop(previous);
        self.inner
            .global_version
            .set(self.inner.global_version.get() + 1);

        for sub in subscribers {
            self.mark_dirty(sub);
        }

        if self.inner.batch_depth.get() == 0 {
            self.flush_effects();
        }
    }

    /// Set a signal only when the new value differs from the current one
    ///
    /// Returns whether the value was written.
    pub fn set_if_changed<T: PartialEq + 'static>(&self, signal: Signal<T>, value: T) -> bool {
        let unchanged = self
            .inner
            .signals
            .borrow()
            .get(signal.id)
            .and_then(|node| node.value.downcast_ref::<T>())
            .is_some_and(|current| *current == value);
        if unchanged {
            return false;
        }
        self.set(signal, value);
        true
    }

    /// Update a signal using a function
    pub fn update<T: Clone + 'static, F: FnOnce(T) -> T>(&self, signal: Signal<T>, f: F) {
        if let Some(current) = self.get_untracked(signal) {
            self.set(signal, f(current));
        }
    }

    /// Get the version of a signal (for change detection)
    pub fn signal_version(&self, id: SignalId) -> Option<u64> {
        self.inner.signals.borrow().get(id).map(|n| n.version)
    }

    /// Dispose a signal explicitly (signals without an owner live until then)
    pub fn dispose_signal(&self, id: SignalId) {
        let node = self.inner.signals.borrow_mut().remove(id);
        drop(node);
    }

    /// Whether the signal still exists
    pub fn signal_alive(&self, id: SignalId) -> bool {
        self.inner.signals.borrow().contains_key(id)
    }

    // =========================================================================
    // DERIVED VALUES
    // =========================================================================

    /// Create a derived (computed) value
    pub fn create_derived<T, F>(&self, compute: F) -> Derived<T>
    where
        T: Clone + 'static,
        F: Fn(&ReactiveGraph) -> T + 'static,
    {
        let compute: ComputeFn =
            Rc::new(move |graph: &ReactiveGraph| -> Box<dyn Any> { Box::new(compute(graph)) });

        let id = self.inner.derived.borrow_mut().insert(DerivedNode {
            value: None,
            compute,
            dependencies: SmallVec::new(),
            subscribers: SmallVec::new(),
            dirty: true,
        });
        self.adopt(Owned::Derived(id));

        Derived {
            id,
            _marker: PhantomData,
        }
    }

    /// Get the value of a derived, computing if necessary
    pub fn get_derived<T: Clone + 'static>(&self, derived: Derived<T>) -> Option<T> {
        self.track(SourceId::Derived(derived.id));

        let compute = {
            let nodes = self.inner.derived.borrow();
            let node = nodes.get(derived.id)?;
            if !node.dirty {
                if let Some(ref cached) = node.value {
                    return cached.downcast_ref::<T>().cloned();
                }
            }
            Rc::clone(&node.compute)
        };

        let guard = RunGuard::enter(self, None, true);
        let value = compute(self);
        let deps = guard.finish();

        let (result, previous_deps) = {
            let mut nodes = self.inner.derived.borrow_mut();
            let node = nodes.get_mut(derived.id)?;
            node.dirty = false;
            let result = value.downcast_ref::<T>().cloned();
            node.value = Some(value);
            let previous = std::mem::replace(&mut node.dependencies, deps.clone());
            (result, previous)
        };
        self.resubscribe(SubscriberId::Derived(derived.id), &previous_deps, &deps);
        result
    }

    // =========================================================================
    // EFFECTS
    // =========================================================================

    /// Create an effect that runs when its dependencies change
    ///
    /// The effect runs once immediately (or at the end of the current batch
    /// or flush) and is owned by the current owner.
    pub fn create_effect<F>(&self, run: F) -> Effect
    where
        F: FnMut(&ReactiveGraph) + 'static,
    {
        let owner = self.inner.owner.get();
        let id = self.inner.effects.borrow_mut().insert(EffectNode {
            run: Some(Box::new(run)),
            dependencies: SmallVec::new(),
            dirty: true,
            owner,
            owned: Vec::new(),
            cleanups: Vec::new(),
        });
        self.adopt(Owned::Effect(id));

        self.inner.pending_effects.borrow_mut().push_back(id);
        if self.inner.batch_depth.get() == 0 {
            self.flush_effects();
        }

        Effect { id }
    }

    /// Dispose of an effect, running its cleanups and removing it from the graph
    ///
    /// Disposing an already disposed effect is a no-op.
    pub fn dispose_effect(&self, effect: Effect) {
        let owner = match self.inner.effects.borrow().get(effect.id) {
            Some(node) => node.owner,
            None => return,
        };
        self.batch(|g| {
            g.dispose_owned(Owned::Effect(effect.id));
            if let Some(owner) = owner {
                g.forget_owned(owner, Owned::Effect(effect.id));
            }
        });
    }

    /// Whether the effect still exists
    pub fn effect_alive(&self, effect: Effect) -> bool {
        self.inner.effects.borrow().contains_key(effect.id)
    }

    /// Register a cleanup on the current owner
    ///
    /// Inside an effect the cleanup runs before the next run and on disposal;
    /// inside a scope it runs when the scope is disposed.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + 'static) {
        match self.inner.owner.get() {
            Some(Owner::Effect(id)) => {
                if let Some(node) = self.inner.effects.borrow_mut().get_mut(id) {
                    node.cleanups.push(Box::new(cleanup));
                }
            }
            Some(Owner::Scope(id)) => {
                if let Some(node) = self.inner.scopes.borrow_mut().get_mut(id) {
                    node.cleanups.push(Box::new(cleanup));
                }
            }
            None => {
                tracing::warn!("on_cleanup called outside of any owner; cleanup will never run");
            }
        }
    }

    /// Run a closure without recording any dependencies
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let owner = self.inner.owner.get();
        let guard = RunGuard::enter(self, owner, false);
        let result = f();
        guard.finish();
        result
    }

    // =========================================================================
    // SCOPES & CONTEXT
    // =========================================================================

    /// Create a scope owned by the current owner (or a root scope)
    pub fn create_scope(&self) -> Scope {
        let owner = self.inner.owner.get();
        let id = self.inner.scopes.borrow_mut().insert(ScopeNode {
            owner,
            owned: Vec::new(),
            cleanups: Vec::new(),
            contexts: FxHashMap::default(),
        });
        self.adopt(Owned::Scope(id));
        Scope {
            id,
            graph: self.clone(),
        }
    }

    /// The owner new nodes are currently attached to
    pub fn current_owner(&self) -> Option<Owner> {
        self.inner.owner.get()
    }

    /// Run a closure with the given owner as the current owner
    pub fn with_owner<R>(&self, owner: Option<Owner>, f: impl FnOnce() -> R) -> R {
        let prev = self.inner.owner.replace(owner);
        struct Restore<'a>(&'a Cell<Option<Owner>>, Option<Owner>);
        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.0.set(self.1);
            }
        }
        let _restore = Restore(&self.inner.owner, prev);
        f()
    }

    /// Look up a context value, walking from the current owner to the root
    pub fn use_context<T: Clone + 'static>(&self) -> Option<T> {
        self.lookup_context(self.inner.owner.get())
    }

    fn lookup_context<T: Clone + 'static>(&self, mut owner: Option<Owner>) -> Option<T> {
        let key = TypeId::of::<T>();
        while let Some(current) = owner {
            owner = match current {
                Owner::Scope(id) => {
                    let scopes = self.inner.scopes.borrow();
                    let node = scopes.get(id)?;
                    if let Some(value) = node.contexts.get(&key) {
                        return value.downcast_ref::<T>().cloned();
                    }
                    node.owner
                }
                Owner::Effect(id) => self.inner.effects.borrow().get(id)?.owner,
            };
        }
        None
    }

    // =========================================================================
    // BATCHING
    // =========================================================================

    /// Start a batch - effects won't run until the batch ends
    pub fn batch_start(&self) {
        self.inner.batch_depth.set(self.inner.batch_depth.get() + 1);
    }

    /// End a batch and flush pending effects
    pub fn batch_end(&self) {
        let depth = self.inner.batch_depth.get();
        if depth > 0 {
            self.inner.batch_depth.set(depth - 1);
            if depth == 1 {
                self.flush_effects();
            }
        }
    }

    /// Run a function in a batch context
    pub fn batch<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Self) -> R,
    {
        self.batch_start();
        let result = f(self);
        self.batch_end();
        result
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    fn track(&self, source: SourceId) {
        if let Some(Some(frame)) = self.inner.tracking.borrow_mut().last_mut() {
            if !frame.contains(&source) {
                frame.push(source);
            }
        }
    }

    /// Attach a freshly created node to the current owner
    fn adopt(&self, item: Owned) {
        match self.inner.owner.get() {
            Some(Owner::Effect(id)) => {
                if let Some(node) = self.inner.effects.borrow_mut().get_mut(id) {
                    node.owned.push(item);
                }
            }
            Some(Owner::Scope(id)) => {
                if let Some(node) = self.inner.scopes.borrow_mut().get_mut(id) {
                    node.owned.push(item);
                }
            }
            None => {}
        }
    }

    fn forget_owned(&self, owner: Owner, item: Owned) {
        match owner {
            Owner::Effect(id) => {
                if let Some(node) = self.inner.effects.borrow_mut().get_mut(id) {
                    node.owned.retain(|o| *o != item);
                }
            }
            Owner::Scope(id) => {
                if let Some(node) = self.inner.scopes.borrow_mut().get_mut(id) {
                    node.owned.retain(|o| *o != item);
                }
            }
        }
    }

    fn with_subscribers(&self, source: SourceId, f: impl FnOnce(&mut SmallVec<[SubscriberId; 4]>)) {
        match source {
            SourceId::Signal(id) => {
                if let Some(node) = self.inner.signals.borrow_mut().get_mut(id) {
                    f(&mut node.subscribers);
                }
            }
            SourceId::Derived(id) => {
                if let Some(node) = self.inner.derived.borrow_mut().get_mut(id) {
                    f(&mut node.subscribers);
                }
            }
        }
    }

    fn resubscribe(&self, sub: SubscriberId, previous: &[SourceId], next: &[SourceId]) {
        for source in previous.iter().filter(|s| !next.contains(s)) {
            self.with_subscribers(*source, |subs| subs.retain(|s| *s != sub));
        }
        for source in next.iter().filter(|s| !previous.contains(s)) {
            self.with_subscribers(*source, |subs| {
                if !subs.contains(&sub) {
                    subs.push(sub);
                }
            });
        }
    }

    /// Mark a subscriber as dirty
    fn mark_dirty(&self, sub: SubscriberId) {
        match sub {
            SubscriberId::Derived(id) => {
                let subscribers = {
                    let mut derived = self.inner.derived.borrow_mut();
                    match derived.get_mut(id) {
                        Some(node) if !node.dirty => {
                            node.dirty = true;
                            node.subscribers.clone()
                        }
                        _ => return,
                    }
                };
                for sub in subscribers {
                    self.mark_dirty(sub);
                }
            }
            SubscriberId::Effect(id) => {
                if let Some(node) = self.inner.effects.borrow_mut().get_mut(id) {
                    if !node.dirty {
                        node.dirty = true;
                        self.inner.pending_effects.borrow_mut().push_back(id);
                    }
                }
            }
        }
    }

    /// Flush all pending effects
    fn flush_effects(&self) {
        if self.inner.flushing.replace(true) {
            // An outer flush is draining the queue
            return;
        }
        let _guard = FlushGuard(&self.inner.flushing);

        let mut runs = 0usize;
        loop {
            let next = self.inner.pending_effects.borrow_mut().pop_front();
            let Some(effect_id) = next else {
                break;
            };
            runs += 1;
            if runs > MAX_EFFECT_RUNS_PER_FLUSH {
                tracing::error!(
                    runs,
                    "reactive flush did not settle; dropping pending effects (effect writes a signal it reads?)"
                );
                self.inner.pending_effects.borrow_mut().clear();
                break;
            }
            self.run_effect(effect_id);
        }
    }

    /// Run a single effect
    fn run_effect(&self, effect_id: EffectId) {
        let run = {
            let mut effects = self.inner.effects.borrow_mut();
            let Some(node) = effects.get_mut(effect_id) else {
                return;
            };
            if !node.dirty {
                return;
            }
            node.dirty = false;
            node.run.take()
        };
        let Some(mut run) = run else {
            return;
        };

        // Tear down whatever the previous run built
        self.clean_owner(Owner::Effect(effect_id));

        let guard = RunGuard::enter(self, Some(Owner::Effect(effect_id)), true);
        run(self);
        let deps = guard.finish();

        let previous_deps = {
            let mut effects = self.inner.effects.borrow_mut();
            match effects.get_mut(effect_id) {
                Some(node) => {
                    node.run = Some(run);
                    Some(std::mem::replace(&mut node.dependencies, deps.clone()))
                }
                // Disposed during its own run
                None => None,
            }
        };
        if let Some(previous) = previous_deps {
            self.resubscribe(SubscriberId::Effect(effect_id), &previous, &deps);
        }
    }

    /// Dispose everything an owner owns and run its cleanups (last registered first)
    fn clean_owner(&self, owner: Owner) {
        let (owned, cleanups) = match owner {
            Owner::Effect(id) => match self.inner.effects.borrow_mut().get_mut(id) {
                Some(node) => (
                    std::mem::take(&mut node.owned),
                    std::mem::take(&mut node.cleanups),
                ),
                None => return,
            },
            Owner::Scope(id) => match self.inner.scopes.borrow_mut().get_mut(id) {
                Some(node) => (
                    std::mem::take(&mut node.owned),
                    std::mem::take(&mut node.cleanups),
                ),
                None => return,
            },
        };

        for item in owned.into_iter().rev() {
            self.dispose_owned(item);
        }
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
    }

    fn dispose_owned(&self, item: Owned) {
        match item {
            Owned::Signal(id) => {
                let node = self.inner.signals.borrow_mut().remove(id);
                drop(node);
            }
            Owned::Derived(id) => {
                let node = self.inner.derived.borrow_mut().remove(id);
                if let Some(node) = node {
                    for dep in &node.dependencies {
                        self.with_subscribers(*dep, |subs| {
                            subs.retain(|s| *s != SubscriberId::Derived(id))
                        });
                    }
                }
            }
            Owned::Effect(id) => {
                self.clean_owner(Owner::Effect(id));
                let node = self.inner.effects.borrow_mut().remove(id);
                if let Some(node) = node {
                    for dep in &node.dependencies {
                        self.with_subscribers(*dep, |subs| {
                            subs.retain(|s| *s != SubscriberId::Effect(id))
                        });
                    }
                }
            }
            Owned::Scope(id) => {
                self.clean_owner(Owner::Scope(id));
                let node = self.inner.scopes.borrow_mut().remove(id);
                drop(node);
            }
        }
    }

    /// Get statistics about the reactive graph
    pub fn stats(&self) -> ReactiveStats {
        ReactiveStats {
            signal_count: self.inner.signals.borrow().len(),
            derived_count: self.inner.derived.borrow().len(),
            effect_count: self.inner.effects.borrow().len(),
            scope_count: self.inner.scopes.borrow().len(),
            pending_effects: self.inner.pending_effects.borrow().len(),
            global_version: self.inner.global_version.get(),
        }
    }
}

impl Default for ReactiveGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReactiveGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveGraph")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Statistics about the reactive graph
#[derive(Debug, Clone)]
pub struct ReactiveStats {
    pub signal_count: usize,
    pub derived_count: usize,
    pub effect_count: usize,
    pub scope_count: usize,
    pub pending_effects: usize,
    pub global_version: u64,
}

// =============================================================================
// SCOPE - ownership unit for one mounted component
// =============================================================================

/// An owner scope
///
/// Everything created through the scope (or inside [`Scope::run`]) is
/// disposed when the scope is disposed, including when a parent scope is
/// disposed first.
#[derive(Clone)]
pub struct Scope {
    id: ScopeId,
    graph: ReactiveGraph,
}

impl Scope {
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The graph this scope lives in
    pub fn graph(&self) -> &ReactiveGraph {
        &self.graph
    }

    /// Whether the scope has not been disposed yet
    pub fn is_alive(&self) -> bool {
        self.graph.inner.scopes.borrow().contains_key(self.id)
    }

    /// Run a closure with this scope as the current owner
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        self.graph.with_owner(Some(Owner::Scope(self.id)), f)
    }

    /// Create a child scope
    pub fn child(&self) -> Scope {
        self.run(|| self.graph.create_scope())
    }

    /// Create a signal owned by this scope
    pub fn create_signal<T: 'static>(&self, initial: T) -> Signal<T> {
        self.run(|| self.graph.create_signal(initial))
    }

    /// Create a signal owned by this scope, bound to the graph
    pub fn create_state<T: Clone + 'static>(&self, initial: T) -> State<T> {
        State::new(self.create_signal(initial), self.graph.clone())
    }

    /// Create a derived value owned by this scope
    pub fn create_derived<T, F>(&self, compute: F) -> Derived<T>
    where
        T: Clone + 'static,
        F: Fn(&ReactiveGraph) -> T + 'static,
    {
        self.run(|| self.graph.create_derived(compute))
    }

    /// Create an effect owned by this scope
    pub fn create_effect<F>(&self, run: F) -> Effect
    where
        F: FnMut(&ReactiveGraph) + 'static,
    {
        self.run(|| self.graph.create_effect(run))
    }

    /// Register a cleanup that runs when this scope is disposed
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + 'static) {
        self.run(|| self.graph.on_cleanup(cleanup));
    }

    /// Provide a context value to this scope and its descendants
    pub fn provide_context<T: 'static>(&self, value: T) {
        if let Some(node) = self.graph.inner.scopes.borrow_mut().get_mut(self.id) {
            node.contexts.insert(TypeId::of::<T>(), Rc::new(value));
        }
    }

    /// Look up a context value starting at this scope
    pub fn use_context<T: Clone + 'static>(&self) -> Option<T> {
        self.graph.lookup_context(Some(Owner::Scope(self.id)))
    }

    /// Look up a context value, failing when no ancestor provides one
    pub fn expect_context<T: Clone + 'static>(&self) -> Result<T> {
        if !self.is_alive() {
            return Err(CoreError::ScopeDisposed);
        }
        self.use_context::<T>()
            .ok_or(CoreError::MissingContext(std::any::type_name::<T>()))
    }

    /// Dispose the scope: owned nodes are disposed last-created first, then
    /// cleanups run last-registered first
    ///
    /// Disposing twice is a no-op.
    pub fn dispose(&self) {
        let owner = match self.graph.inner.scopes.borrow().get(self.id) {
            Some(node) => node.owner,
            None => return,
        };
        self.graph.batch(|g| {
            g.dispose_owned(Owned::Scope(self.id));
            if let Some(owner) = owner {
                g.forget_owned(owner, Owned::Scope(self.id));
            }
        });
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope").field("id", &self.id).finish()
    }
}

// =============================================================================
// STATE - signal bound to its graph
// =============================================================================

/// A bound state value with direct get/set methods
///
/// Wraps a signal together with a handle to its graph so it can be read and
/// written without threading the graph through every call.
pub struct State<T> {
    signal: Signal<T>,
    graph: ReactiveGraph,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal,
            graph: self.graph.clone(),
        }
    }
}

impl<T: Clone + 'static> State<T> {
    /// Create a new State wrapper
    pub fn new(signal: Signal<T>, graph: ReactiveGraph) -> Self {
        Self { signal, graph }
    }

    /// Get the current value (tracked)
    pub fn get(&self) -> T
    where
        T: Default,
    {
        self.graph.get(self.signal).unwrap_or_default()
    }

    /// Get the current value, returning None if the signal was disposed
    pub fn try_get(&self) -> Option<T> {
        self.graph.get(self.signal)
    }

    /// Get the current value without tracking
    pub fn get_untracked(&self) -> Option<T> {
        self.graph.get_untracked(self.signal)
    }

    /// Set a new value
    pub fn set(&self, value: T) {
        self.graph.set(self.signal, value);
    }

    /// Update the value using a function
    pub fn update(&self, f: impl FnOnce(T) -> T) {
        self.graph.update(self.signal, f);
    }

    /// Get the underlying signal
    pub fn signal(&self) -> Signal<T> {
        self.signal
    }

    /// Get the signal ID
    pub fn signal_id(&self) -> SignalId {
        self.signal.id()
    }

    pub fn graph(&self) -> &ReactiveGraph {
        &self.graph
    }
}

impl<T> std::fmt::Debug for State<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").field("signal", &self.signal.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_create_get_set() {
        let graph = ReactiveGraph::new();

        let count = graph.create_signal(0i32);
        assert_eq!(graph.get(count), Some(0));

        graph.set(count, 42);
        assert_eq!(graph.get(count), Some(42));
    }

    #[test]
    fn test_signal_update() {
        let graph = ReactiveGraph::new();

        let count = graph.create_signal(10i32);
        graph.update(count, |x| x + 5);
        assert_eq!(graph.get(count), Some(15));
    }

    #[test]
    fn test_derived_caching() {
        let graph = ReactiveGraph::new();
        let compute_count = Rc::new(Cell::new(0));

        let count = graph.create_signal(5i32);
        let counter = compute_count.clone();
        let doubled = graph.create_derived(move |g| {
            counter.set(counter.get() + 1);
            g.get(count).unwrap_or(0) * 2
        });

        assert_eq!(graph.get_derived(doubled), Some(10));
        assert_eq!(compute_count.get(), 1);

        assert_eq!(graph.get_derived(doubled), Some(10));
        assert_eq!(compute_count.get(), 1);

        graph.set(count, 7);
        assert_eq!(graph.get_derived(doubled), Some(14));
        assert_eq!(compute_count.get(), 2);
    }

    #[test]
    fn test_effect_tracks_derived() {
        let graph = ReactiveGraph::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let count = graph.create_signal(1i32);
        let doubled = graph.create_derived(move |g| g.get(count).unwrap_or(0) * 2);
        let sink = seen.clone();
        graph.create_effect(move |g| {
            sink.borrow_mut().push(g.get_derived(doubled).unwrap_or(0));
        });

        graph.set(count, 3);
        assert_eq!(*seen.borrow(), vec![2, 6]);
    }

    #[test]
    fn test_effect_runs_on_change() {
        let graph = ReactiveGraph::new();
        let effect_runs = Rc::new(RefCell::new(Vec::new()));

        let count = graph.create_signal(0i32);
        let runs = effect_runs.clone();

        graph.create_effect(move |g| {
            runs.borrow_mut().push(g.get(count).unwrap_or(0));
        });

        assert_eq!(*effect_runs.borrow(), vec![0]);

        graph.set(count, 1);
        graph.set(count, 2);
        assert_eq!(*effect_runs.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_untracked_read_does_not_subscribe() {
        let graph = ReactiveGraph::new();
        let runs = Rc::new(Cell::new(0));

        let tracked = graph.create_signal(0i32);
        let untracked = graph.create_signal(0i32);
        let counter = runs.clone();
        graph.create_effect(move |g| {
            let _ = g.get(tracked);
            let _ = g.untrack(|| g.get(untracked));
            counter.set(counter.get() + 1);
        });

        graph.set(untracked, 1);
        assert_eq!(runs.get(), 1);
        graph.set(tracked, 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_batching() {
        let graph = ReactiveGraph::new();
        let effect_runs = Rc::new(Cell::new(0));

        let a = graph.create_signal(1i32);
        let b = graph.create_signal(2i32);
        let runs = effect_runs.clone();

        graph.create_effect(move |g| {
            let _a = g.get(a);
            let _b = g.get(b);
            runs.set(runs.get() + 1);
        });
        assert_eq!(effect_runs.get(), 1);

        effect_runs.set(0);
        graph.set(a, 10);
        graph.set(b, 20);
        assert_eq!(effect_runs.get(), 2);

        effect_runs.set(0);
        graph.batch(|g| {
            g.set(a, 100);
            g.set(b, 200);
        });
        assert_eq!(effect_runs.get(), 1);
    }

    #[test]
    fn test_cleanup_runs_before_rerun_and_on_dispose() {
        let graph = ReactiveGraph::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let count = graph.create_signal(0i32);
        let sink = log.clone();
        let effect = graph.create_effect(move |g| {
            let value = g.get(count).unwrap_or(0);
            sink.borrow_mut().push(format!("run {value}"));
            let sink = sink.clone();
            g.on_cleanup(move || sink.borrow_mut().push(format!("cleanup {value}")));
        });

        graph.set(count, 1);
        graph.dispose_effect(effect);
        graph.dispose_effect(effect);

        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
    }

    #[test]
    fn test_dispose_effect() {
        let graph = ReactiveGraph::new();
        let effect_runs = Rc::new(Cell::new(0));

        let count = graph.create_signal(0i32);
        let runs = effect_runs.clone();

        let effect = graph.create_effect(move |g| {
            let _val = g.get(count);
            runs.set(runs.get() + 1);
        });

        graph.set(count, 1);
        assert_eq!(effect_runs.get(), 2);

        graph.dispose_effect(effect);
        assert!(!graph.effect_alive(effect));

        graph.set(count, 2);
        assert_eq!(effect_runs.get(), 2);
    }

    #[test]
    fn test_effect_writing_other_signal_is_flushed_in_same_call() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(1i32);
        let mirror = graph.create_signal(0i32);

        graph.create_effect(move |g| {
            let value = g.get(source).unwrap_or(0);
            g.set(mirror, value * 10);
        });
        assert_eq!(graph.get(mirror), Some(10));

        graph.set(source, 4);
        assert_eq!(graph.get(mirror), Some(40));
    }

    #[test]
    fn test_nested_effects_are_disposed_on_rerun() {
        let graph = ReactiveGraph::new();
        let outer_trigger = graph.create_signal(0i32);
        let inner_trigger = graph.create_signal(0i32);
        let inner_runs = Rc::new(Cell::new(0));

        let counter = inner_runs.clone();
        graph.create_effect(move |g| {
            let _ = g.get(outer_trigger);
            let counter = counter.clone();
            g.create_effect(move |g| {
                let _ = g.get(inner_trigger);
                counter.set(counter.get() + 1);
            });
        });
        assert_eq!(inner_runs.get(), 1);
        assert_eq!(graph.stats().effect_count, 2);

        graph.set(outer_trigger, 1);
        assert_eq!(graph.stats().effect_count, 2);

        inner_runs.set(0);
        graph.set(inner_trigger, 1);
        assert_eq!(inner_runs.get(), 1);
    }

    #[test]
    fn test_scope_dispose_runs_cleanups_in_reverse() {
        let graph = ReactiveGraph::new();
        let scope = graph.create_scope();
        let log = Rc::new(RefCell::new(Vec::new()));

        for name in ["first", "second"] {
            let sink = log.clone();
            scope.on_cleanup(move || sink.borrow_mut().push(name));
        }
        let signal = scope.create_signal(1u8);

        scope.dispose();
        scope.dispose();

        assert_eq!(*log.borrow(), vec!["second", "first"]);
        assert!(!graph.signal_alive(signal.id()));
        assert!(!scope.is_alive());
    }

    #[test]
    fn test_parent_dispose_reaches_children() {
        let graph = ReactiveGraph::new();
        let parent = graph.create_scope();
        let child = parent.child();
        let cleaned = Rc::new(Cell::new(false));

        let flag = cleaned.clone();
        child.on_cleanup(move || flag.set(true));

        parent.dispose();
        assert!(cleaned.get());
        assert!(!child.is_alive());
    }

    #[test]
    fn test_context_lookup_walks_owners() {
        let graph = ReactiveGraph::new();
        let root = graph.create_scope();
        root.provide_context(String::from("root"));
        let child = root.child();
        let found = Rc::new(RefCell::new(None));

        let sink = found.clone();
        child.create_effect(move |g| {
            *sink.borrow_mut() = g.use_context::<String>();
        });

        assert_eq!(found.borrow().as_deref(), Some("root"));
        assert_eq!(child.use_context::<String>().as_deref(), Some("root"));
        assert_eq!(
            child.expect_context::<u32>(),
            Err(CoreError::MissingContext("u32"))
        );
    }

    #[test]
    fn test_set_if_changed() {
        let graph = ReactiveGraph::new();
        let runs = Rc::new(Cell::new(0));
        let value = graph.create_signal(1i32);
        let counter = runs.clone();
        graph.create_effect(move |g| {
            let _ = g.get(value);
            counter.set(counter.get() + 1);
        });

        assert!(!graph.set_if_changed(value, 1));
        assert!(graph.set_if_changed(value, 2));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_stats() {
        let graph = ReactiveGraph::new();

        let _s1 = graph.create_signal(1);
        let _s2 = graph.create_signal(2);
        let _d1 = graph.create_derived(|_| 0);

        let stats = graph.stats();
        assert_eq!(stats.signal_count, 2);
        assert_eq!(stats.derived_count, 1);
    }
}
