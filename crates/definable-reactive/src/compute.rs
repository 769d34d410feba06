#![forbid(unsafe_code)]

//! Memoized, dependency-tracked values that bind only while observed.
//!
//! # Design
//!
//! A [`Compute<T>`] wraps a getter and the value it last produced. The getter
//! receives the most recently set value (the "last set" seed) and, for
//! resolver-style computations, a [`Resolver`] it may call now or later.
//!
//! While nothing listens, a read evaluates the getter on the spot (inside a
//! fresh tracking frame whose dependencies are discarded) and no
//! subscriptions are held. The first `"change"` listener *binds* the
//! computation: it evaluates once silently and subscribes to every
//! dependency it read. Removing the last listener unbinds it again.
//!
//! A bound computation re-evaluates through [`batch::schedule_update`] when a
//! dependency fires. Re-evaluation diffs the dependency set (subscribe new
//! ones, then drop stale ones) and emits a batched change only when the
//! value is different.
//!
//! Dependency events may still be queued when a bound computation is read,
//! for example from a listener or inside a batch. Each recorded dependency
//! remembers its source's version, so a read first refreshes the
//! dependencies that are themselves computations, then re-evaluates if any
//! version moved (or [`Compute::set`] was called). The scheduled update
//! later finds nothing stale and does no work.
//!
//! A getter returning `None` keeps the current value; that is how a resolver
//! getter says "nothing synchronous, wait for the resolver".
//!
//! # Invariants
//!
//! 1. Unbound computations hold zero subscriptions.
//! 2. A bound computation re-evaluates only when stale, so at most once per
//!    change of its inputs.
//! 3. Reading a bound computation never returns a value older than its
//!    dependencies.
//! 4. `version` increments by exactly 1 per change of the cached value.
//! 5. A change is emitted only when the new value differs from the old one.
//!
//! # Failure Modes
//!
//! - **Getter panics**: the computing flag and tracking frame are reset by
//!   guards; the cached value stays as it was.
//! - **Dependency dropped**: its subscription is inert; the computation keeps
//!   its last value.
//! - **Resolver called after the computation was dropped**: ignored.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::batch;
use crate::emitter::{Emitter, ListenerKey};
use crate::observe::{self, Dependency, Source};

/// Event name every computation emits on.
pub const CHANGE: &str = "change";

/// Payload of a computation's change event.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    /// Value after the change.
    pub value: T,
    /// Value before the change.
    pub old: T,
}

type Getter<T> = dyn Fn(&T, Option<&Resolver<T>>) -> Option<T>;

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}

fn next_id() -> u64 {
    NEXT_ID.with(|n| {
        let id = n.get();
        n.set(id + 1);
        id
    })
}

struct ComputeInner<T> {
    id: u64,
    getter: Box<Getter<T>>,
    uses_resolver: bool,
    last_set: RefCell<T>,
    value: RefCell<T>,
    computing: Cell<bool>,
    pending: RefCell<Option<T>>,
    bound: Cell<bool>,
    dirty: Cell<bool>,
    deps: RefCell<Vec<(Dependency, ListenerKey)>>,
    events: Emitter<Change<T>>,
    version: Cell<u64>,
    depth: Cell<u32>,
    weak_self: Weak<ComputeInner<T>>,
}

struct ComputingGuard<'a>(&'a Cell<bool>);

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: Clone + PartialEq + 'static> ComputeInner<T> {
    /// Run the getter in a fresh tracking frame.
    fn evaluate(&self) -> (Option<T>, Vec<Dependency>) {
        let last = self.last_set.borrow().clone();
        let resolver = self.uses_resolver.then(|| Resolver {
            inner: self.weak_self.clone(),
        });
        self.pending.borrow_mut().take();
        self.computing.set(true);
        let (returned, deps) = {
            let _guard = ComputingGuard(&self.computing);
            observe::track(|| (self.getter)(&last, resolver.as_ref()))
        };
        let resolved = self.pending.borrow_mut().take();
        (returned.or(resolved), deps)
    }

    fn store_silently(&self, value: T) {
        *self.value.borrow_mut() = value;
    }

    fn update_value(&self, value: T) {
        let old = {
            let mut current = self.value.borrow_mut();
            if *current == value {
                return;
            }
            std::mem::replace(&mut *current, value.clone())
        };
        self.version.set(self.version.get() + 1);
        let weak = self.weak_self.clone();
        batch::enqueue(move || {
            if let Some(inner) = weak.upgrade() {
                inner.events.dispatch(CHANGE, &Change { value, old });
            }
        });
    }

    fn schedule_recompute(&self) {
        let weak = self.weak_self.clone();
        batch::schedule_update(self.id, self.depth.get(), move || {
            if let Some(inner) = weak.upgrade() {
                inner.refresh();
            }
        });
    }

    fn is_stale(&self) -> bool {
        self.dirty.get() || self.deps.borrow().iter().any(|(d, _)| d.is_stale())
    }

    /// Re-evaluate if the last-set seed or any dependency moved since the
    /// last evaluation.
    fn refresh(&self) {
        if !self.bound.get() || self.computing.get() {
            return;
        }
        let deps: Vec<Dependency> = self.deps.borrow().iter().map(|(d, _)| d.clone()).collect();
        for dependency in &deps {
            dependency.refresh();
        }
        if self.is_stale() {
            self.recompute();
        }
    }

    fn recompute(&self) {
        if !self.bound.get() {
            return;
        }
        self.dirty.set(false);
        let (result, deps) = self.evaluate();
        self.rebind(deps);
        tracing::trace!(compute = self.id, changed = result.is_some(), "recomputed");
        if let Some(value) = result {
            self.update_value(value);
        }
    }

    fn rebind(&self, next: Vec<Dependency>) {
        let old = std::mem::take(&mut *self.deps.borrow_mut());
        let mut kept = Vec::with_capacity(next.len());
        for dependency in next {
            if let Some((_, key)) = old.iter().find(|(d, _)| d.same_as(&dependency)) {
                kept.push((dependency, *key));
                continue;
            }
            let weak = self.weak_self.clone();
            let callback: Rc<dyn Fn()> = Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.schedule_recompute();
                }
            });
            if let Some(key) = dependency.subscribe(callback) {
                kept.push((dependency, key));
            }
        }
        for (dependency, key) in &old {
            if !kept.iter().any(|(d, _)| d.same_as(dependency)) {
                dependency.unsubscribe(*key);
            }
        }
        let depth = kept.iter().map(|(d, _)| d.depth()).max().unwrap_or(0);
        self.depth.set(depth + 1);
        *self.deps.borrow_mut() = kept;
    }

    fn bind(&self) {
        self.dirty.set(false);
        let (result, deps) = self.evaluate();
        if let Some(value) = result {
            self.store_silently(value);
        }
        self.bound.set(true);
        self.rebind(deps);
        tracing::trace!(compute = self.id, deps = self.deps.borrow().len(), "bound");
    }

    fn unbind(&self) {
        self.bound.set(false);
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for (dependency, key) in deps {
            dependency.unsubscribe(key);
        }
        tracing::trace!(compute = self.id, "unbound");
    }

    fn on(&self, event: &str, handler: Rc<dyn Fn(&Change<T>)>) -> ListenerKey {
        let key = self.events.on_rc(event, handler);
        if event == CHANGE && !self.bound.get() {
            self.bind();
        }
        key
    }

    fn off(&self, event: &str, key: ListenerKey) -> bool {
        let removed = self.events.off(event, key);
        if removed && event == CHANGE && self.bound.get() && !self.events.has_listeners(CHANGE) {
            self.unbind();
        }
        removed
    }
}

impl<T: Clone + PartialEq + 'static> Source for ComputeInner<T> {
    fn subscribe(&self, key: &str, callback: Rc<dyn Fn()>) -> ListenerKey {
        self.on(key, Rc::new(move |_: &Change<T>| callback()))
    }

    fn unsubscribe(&self, key: &str, listener: ListenerKey) {
        self.off(key, listener);
    }

    fn depth(&self, _key: &str) -> u32 {
        self.depth.get()
    }

    fn version(&self, _key: &str) -> u64 {
        self.version.get()
    }

    fn refresh(&self, _key: &str) {
        ComputeInner::refresh(self);
    }
}

/// Handle given to resolver getters. Calling [`Resolver::resolve`] during
/// the getter supplies its result; calling it later updates the value (and
/// notifies listeners) directly.
pub struct Resolver<T> {
    inner: Weak<ComputeInner<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Resolver<T> {
    /// Provide the computation's value.
    pub fn resolve(&self, value: T) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.computing.get() {
            *inner.pending.borrow_mut() = Some(value);
        } else {
            inner.update_value(value);
        }
    }
}

/// A memoized value derived from whatever its getter reads.
///
/// Cloning a `Compute` creates a new handle to the **same** state.
pub struct Compute<T> {
    inner: Rc<ComputeInner<T>>,
}

impl<T> Clone for Compute<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Compute<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compute")
            .field("id", &self.inner.id)
            .field("bound", &self.inner.bound.get())
            .field("version", &self.inner.version.get())
            .field("depth", &self.inner.depth.get())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Compute<T> {
    fn build(seed: T, uses_resolver: bool, getter: Box<Getter<T>>) -> Self {
        let inner = Rc::new_cyclic(|weak_self| ComputeInner {
            id: next_id(),
            getter,
            uses_resolver,
            last_set: RefCell::new(seed.clone()),
            value: RefCell::new(seed),
            computing: Cell::new(false),
            pending: RefCell::new(None),
            bound: Cell::new(false),
            dirty: Cell::new(false),
            deps: RefCell::new(Vec::new()),
            events: Emitter::new(),
            version: Cell::new(0),
            depth: Cell::new(1),
            weak_self: weak_self.clone(),
        });
        Self { inner }
    }

    /// A computation whose getter always produces a value.
    ///
    /// `getter` receives the last value passed to [`Compute::set`] (initially
    /// `seed`).
    pub fn new(seed: T, getter: impl Fn(&T) -> T + 'static) -> Self {
        Self::build(
            seed,
            false,
            Box::new(move |last: &T, _: Option<&Resolver<T>>| Some(getter(last))),
        )
    }

    /// A computation whose getter may answer later through a [`Resolver`].
    ///
    /// Returning `None` keeps the current value; `Some` wins over a value
    /// resolved synchronously during the same call.
    pub fn with_resolver(
        seed: T,
        getter: impl Fn(&T, &Resolver<T>) -> Option<T> + 'static,
    ) -> Self {
        Self::build(
            seed,
            true,
            Box::new(move |last: &T, resolver: Option<&Resolver<T>>| {
                resolver.and_then(|r| getter(last, r))
            }),
        )
    }

    fn as_source(&self) -> Weak<dyn Source> {
        let weak: Weak<ComputeInner<T>> = Rc::downgrade(&self.inner);
        weak
    }

    /// Current value. Records a dependency on this computation.
    pub fn get(&self) -> T {
        let value = self.read();
        observe::observe(self.as_source(), CHANGE);
        value
    }

    /// Current value without recording a dependency.
    pub fn peek(&self) -> T {
        observe::untracked(|| self.read())
    }

    fn read(&self) -> T {
        if self.inner.bound.get() {
            self.inner.refresh();
        } else {
            let (result, _discarded) = self.inner.evaluate();
            if let Some(value) = result {
                self.inner.store_silently(value);
            }
        }
        self.inner.value.borrow().clone()
    }

    /// Store `value` as the last-set seed. A bound computation re-evaluates.
    pub fn set(&self, value: T) {
        *self.inner.last_set.borrow_mut() = value;
        if self.inner.bound.get() {
            self.inner.dirty.set(true);
            self.inner.schedule_recompute();
        }
    }

    /// The last value passed to [`Compute::set`] (or the seed).
    #[must_use]
    pub fn last_set(&self) -> T {
        self.inner.last_set.borrow().clone()
    }

    /// Listen for changes. The first listener binds the computation.
    pub fn on_change(&self, handler: impl Fn(&Change<T>) + 'static) -> ListenerKey {
        self.inner.on(CHANGE, Rc::new(handler))
    }

    /// Remove a change listener. Removing the last one unbinds.
    pub fn off_change(&self, key: ListenerKey) -> bool {
        self.inner.off(CHANGE, key)
    }

    /// Whether the computation currently holds subscriptions.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.inner.bound.get()
    }

    /// Number of times the cached value changed.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Unique id, also used to deduplicate scheduled updates.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Graph depth as of the last evaluation while bound.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.inner.depth.get()
    }

    /// Number of dependencies currently subscribed.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
