#![forbid(unsafe_code)]

//! Ambient observation: which sources did the running computation read?
//!
//! # Design
//!
//! A thread-local stack of frames. [`track`] pushes a frame, runs a closure,
//! and returns every [`Dependency`] recorded into that frame by
//! [`observe`]. Frames nest: an inner `track` (an unbound computation being
//! read from inside another one) gets its own frame, so its reads do not leak
//! into the outer computation.
//!
//! A [`Dependency`] is "event `key` on `source`", together with the source's
//! version of `key` at the time of the read. The source is held weakly; a
//! dependency whose source was dropped simply cannot be subscribed.
//!
//! # Failure Modes
//!
//! - **Panic inside `track`**: the frame guard pops the frame during unwind,
//!   so the stack stays balanced for the next computation.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::emitter::ListenerKey;

/// Something a computation can depend on: it reports changes to `key` by
/// calling subscribed callbacks.
pub trait Source {
    /// Call `callback` whenever `key` changes. Returns a key for
    /// [`Source::unsubscribe`].
    fn subscribe(&self, key: &str, callback: Rc<dyn Fn()>) -> ListenerKey;

    /// Remove a subscription made with [`Source::subscribe`].
    fn unsubscribe(&self, key: &str, listener: ListenerKey);

    /// Position of `key` in the dependency graph. Plain storage is 0; a
    /// computation is one deeper than its deepest dependency. Updates run
    /// shallow-first.
    fn depth(&self, _key: &str) -> u32 {
        0
    }

    /// Counter that moves whenever `key` changes, before the change is
    /// delivered to subscribers. Sources without one report 0 forever.
    fn version(&self, _key: &str) -> u64 {
        0
    }

    /// Bring `key` up to date if the source derives it lazily.
    fn refresh(&self, _key: &str) {}
}

/// A recorded read: event `key` on `source`.
#[derive(Clone)]
pub struct Dependency {
    source: Weak<dyn Source>,
    key: Rc<str>,
    seen: u64,
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("key", &self.key)
            .field("seen", &self.seen)
            .field("alive", &(self.source.strong_count() > 0))
            .finish()
    }
}

impl Dependency {
    /// Create a dependency on `key` of `source`, remembering the version
    /// it has now.
    #[must_use]
    pub fn new(source: Weak<dyn Source>, key: &str) -> Self {
        let seen = source.upgrade().map_or(0, |s| s.version(key));
        Self {
            source,
            key: Rc::from(key),
            seen,
        }
    }

    /// The observed event name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Same source (by identity) and same key.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.source, &other.source) && self.key == other.key
    }

    /// Depth of the source, or 0 if it is gone.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.source.upgrade().map_or(0, |s| s.depth(&self.key))
    }

    /// Whether the source changed `key` since this dependency was recorded.
    /// A dropped source never changes.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.source
            .upgrade()
            .is_some_and(|s| s.version(&self.key) != self.seen)
    }

    /// Ask the source to bring `key` up to date.
    pub fn refresh(&self) {
        if let Some(source) = self.source.upgrade() {
            source.refresh(&self.key);
        }
    }

    /// Subscribe `callback` to this dependency. `None` if the source is gone.
    pub fn subscribe(&self, callback: Rc<dyn Fn()>) -> Option<ListenerKey> {
        self.source
            .upgrade()
            .map(|source| source.subscribe(&self.key, callback))
    }

    /// Undo [`Dependency::subscribe`]. A dropped source needs no cleanup.
    pub fn unsubscribe(&self, listener: ListenerKey) {
        if let Some(source) = self.source.upgrade() {
            source.unsubscribe(&self.key, listener);
        }
    }
}

thread_local! {
    static FRAMES: RefCell<Vec<Vec<Dependency>>> = const { RefCell::new(Vec::new()) };
}

struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

/// Record a read of `key` on `source` into the innermost tracking frame.
///
/// Outside of [`track`] this is a no-op. Repeated reads are recorded once.
pub fn observe(source: Weak<dyn Source>, key: &str) {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            return;
        };
        let dependency = Dependency::new(source, key);
        if !frame.iter().any(|d| d.same_as(&dependency)) {
            frame.push(dependency);
        }
    });
}

/// Run `f` in a fresh frame and return what it observed.
pub fn track<R>(f: impl FnOnce() -> R) -> (R, Vec<Dependency>) {
    FRAMES.with(|frames| frames.borrow_mut().push(Vec::new()));
    let guard = FrameGuard;
    let result = f();
    let observed = FRAMES.with(|frames| {
        frames
            .borrow_mut()
            .last_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    });
    drop(guard);
    (result, observed)
}

/// Run `f` without letting its reads reach the enclosing computation.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    track(f).0
}

/// Whether a computation is currently recording reads.
#[must_use]
pub fn is_tracking() -> bool {
    FRAMES.with(|frames| !frames.borrow().is_empty())
}
