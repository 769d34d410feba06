#![forbid(unsafe_code)]

//! Named-event listener registry.
//!
//! # Design
//!
//! [`Emitter<A>`] keeps listeners in registration order, keyed by event name.
//! Each registration returns a [`ListenerKey`] used to remove it again.
//! Dispatch snapshots the matching handlers before calling them, so a handler
//! may register or remove listeners (including itself) without a re-entrant
//! borrow.
//!
//! The emitter itself never defers anything: batching is the caller's job
//! (see [`crate::batch::enqueue`]).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerKey(u64);

impl ListenerKey {
    /// Raw key value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

type Handler<A> = Rc<dyn Fn(&A)>;

struct Entry<A> {
    event: Rc<str>,
    key: ListenerKey,
    handler: Handler<A>,
}

/// Listener registry for events carrying a payload of type `A`.
pub struct Emitter<A> {
    entries: RefCell<Vec<Entry<A>>>,
    next_key: Cell<u64>,
}

impl<A> Default for Emitter<A> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            next_key: Cell::new(1),
        }
    }
}

impl<A> std::fmt::Debug for Emitter<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.borrow();
        let events: Vec<&str> = entries.iter().map(|e| &*e.event).collect();
        f.debug_struct("Emitter")
            .field("listener_count", &entries.len())
            .field("events", &events)
            .finish()
    }
}

impl<A: 'static> Emitter<A> {
    /// Create an emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`.
    pub fn on(&self, event: &str, handler: impl Fn(&A) + 'static) -> ListenerKey {
        self.on_rc(event, Rc::new(handler))
    }

    /// Register an already shared handler for `event`.
    pub fn on_rc(&self, event: &str, handler: Rc<dyn Fn(&A)>) -> ListenerKey {
        let key = ListenerKey(self.next_key.get());
        self.next_key.set(key.0 + 1);
        self.entries.borrow_mut().push(Entry {
            event: Rc::from(event),
            key,
            handler,
        });
        key
    }

    /// Remove the listener registered under `key` for `event`.
    ///
    /// Returns `false` if no such listener was registered.
    pub fn off(&self, event: &str, key: ListenerKey) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries
            .iter()
            .position(|e| e.key == key && &*e.event == event)
        {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of listeners registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|e| &*e.event == event)
            .count()
    }

    /// Whether any listener is registered for `event`.
    #[must_use]
    pub fn has_listeners(&self, event: &str) -> bool {
        self.entries.borrow().iter().any(|e| &*e.event == event)
    }

    /// Call every listener of `event`, in registration order, right now.
    pub fn dispatch(&self, event: &str, payload: &A) {
        let handlers: Vec<Handler<A>> = self
            .entries
            .borrow()
            .iter()
            .filter(|e| &*e.event == event)
            .map(|e| Rc::clone(&e.handler))
            .collect();
        for handler in &handlers {
            handler(payload);
        }
    }
}
