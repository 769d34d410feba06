#![forbid(unsafe_code)]

//! Getters and the per-instance computed bindings behind them.
//!
//! # Design
//!
//! A property with a `get` stores its value in a [`Compute`] owned by the
//! instance, wrapped in a [`ComputedBinding`]. The binding counts listeners
//! of the property on the instance. On the 0 to 1 transition it attaches a
//! forwarding handler to the computation, which binds it; on 1 to 0 it
//! detaches, which unbinds it. While unobserved, reads still evaluate the
//! getter (pull-based) but nothing recomputes eagerly and nothing is
//! forwarded.
//!
//! # Invariants
//!
//! 1. The forward handler is attached exactly while `refcount > 0`.
//! 2. Forwarded events always report [`ChangeKind::Set`].
//! 3. The getter and forward handler hold the instance weakly.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::instance::{Instance, InstanceInner};
use crate::notify::{self, ChangeKind};
use crate::reactive::{Change, Compute, ListenerKey, Resolver};
use crate::value::Value;

type PureFn = dyn Fn(&Instance, &Value) -> Value;
type ResolverFn = dyn Fn(&Instance, &Value, &Resolver<Value>) -> Value;

/// A computed property's getter.
#[derive(Clone)]
pub enum Getter {
    /// `(instance, last_set) -> value`, a pure function of what it reads.
    Pure(Rc<PureFn>),
    /// `(instance, last_set, resolver) -> value`. Returning `Undefined`
    /// keeps the current value; the resolver may push one now or later.
    Resolver(Rc<ResolverFn>),
}

impl Getter {
    pub fn pure(f: impl Fn(&Instance, &Value) -> Value + 'static) -> Self {
        Self::Pure(Rc::new(f))
    }

    pub fn resolver(f: impl Fn(&Instance, &Value, &Resolver<Value>) -> Value + 'static) -> Self {
        Self::Resolver(Rc::new(f))
    }

    /// Build the instance's computation for this getter.
    pub(crate) fn compute(&self, owner: Weak<InstanceInner>, seed: Value) -> Compute<Value> {
        match self {
            Self::Pure(f) => {
                let f = Rc::clone(f);
                Compute::new(seed, move |last| match Instance::upgrade(&owner) {
                    Some(instance) => f(&instance, last),
                    None => last.clone(),
                })
            }
            Self::Resolver(f) => {
                let f = Rc::clone(f);
                Compute::with_resolver(seed, move |last, resolver| {
                    let instance = Instance::upgrade(&owner)?;
                    let value = f(&instance, last, resolver);
                    (!value.is_undefined()).then_some(value)
                })
            }
        }
    }
}

impl fmt::Debug for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pure(_) => "Pure",
            Self::Resolver(_) => "Resolver",
        })
    }
}

/// A computed property's per-instance state.
pub(crate) struct ComputedBinding {
    property: Rc<str>,
    owner: Weak<InstanceInner>,
    compute: Compute<Value>,
    refcount: Cell<usize>,
    forward: RefCell<Option<ListenerKey>>,
}

impl ComputedBinding {
    pub(crate) fn new(property: Rc<str>, owner: Weak<InstanceInner>, compute: Compute<Value>) -> Self {
        Self {
            property,
            owner,
            compute,
            refcount: Cell::new(0),
            forward: RefCell::new(None),
        }
    }

    pub(crate) fn compute(&self) -> &Compute<Value> {
        &self.compute
    }

    #[cfg(test)]
    pub(crate) fn refcount(&self) -> usize {
        self.refcount.get()
    }

    /// One more listener on the property.
    pub(crate) fn retain(&self) {
        let count = self.refcount.get();
        self.refcount.set(count + 1);
        if count > 0 {
            return;
        }
        let owner = self.owner.clone();
        let property = Rc::clone(&self.property);
        let key = self.compute.on_change(move |change: &Change<Value>| {
            if let Some(instance) = Instance::upgrade(&owner) {
                notify::emit(
                    &instance,
                    Rc::clone(&property),
                    ChangeKind::Set,
                    change.value.clone(),
                    change.old.clone(),
                );
            }
        });
        *self.forward.borrow_mut() = Some(key);
        tracing::debug!(property = &*self.property, "computed binding activated");
    }

    /// One listener fewer. Saturates at zero.
    pub(crate) fn release(&self) {
        let count = self.refcount.get();
        if count == 0 {
            return;
        }
        self.refcount.set(count - 1);
        if count > 1 {
            return;
        }
        let key = self.forward.borrow_mut().take();
        if let Some(key) = key {
            self.compute.off_change(key);
        }
        tracing::debug!(property = &*self.property, "computed binding deactivated");
    }
}

impl fmt::Debug for ComputedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedBinding")
            .field("property", &self.property)
            .field("refcount", &self.refcount.get())
            .field("compute", &self.compute)
            .finish()
    }
}
