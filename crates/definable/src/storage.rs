#![forbid(unsafe_code)]

//! Lazily-materialized per-instance storage.
//!
//! # Design
//!
//! Each instance owns two namespaces, created on first touch from the
//! type's initializer tables:
//!
//! - [`DataStore`]: plain values. A property with a default starts as
//!   [`Slot::Uninitialized`] holding its provider; the first read runs the
//!   provider and caches the result.
//! - [`ComputedStore`]: one [`ComputedBinding`] per getter-backed property,
//!   built on first use.
//!
//! Providers and factories run with the store's borrow released, so they
//! may read other properties of the same instance.
//!
//! # Invariants
//!
//! 1. A default provider runs at most once per instance and property, and
//!    only when the property is read before being written.
//! 2. A data key is "owned" once it has a slot: it had a default or was
//!    written.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::getter::ComputedBinding;
use crate::instance::Instance;
use crate::value::Value;

/// Produces a property's default for an instance.
pub(crate) type DefaultFn = Rc<dyn Fn(&Instance) -> Value>;

/// Builds a computed property's binding for an instance.
pub(crate) type BindingFactory = Rc<dyn Fn(&Instance) -> ComputedBinding>;

enum Slot<P, V> {
    Uninitialized(P),
    Initialized(V),
}

/// Plain property values.
pub(crate) struct DataStore {
    slots: RefCell<AHashMap<Rc<str>, Slot<DefaultFn, Value>>>,
}

impl DataStore {
    pub(crate) fn new(initializers: &[(Rc<str>, DefaultFn)]) -> Self {
        let slots = initializers
            .iter()
            .map(|(name, provider)| (Rc::clone(name), Slot::Uninitialized(Rc::clone(provider))))
            .collect();
        Self {
            slots: RefCell::new(slots),
        }
    }

    /// Current value, materializing the default on first read.
    pub(crate) fn read(&self, instance: &Instance, name: &str) -> Value {
        let provider = match self.slots.borrow().get(name) {
            None => return Value::Undefined,
            Some(Slot::Initialized(value)) => return value.clone(),
            Some(Slot::Uninitialized(provider)) => Rc::clone(provider),
        };
        let value = provider(instance);
        let mut slots = self.slots.borrow_mut();
        match slots.get(name) {
            // Written while the provider ran: that write wins.
            Some(Slot::Initialized(current)) => current.clone(),
            _ => {
                slots.insert(Rc::from(name), Slot::Initialized(value.clone()));
                value
            }
        }
    }

    pub(crate) fn write(&self, name: &str, value: Value) {
        self.slots
            .borrow_mut()
            .insert(Rc::from(name), Slot::Initialized(value));
    }

    pub(crate) fn owns(&self, name: &str) -> bool {
        self.slots.borrow().contains_key(name)
    }
}

/// Computed property bindings.
pub(crate) struct ComputedStore {
    slots: RefCell<AHashMap<Rc<str>, Slot<BindingFactory, Rc<ComputedBinding>>>>,
}

impl ComputedStore {
    pub(crate) fn new(factories: &[(Rc<str>, BindingFactory)]) -> Self {
        let slots = factories
            .iter()
            .map(|(name, factory)| (Rc::clone(name), Slot::Uninitialized(Rc::clone(factory))))
            .collect();
        Self {
            slots: RefCell::new(slots),
        }
    }

    /// The binding for `name`, built on first use. `None` if `name` is not
    /// a computed property.
    pub(crate) fn binding(&self, instance: &Instance, name: &str) -> Option<Rc<ComputedBinding>> {
        let factory = match self.slots.borrow().get(name)? {
            Slot::Initialized(binding) => return Some(Rc::clone(binding)),
            Slot::Uninitialized(factory) => Rc::clone(factory),
        };
        let built = Rc::new(factory(instance));
        let mut slots = self.slots.borrow_mut();
        if let Some(Slot::Initialized(existing)) = slots.get(name) {
            return Some(Rc::clone(existing));
        }
        slots.insert(Rc::from(name), Slot::Initialized(Rc::clone(&built)));
        Some(built)
    }

    /// The binding for `name` if it was already built.
    pub(crate) fn existing(&self, name: &str) -> Option<Rc<ComputedBinding>> {
        match self.slots.borrow().get(name)? {
            Slot::Initialized(binding) => Some(Rc::clone(binding)),
            Slot::Uninitialized(_) => None,
        }
    }
}
