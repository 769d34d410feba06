#![forbid(unsafe_code)]

//! Accessor synthesis: one [`Accessor`] per compiled definition.
//!
//! # Design
//!
//! A definition that is exactly `{type: "*"}` gets the plain accessor: read
//! the data slot (recording a dependency), write through the change
//! notifier. Everything else takes the general path:
//!
//! 1. Storage mode is [`StorageMode::Computed`] when the definition has a
//!    getter, [`StorageMode::Data`] otherwise.
//! 2. The default provider (from `value` or `Value`, run through the
//!    coercion chain) initializes the data slot, or seeds the computation.
//! 3. The setter is layered outside-in:
//!
//! ```text
//!   coercion (type, then Type)
//!     └─ get + set : protocol(baseline = last set)    → computation.set
//!     └─ set only  : protocol(baseline = stored value) → change notifier → slot
//!     └─ get only  : computation.set
//!     └─ neither   : change notifier → slot
//! ```
//!
//! # Invariants
//!
//! 1. Coercion runs once per write, before any user setter; values stored by
//!    a setter or its resolver are not coerced again.
//! 2. A computed property is enumerable only when `serialize` says so; a
//!    data property is enumerable unless `serialize` says otherwise.

use std::rc::Rc;

use crate::config::DefineConfig;
use crate::getter::{ComputedBinding, Getter};
use crate::instance::Instance;
use crate::notify;
use crate::reactive::observe;
use crate::schema::{DefaultValue, Definition};
use crate::setter::{self, ProtocolParts};
use crate::storage::{BindingFactory, DefaultFn};
use crate::value::Value;

/// Reads a property of an instance.
pub(crate) type GetFn = Rc<dyn Fn(&Instance) -> Value>;

/// Writes a property of an instance.
pub(crate) type SetFn = Rc<dyn Fn(&Instance, Value)>;

type CoerceFn = Rc<dyn Fn(Value) -> Value>;

/// Which per-instance namespace backs a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StorageMode {
    Data,
    Computed,
}

/// The installed accessor pair of one property, shared by every instance.
pub(crate) struct Accessor {
    pub(crate) mode: StorageMode,
    /// Observing read.
    pub(crate) get: GetFn,
    /// Non-observing read.
    pub(crate) peek: GetFn,
    pub(crate) set: SetFn,
    pub(crate) enumerable: bool,
}

/// An accessor plus the initializer its storage namespace needs.
pub(crate) struct Synthesized {
    pub(crate) accessor: Accessor,
    pub(crate) data_init: Option<DefaultFn>,
    pub(crate) computed_init: Option<BindingFactory>,
}

pub(crate) fn synthesize(
    name: &Rc<str>,
    definition: &Definition,
    type_name: &Rc<str>,
    config: &Rc<DefineConfig>,
) -> Synthesized {
    if definition.is_passthrough_only() {
        return Synthesized {
            accessor: Accessor {
                mode: StorageMode::Data,
                get: data_getter(name),
                peek: data_reader(name),
                set: notify::events_setter(Rc::clone(name), data_reader(name), data_writer(name)),
                enumerable: true,
            },
            data_init: None,
            computed_init: None,
        };
    }

    let coercion = coercion_chain(name, definition);
    let default = default_provider(definition, coercion.clone());
    let enumerable = definition.serialize.unwrap_or(definition.get.is_none());

    let mut synthesized = match &definition.get {
        None => {
            let events = notify::events_setter(Rc::clone(name), data_reader(name), data_writer(name));
            let set = match &definition.set {
                None => events,
                Some(user) => setter::protocol(
                    user.clone(),
                    ProtocolParts {
                        property: Rc::clone(name),
                        type_name: Rc::clone(type_name),
                        baseline: data_reader(name),
                        store: events,
                        has_getter: false,
                        config: Rc::clone(config),
                    },
                ),
            };
            Synthesized {
                accessor: Accessor {
                    mode: StorageMode::Data,
                    get: data_getter(name),
                    peek: data_reader(name),
                    set,
                    enumerable,
                },
                data_init: default,
                computed_init: None,
            }
        }
        Some(getter) => {
            let raw = computed_writer(name);
            let set = match &definition.set {
                None => raw,
                Some(user) => setter::protocol(
                    user.clone(),
                    ProtocolParts {
                        property: Rc::clone(name),
                        type_name: Rc::clone(type_name),
                        baseline: computed_last_set(name),
                        store: raw,
                        has_getter: true,
                        config: Rc::clone(config),
                    },
                ),
            };
            Synthesized {
                accessor: Accessor {
                    mode: StorageMode::Computed,
                    get: computed_getter(name),
                    peek: computed_reader(name),
                    set,
                    enumerable,
                },
                data_init: None,
                computed_init: Some(binding_factory(name, getter, default)),
            }
        }
    };

    if let Some(coerce) = coercion {
        let inner = Rc::clone(&synthesized.accessor.set);
        synthesized.accessor.set =
            Rc::new(move |instance: &Instance, value: Value| inner(instance, coerce(value)));
    }
    synthesized
}

/// `type` applied to the raw input, then `Type` applied to the result.
fn coercion_chain(name: &Rc<str>, definition: &Definition) -> Option<CoerceFn> {
    let ty = definition.ty.clone().filter(|c| !c.is_passthrough());
    let ctor = definition.type_ctor.clone();
    if ty.is_none() && ctor.is_none() {
        return None;
    }
    let property = Rc::clone(name);
    Some(Rc::new(move |value: Value| {
        let value = match &ty {
            Some(coercion) => coercion.apply(value, &property),
            None => value,
        };
        match &ctor {
            Some(ctor) => ctor.coerce(value),
            None => value,
        }
    }))
}

fn default_provider(definition: &Definition, coercion: Option<CoerceFn>) -> Option<DefaultFn> {
    let raw: DefaultFn = match (&definition.value, &definition.value_ctor) {
        (Some(DefaultValue::Literal(value)), _) => {
            let value = value.clone();
            Rc::new(move |_: &Instance| value.clone())
        }
        (Some(DefaultValue::Producer(producer)), _) => Rc::clone(producer),
        (None, Some(ctor)) => {
            let ctor = ctor.clone();
            Rc::new(move |_: &Instance| ctor.construct(Value::Undefined))
        }
        (None, None) => return None,
    };
    Some(match coercion {
        None => raw,
        Some(coerce) => Rc::new(move |instance: &Instance| coerce(raw(instance))),
    })
}

fn binding_factory(name: &Rc<str>, getter: &Getter, default: Option<DefaultFn>) -> BindingFactory {
    let property = Rc::clone(name);
    let getter = getter.clone();
    Rc::new(move |instance: &Instance| {
        let seed = default.as_ref().map_or(Value::Undefined, |provide| provide(instance));
        let compute = getter.compute(instance.downgrade(), seed);
        ComputedBinding::new(Rc::clone(&property), instance.downgrade(), compute)
    })
}

// ---------------------------------------------------------------------------
// Storage-bound readers and writers
// ---------------------------------------------------------------------------

fn data_reader(name: &Rc<str>) -> GetFn {
    let name = Rc::clone(name);
    Rc::new(move |instance: &Instance| instance.data().read(instance, &name))
}

fn data_getter(name: &Rc<str>) -> GetFn {
    let name = Rc::clone(name);
    Rc::new(move |instance: &Instance| {
        observe::observe(instance.as_source(), &name);
        instance.data().read(instance, &name)
    })
}

fn data_writer(name: &Rc<str>) -> SetFn {
    let name = Rc::clone(name);
    Rc::new(move |instance: &Instance, value: Value| instance.data().write(&name, value))
}

fn computed_reader(name: &Rc<str>) -> GetFn {
    let name = Rc::clone(name);
    Rc::new(move |instance: &Instance| {
        instance
            .computed()
            .binding(instance, &name)
            .map_or(Value::Undefined, |b| b.compute().peek())
    })
}

fn computed_getter(name: &Rc<str>) -> GetFn {
    let name = Rc::clone(name);
    Rc::new(move |instance: &Instance| {
        instance
            .computed()
            .binding(instance, &name)
            .map_or(Value::Undefined, |b| b.compute().get())
    })
}

fn computed_last_set(name: &Rc<str>) -> GetFn {
    let name = Rc::clone(name);
    Rc::new(move |instance: &Instance| {
        instance
            .computed()
            .binding(instance, &name)
            .map_or(Value::Undefined, |b| b.compute().last_set())
    })
}

fn computed_writer(name: &Rc<str>) -> SetFn {
    let name = Rc::clone(name);
    Rc::new(move |instance: &Instance, value: Value| {
        if let Some(binding) = instance.computed().binding(instance, &name) {
            binding.compute().set(value);
        }
    })
}
