#![forbid(unsafe_code)]

//! The setter protocol.
//!
//! # Design
//!
//! A user setter is one of three declared shapes ([`Setter`]). The protocol
//! wrapper built by [`protocol`] opens a batch, reads the baseline, calls
//! the setter, and decides what (if anything) to store:
//!
//! | Shape | Outcome |
//! |-------|---------|
//! | `SideEffectOnly` | the caller's input is stored |
//! | `ReturnsValue`, defined return | stored; with a getter, skipped if equal to the baseline |
//! | `ReturnsValue`, `Undefined` return | with a getter nothing is stored, without one `Undefined` is stored |
//! | `AsyncCompletion`, resolved synchronously | the resolved value was stored, the return is ignored |
//! | `AsyncCompletion`, defined return | as `ReturnsValue` |
//! | `AsyncCompletion`, `Undefined` return | pending: nothing stored, watchdog armed |
//!
//! With a paired getter the baseline is the property's last-set value;
//! without one it is the stored value.
//!
//! # Invariants
//!
//! 1. Every protocol call runs inside one batch, so properties written by the
//!    setter flush together with the property itself.
//! 2. A [`SetResolver`] called after the protocol returned opens its own
//!    batch.
//!
//! # Failure Modes
//!
//! - **Setter panics**: the batch scope aborts the batch on unwind; queued
//!   notifications of that batch are dropped.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::accessor::{GetFn, SetFn};
use crate::config::DefineConfig;
use crate::instance::{Instance, InstanceInner};
use crate::reactive::BatchScope;
use crate::value::Value;
use crate::watchdog;

type ReturnsValueFn = dyn Fn(&Instance, Value, &Value) -> Value;
type SideEffectFn = dyn Fn(&Instance, &Value);
type AsyncFn = dyn Fn(&Instance, Value, &SetResolver, &Value) -> Value;

/// A property setter, tagged with how it completes.
#[derive(Clone)]
pub enum Setter {
    /// `(instance, value, baseline) -> value to store`.
    ReturnsValue(Rc<ReturnsValueFn>),
    /// `(instance, value)`, run for its effects; `value` is stored afterwards.
    SideEffectOnly(Rc<SideEffectFn>),
    /// `(instance, value, resolver, baseline) -> value to store or Undefined`.
    AsyncCompletion(Rc<AsyncFn>),
}

impl Setter {
    pub fn returns_value(f: impl Fn(&Instance, Value, &Value) -> Value + 'static) -> Self {
        Self::ReturnsValue(Rc::new(f))
    }

    pub fn side_effect(f: impl Fn(&Instance, &Value) + 'static) -> Self {
        Self::SideEffectOnly(Rc::new(f))
    }

    pub fn async_completion(
        f: impl Fn(&Instance, Value, &SetResolver, &Value) -> Value + 'static,
    ) -> Self {
        Self::AsyncCompletion(Rc::new(f))
    }
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReturnsValue(_) => "ReturnsValue",
            Self::SideEffectOnly(_) => "SideEffectOnly",
            Self::AsyncCompletion(_) => "AsyncCompletion",
        })
    }
}

/// Completion handle passed to [`Setter::AsyncCompletion`] setters.
#[derive(Clone)]
pub struct SetResolver {
    instance: Weak<InstanceInner>,
    store: SetFn,
    completed: Rc<Cell<bool>>,
}

impl SetResolver {
    /// Store `value` as the property's new value.
    ///
    /// Later calls overwrite earlier ones. Ignored if the instance is gone.
    pub fn resolve(&self, value: impl Into<Value>) {
        let Some(instance) = Instance::upgrade(&self.instance) else {
            return;
        };
        let _batch = BatchScope::new();
        (self.store)(&instance, value.into());
        self.completed.set(true);
    }

    /// Whether [`SetResolver::resolve`] was called.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.completed.get()
    }
}

impl fmt::Debug for SetResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetResolver")
            .field("resolved", &self.completed.get())
            .finish()
    }
}

/// Everything the protocol wrapper needs besides the setter itself.
pub(crate) struct ProtocolParts {
    pub(crate) property: Rc<str>,
    pub(crate) type_name: Rc<str>,
    /// Reads the baseline handed to the setter.
    pub(crate) baseline: GetFn,
    /// Stores a final value (emitting, or feeding the computation).
    pub(crate) store: SetFn,
    pub(crate) has_getter: bool,
    pub(crate) config: Rc<DefineConfig>,
}

/// Wrap `setter` in the completion protocol.
pub(crate) fn protocol(setter: Setter, parts: ProtocolParts) -> SetFn {
    Rc::new(move |instance: &Instance, value: Value| {
        let _batch = BatchScope::new();
        let baseline = (parts.baseline)(instance);
        match &setter {
            Setter::SideEffectOnly(f) => {
                f(instance, &value);
                (parts.store)(instance, value);
            }
            Setter::ReturnsValue(f) => {
                let returned = f(instance, value, &baseline);
                store_returned(&parts, instance, returned, &baseline);
            }
            Setter::AsyncCompletion(f) => {
                let resolver = SetResolver {
                    instance: instance.downgrade(),
                    store: Rc::clone(&parts.store),
                    completed: Rc::new(Cell::new(false)),
                };
                let returned = f(instance, value, &resolver, &baseline);
                if resolver.is_resolved() {
                    return;
                }
                if returned.is_undefined() {
                    if parts.config.warn_async_setters {
                        watchdog::arm(
                            Rc::clone(&parts.property),
                            Rc::clone(&parts.type_name),
                            parts.config.async_setter_timeout,
                            Rc::clone(&resolver.completed),
                        );
                    }
                } else {
                    store_returned(&parts, instance, returned, &baseline);
                }
            }
        }
    })
}

fn store_returned(parts: &ProtocolParts, instance: &Instance, returned: Value, baseline: &Value) {
    match (returned.is_undefined(), parts.has_getter) {
        // With a getter, returning the baseline would only echo it back.
        (false, true) if returned == *baseline => {}
        (false, _) => (parts.store)(instance, returned),
        // The setter only touched other properties; the getter recomputes.
        (true, true) => {}
        (true, false) => (parts.store)(instance, Value::Undefined),
    }
}
