#![forbid(unsafe_code)]

//! Change notification for property writes.
//!
//! # Design
//!
//! [`events_setter`] wraps a data storage writer: it compares the incoming value
//! with the current one (strict identity), writes only if they differ, and
//! queues one change event through the batch. The event kind is decided
//! before the write: [`ChangeKind::Add`] when the old value is `Undefined`
//! and the data slot was never owned, [`ChangeKind::Set`] otherwise.
//!
//! # Invariants
//!
//! 1. Equal writes neither store nor emit.
//! 2. The write happens before the event is queued; listeners never see a
//!    value that is not yet stored.
//! 3. The property's version moves when the event is queued, not when it is
//!    delivered.

use std::fmt;
use std::rc::Rc;

use crate::accessor::{GetFn, SetFn};
use crate::instance::Instance;
use crate::reactive::batch;
use crate::value::Value;

/// Whether a write created the property or updated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Set,
}

/// What a property listener receives alongside the new and old values.
#[derive(Clone)]
pub struct ChangeEvent {
    pub property: Rc<str>,
    pub target: Instance,
    pub kind: ChangeKind,
}

impl fmt::Debug for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEvent")
            .field("property", &self.property)
            .field("target", &self.target.id())
            .field("kind", &self.kind)
            .finish()
    }
}

/// Queue a change event on `instance`.
pub(crate) fn emit(instance: &Instance, property: Rc<str>, kind: ChangeKind, new: Value, old: Value) {
    instance.bump_version(&property);
    let weak = instance.downgrade();
    batch::enqueue(move || {
        if let Some(target) = Instance::upgrade(&weak) {
            let event = ChangeEvent {
                property,
                target: target.clone(),
                kind,
            };
            target.dispatch(event, new, old);
        }
    });
}

/// Wrap `write` so that differing values are stored and announced.
pub(crate) fn events_setter(property: Rc<str>, read: GetFn, write: SetFn) -> SetFn {
    Rc::new(move |instance: &Instance, new: Value| {
        let current = read(instance);
        if new == current {
            return;
        }
        let kind = if current.is_undefined() && !instance.data().owns(&property) {
            ChangeKind::Add
        } else {
            ChangeKind::Set
        };
        write(instance, new.clone());
        emit(instance, Rc::clone(&property), kind, new, current);
    })
}
