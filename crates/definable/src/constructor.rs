#![forbid(unsafe_code)]

//! Constructors used by the `Type` and `Value` descriptor keys.
//!
//! A [`Constructor`] pairs "build one from this input" with "is this already
//! one of mine". `Type` coercion keeps values that pass the instance test
//! and constructs everything else; a `Value` default constructs from
//! `Undefined`.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::value::{ObjectMap, Opaque, Value};

type ConstructFn = dyn Fn(Value) -> Value;
type InstanceTest = dyn Fn(&Value) -> bool;

/// A named value factory.
#[derive(Clone)]
pub struct Constructor {
    name: Rc<str>,
    construct: Rc<ConstructFn>,
    is_instance: Rc<InstanceTest>,
}

impl Constructor {
    pub fn new(
        name: impl Into<Rc<str>>,
        construct: impl Fn(Value) -> Value + 'static,
        is_instance: impl Fn(&Value) -> bool + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            construct: Rc::new(construct),
            is_instance: Rc::new(is_instance),
        }
    }

    /// Plain objects. An object input is shallow-copied; anything else
    /// yields an empty object.
    #[must_use]
    pub fn object() -> Self {
        Self::new(
            "Object",
            |input| match input.as_object() {
                Some(source) => Value::Object(Rc::new(RefCell::new(source.borrow().clone()))),
                None => Value::from(ObjectMap::new()),
            },
            |value| matches!(value, Value::Object(_)),
        )
    }

    /// Lists. A list input is shallow-copied, `Undefined`/`Null` yield an
    /// empty list, anything else a one-element list.
    #[must_use]
    pub fn list() -> Self {
        Self::new(
            "List",
            |input| match input {
                Value::List(items) => Value::from(items.borrow().clone()),
                Value::Undefined | Value::Null => Value::list([]),
                other => Value::list([other]),
            },
            |value| matches!(value, Value::List(_)),
        )
    }

    /// Values of a plain Rust type `T`, wrapped as [`Value::Opaque`].
    pub fn opaque<T: Any>(
        name: impl Into<Rc<str>>,
        build: impl Fn(Value) -> T + 'static,
    ) -> Self {
        let name: Rc<str> = name.into();
        let tag = Rc::clone(&name);
        Self::new(
            name,
            move |input| Value::Opaque(Opaque::new(Rc::clone(&tag), build(input))),
            |value| value.as_opaque().is_some_and(Opaque::is::<T>),
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_instance(&self, value: &Value) -> bool {
        (self.is_instance)(value)
    }

    /// Build a new value from `input`.
    #[must_use]
    pub fn construct(&self, input: Value) -> Value {
        (self.construct)(input)
    }

    /// `Type` coercion: keep instances and nullish values, construct
    /// everything else.
    #[must_use]
    pub fn coerce(&self, value: Value) -> Value {
        if value.is_nullish() || self.is_instance(&value) {
            value
        } else {
            self.construct(value)
        }
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constructor({:?})", self.name)
    }
}
