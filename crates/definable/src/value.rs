#![forbid(unsafe_code)]

//! Dynamically-typed property values.
//!
//! # Design
//!
//! [`Value`] is what every generated property stores. Scalars are held
//! inline; lists and objects are shared, interior-mutable containers, so two
//! properties can hold the *same* list and a mutation through one is visible
//! through the other.
//!
//! # Invariants
//!
//! 1. `==` is strict identity equality: scalars compare by value (`NaN` is
//!    never equal to itself), containers, instances and opaque values compare
//!    by pointer. Change suppression relies on this.
//! 2. [`ObjectMap`] preserves insertion order; re-inserting an existing key
//!    keeps its position.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::instance::Instance;

/// Shared list storage.
pub type ListRef = Rc<RefCell<Vec<Value>>>;

/// Shared object storage.
pub type ObjectRef = Rc<RefCell<ObjectMap>>;

/// Insertion-ordered string-keyed map.
#[derive(Debug, Clone, Default)]
pub struct ObjectMap {
    entries: Vec<(Rc<str>, Value)>,
}

impl ObjectMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v)
    }

    /// Insert or replace. Returns the previous value.
    pub fn insert(&mut self, key: impl Into<Rc<str>>, value: Value) -> Option<Value> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| &**k == key)?;
        Some(self.entries.remove(index).1)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Rc<str>> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl<K: Into<Rc<str>>> FromIterator<(K, Value)> for ObjectMap {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// A foreign value produced by a [`Constructor`](crate::Constructor) for a
/// plain Rust type.
#[derive(Clone)]
pub struct Opaque {
    name: Rc<str>,
    value: Rc<dyn Any>,
}

impl Opaque {
    pub fn new<T: Any>(name: impl Into<Rc<str>>, value: T) -> Self {
        Self {
            name: name.into(),
            value: Rc::new(value),
        }
    }

    /// Name of the constructor that produced the value.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.name)
    }
}

/// A property value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Date(DateTime<Utc>),
    List(ListRef),
    Object(ObjectRef),
    Instance(Instance),
    Opaque(Opaque),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Self::String(s.into())
    }

    /// A fresh list.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    /// A fresh object.
    pub fn object<K: Into<Rc<str>>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// `Undefined` or `Null`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Script truthiness: `undefined`, `null`, `false`, `0`, `NaN` and the
    /// empty string are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Instance(i) => Some(i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Self::Opaque(o) => Some(o),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::List(_) => "list",
            Self::Object(_) => "object",
            Self::Instance(_) => "instance",
            Self::Opaque(_) => "opaque",
        }
    }

    /// Script string conversion.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        self.render(&mut Vec::new())
    }

    /// A list that is already being rendered renders as empty when reached
    /// again through itself.
    fn render(&self, open: &mut Vec<ListRef>) -> String {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Null => "null".into(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.to_string(),
            Self::Date(d) => d.to_rfc3339_opts(SecondsFormat::Millis, true),
            Self::List(items) => {
                if open.iter().any(|l| Rc::ptr_eq(l, items)) {
                    return String::new();
                }
                open.push(Rc::clone(items));
                let rendered = items
                    .borrow()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.render(open) })
                    .collect::<Vec<_>>()
                    .join(",");
                open.pop();
                rendered
            }
            Self::Object(_) => "[object Object]".into(),
            Self::Instance(i) => format!("[object {}]", i.type_name()),
            Self::Opaque(o) => format!("[object {}]", o.name()),
        }
    }
}

/// Integral values print without a fraction; non-finite values use their
/// script spelling.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        let spelled = if n > 0.0 { "Infinity" } else { "-Infinity" };
        spelled.into()
    } else if n == 0.0 {
        "0".into()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Instance(a), Self::Instance(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({})", format_number(*n)),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Date(d) => write!(f, "Date({})", d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::List(items) => f.debug_tuple("List").field(&items.borrow()).finish(),
            Self::Object(map) => {
                let map = map.borrow();
                f.debug_map().entries(map.iter()).finish()
            }
            Self::Instance(i) => fmt::Debug::fmt(i, f),
            Self::Opaque(o) => fmt::Debug::fmt(o, f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<Instance> for Value {
    fn from(i: Instance) -> Self {
        Self::Instance(i)
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Self::Opaque(o)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }
}

impl From<ObjectMap> for Value {
    fn from(map: ObjectMap) -> Self {
        Self::Object(Rc::new(RefCell::new(map)))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undefined | Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::String(s) => serializer.serialize_str(s),
            Self::Date(d) => {
                serializer.serialize_str(&d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Self::List(items) => {
                let items = items.borrow();
                serializer.collect_seq(items.iter())
            }
            Self::Object(map) => {
                let map = map.borrow();
                serializer.collect_map(map.iter().map(|(k, v)| (&**k, v)))
            }
            Self::Instance(instance) => serde::Serialize::serialize(instance, serializer),
            Self::Opaque(o) => serializer.serialize_str(&format!("[object {}]", o.name())),
        }
    }
}
