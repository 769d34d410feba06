#![forbid(unsafe_code)]

//! Named type-coercion functions.
//!
//! # Design
//!
//! A [`TypeFn`] is a tagged `(value, property) -> value` transform. The tag
//! matters: a plain callable in a schema is a method, only a `TypeFn` is a
//! coercion. [`CoercionRegistry`] resolves the string keys used in schemas
//! (`"number"`, `"date"`, ...) to `TypeFn`s at compile time.
//!
//! # Invariants
//!
//! 1. Coercions are pure and total; `Null`/`Undefined` inputs are either
//!    passed through or mapped to a falsy value, never rejected.
//! 2. Only [`TypeFn::passthrough`] reports [`TypeFn::is_passthrough`]; the
//!    accessor fast path keys off that flag, not off behavior.

use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{DefineError, Result};
use crate::value::Value;

type CoerceFn = dyn Fn(Value, &str) -> Value;

/// A named coercion function.
#[derive(Clone)]
pub struct TypeFn {
    name: Rc<str>,
    func: Rc<CoerceFn>,
    passthrough: bool,
}

impl TypeFn {
    pub fn new(name: impl Into<Rc<str>>, func: impl Fn(Value, &str) -> Value + 'static) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
            passthrough: false,
        }
    }

    /// The identity coercion that marks a property as plain storage.
    #[must_use]
    pub fn passthrough() -> Self {
        Self {
            name: Rc::from("*"),
            func: Rc::new(|value: Value, _: &str| value),
            passthrough: true,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Coerce `value` for `property`.
    #[must_use]
    pub fn apply(&self, value: Value, property: &str) -> Value {
        (self.func)(value, property)
    }
}

impl fmt::Debug for TypeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeFn({:?})", self.name)
    }
}

/// String-keyed table of coercions.
#[derive(Clone)]
pub struct CoercionRegistry {
    entries: AHashMap<String, TypeFn>,
}

impl Default for CoercionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("date", TypeFn::new("date", date));
        registry.register("number", TypeFn::new("number", number));
        registry.register("boolean", TypeFn::new("boolean", boolean));
        registry.register("htmlbool", TypeFn::new("htmlbool", htmlbool));
        registry.register("string", TypeFn::new("string", string));
        registry.register(
            "stringOrObservable",
            TypeFn::new("stringOrObservable", string_or_observable),
        );
        registry.register("*", TypeFn::passthrough());
        registry.register("any", TypeFn::new("any", |value, _| value));
        registry
    }
}

impl fmt::Debug for CoercionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("CoercionRegistry").field("keys", &keys).finish()
    }
}

impl CoercionRegistry {
    /// A registry without the built-in coercions.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }

    /// Add or replace the coercion for `key`.
    pub fn register(&mut self, key: impl Into<String>, coercion: TypeFn) {
        self.entries.insert(key.into(), coercion);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&TypeFn> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up `key` for `property`, failing with [`DefineError::UnknownType`].
    pub fn resolve(&self, property: &str, key: &str) -> Result<TypeFn> {
        self.get(key)
            .cloned()
            .ok_or_else(|| DefineError::unknown_type(property, key))
    }
}

// ---------------------------------------------------------------------------
// Built-in coercions
// ---------------------------------------------------------------------------

fn date(value: Value, _: &str) -> Value {
    match value {
        Value::String(s) => parse_date(&s).map_or(Value::Null, Value::Date),
        Value::Number(ms) => {
            if !ms.is_finite() {
                return Value::Null;
            }
            #[allow(clippy::cast_possible_truncation)]
            let ms = ms as i64;
            DateTime::from_timestamp_millis(ms).map_or(Value::Null, Value::Date)
        }
        other => other,
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(d.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

fn number(value: Value, _: &str) -> Value {
    match value {
        Value::Undefined | Value::Null | Value::Number(_) => value,
        Value::Bool(b) => Value::Number(if b { 1.0 } else { 0.0 }),
        #[allow(clippy::cast_precision_loss)]
        Value::Date(d) => Value::Number(d.timestamp_millis() as f64),
        Value::String(s) => Value::Number(parse_number(&s)),
        other => Value::Number(parse_number(&other.to_display_string())),
    }
}

/// Script numeric conversion of a string.
pub(crate) fn parse_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = s.strip_prefix(prefix) {
            #[allow(clippy::cast_precision_loss)]
            let parsed = u64::from_str_radix(digits, radix).map_or(f64::NAN, |n| n as f64);
            return parsed;
        }
    }
    let lowered = s.to_ascii_lowercase();
    if lowered.contains("inf") || lowered.contains("nan") {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

fn boolean(value: Value, _: &str) -> Value {
    let falsy = matches!(value.as_str(), Some("false" | "0")) || !value.is_truthy();
    Value::Bool(!falsy)
}

fn htmlbool(value: Value, _: &str) -> Value {
    Value::Bool(matches!(value, Value::String(_)) || value.is_truthy())
}

fn string(value: Value, _: &str) -> Value {
    match value {
        Value::Undefined | Value::Null | Value::String(_) => value,
        other => Value::from(other.to_display_string()),
    }
}

fn string_or_observable(value: Value, property: &str) -> Value {
    match value {
        Value::List(_) | Value::Object(_) | Value::Instance(_) => value,
        other => string(other, property),
    }
}
