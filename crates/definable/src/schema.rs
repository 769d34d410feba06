#![forbid(unsafe_code)]

//! Schema authoring and compilation.
//!
//! # Design
//!
//! Authors describe a type with a [`RawSchema`]: an ordered list of named
//! entries, each one of the shorthand forms of [`RawEntry`], plus an
//! optional wildcard entry. [`Compiler::compile`] turns it into a
//! [`NormalizedSchema`]:
//!
//! 1. The wildcard entry is compiled first, against an empty fallback, into
//!    the default definition.
//! 2. Every other entry is classified. Shorthands expand to descriptors
//!    (`"number"` is `{type: "number"}`, a constructor is `{Type: ctor}`, a
//!    [`TypeFn`] is `{type: f}`); methods go to the method table.
//! 3. Each descriptor key takes the entry's own value if present, else the
//!    default definition's.
//! 4. A definition left with no keys at all becomes `{type: "*"}`.
//!
//! String type keys are resolved against the [`CoercionRegistry`] during
//! compilation. Inline nested schemas under `type`/`Type`/`Value` become
//! anonymous generated types, compiled once per schema identity.
//!
//! # Invariants
//!
//! 1. Compiling the same raw schema twice yields definitions with identical
//!    `Debug` output. Nested type names derive from the owner and property
//!    names, never from counters.
//! 2. Every definition has at least one key.
//!
//! # Failure Modes
//!
//! - Unknown coercion key: [`DefineError::UnknownType`].
//! - Wildcard that is a method, or a `constructor` entry that is not:
//!   [`DefineError::MalformedDescriptor`].

use std::fmt;
use std::rc::Rc;

use crate::coerce::{CoercionRegistry, TypeFn};
use crate::config::DefineConfig;
use crate::constructor::Constructor;
use crate::define::DefineType;
use crate::error::{DefineError, Result};
use crate::getter::Getter;
use crate::instance::Instance;
use crate::reactive::Resolver;
use crate::setter::{SetResolver, Setter};
use crate::value::Value;

/// A schema method: receives the instance and call arguments.
pub type Method = Rc<dyn Fn(&Instance, &[Value]) -> Value>;

/// Producer of a default value, run against the instance being read.
pub type Producer = Rc<dyn Fn(&Instance) -> Value>;

/// The `type` key of a descriptor.
#[derive(Clone)]
pub enum TypeSpec {
    /// A key into the coercion registry.
    Key(String),
    Func(TypeFn),
    /// Inline nested schema.
    Schema(Rc<RawSchema>),
}

impl From<&str> for TypeSpec {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for TypeSpec {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<TypeFn> for TypeSpec {
    fn from(f: TypeFn) -> Self {
        Self::Func(f)
    }
}

impl From<RawSchema> for TypeSpec {
    fn from(schema: RawSchema) -> Self {
        Self::Schema(Rc::new(schema))
    }
}

impl From<Rc<RawSchema>> for TypeSpec {
    fn from(schema: Rc<RawSchema>) -> Self {
        Self::Schema(schema)
    }
}

/// The `Type` and `Value` keys of a descriptor.
#[derive(Clone)]
pub enum ConstructorSpec {
    Ctor(Constructor),
    /// Inline nested schema.
    Schema(Rc<RawSchema>),
}

impl From<Constructor> for ConstructorSpec {
    fn from(ctor: Constructor) -> Self {
        Self::Ctor(ctor)
    }
}

impl From<&DefineType> for ConstructorSpec {
    fn from(ty: &DefineType) -> Self {
        Self::Ctor(ty.constructor())
    }
}

impl From<RawSchema> for ConstructorSpec {
    fn from(schema: RawSchema) -> Self {
        Self::Schema(Rc::new(schema))
    }
}

impl From<Rc<RawSchema>> for ConstructorSpec {
    fn from(schema: Rc<RawSchema>) -> Self {
        Self::Schema(schema)
    }
}

/// The `value` key of a descriptor.
#[derive(Clone)]
pub enum DefaultValue {
    /// Used as-is. Containers are shared between instances.
    Literal(Value),
    /// Run once per instance, on first read.
    Producer(Producer),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Self::Producer(_) => f.write_str("Producer"),
        }
    }
}

/// A full property descriptor, as written by the author.
#[derive(Clone, Default)]
pub struct PropDef {
    ty: Option<TypeSpec>,
    type_ctor: Option<ConstructorSpec>,
    value: Option<DefaultValue>,
    value_ctor: Option<ConstructorSpec>,
    get: Option<Getter>,
    set: Option<Setter>,
    serialize: Option<bool>,
}

impl PropDef {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `type`: coercion applied to every write and to defaults.
    #[must_use]
    pub fn ty(mut self, ty: impl Into<TypeSpec>) -> Self {
        self.ty = Some(ty.into());
        self
    }

    /// `Type`: construct values that are not already instances.
    #[must_use]
    pub fn ctor(mut self, ctor: impl Into<ConstructorSpec>) -> Self {
        self.type_ctor = Some(ctor.into());
        self
    }

    /// `value`: literal default.
    #[must_use]
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(DefaultValue::Literal(value.into()));
        self
    }

    /// `value`: default produced per instance.
    #[must_use]
    pub fn value_with(mut self, producer: impl Fn(&Instance) -> Value + 'static) -> Self {
        self.value = Some(DefaultValue::Producer(Rc::new(producer)));
        self
    }

    /// `Value`: default constructed per instance.
    #[must_use]
    pub fn value_ctor(mut self, ctor: impl Into<ConstructorSpec>) -> Self {
        self.value_ctor = Some(ctor.into());
        self
    }

    /// Pure getter: `(instance, last_set) -> value`.
    #[must_use]
    pub fn get(mut self, f: impl Fn(&Instance, &Value) -> Value + 'static) -> Self {
        self.get = Some(Getter::pure(f));
        self
    }

    /// Resolver getter. Returning `Undefined` keeps the current value.
    #[must_use]
    pub fn get_async(
        mut self,
        f: impl Fn(&Instance, &Value, &Resolver<Value>) -> Value + 'static,
    ) -> Self {
        self.get = Some(Getter::resolver(f));
        self
    }

    #[must_use]
    pub fn getter(mut self, getter: Getter) -> Self {
        self.get = Some(getter);
        self
    }

    /// Setter returning the value to store: `(instance, value, current)`.
    #[must_use]
    pub fn set(mut self, f: impl Fn(&Instance, Value, &Value) -> Value + 'static) -> Self {
        self.set = Some(Setter::returns_value(f));
        self
    }

    /// Setter run for its side effects; the input is stored afterwards.
    #[must_use]
    pub fn set_effect(mut self, f: impl Fn(&Instance, &Value) + 'static) -> Self {
        self.set = Some(Setter::side_effect(f));
        self
    }

    /// Setter that completes through a [`SetResolver`], now or later.
    #[must_use]
    pub fn set_async(
        mut self,
        f: impl Fn(&Instance, Value, &SetResolver, &Value) -> Value + 'static,
    ) -> Self {
        self.set = Some(Setter::async_completion(f));
        self
    }

    #[must_use]
    pub fn setter(mut self, setter: Setter) -> Self {
        self.set = Some(setter);
        self
    }

    /// Whether the property is enumerable (listed by `props`/`keys`).
    #[must_use]
    pub fn serialize(mut self, serialize: bool) -> Self {
        self.serialize = Some(serialize);
        self
    }
}

/// One raw schema entry.
#[derive(Clone)]
pub enum RawEntry {
    /// `"number"`: shorthand for `{type: "number"}`.
    TypeKey(String),
    /// Shorthand for `{Type: ctor}`.
    Constructor(Constructor),
    /// Shorthand for `{type: f}`.
    Coercion(TypeFn),
    Descriptor(PropDef),
    Method(Method),
}

impl From<&str> for RawEntry {
    fn from(key: &str) -> Self {
        Self::TypeKey(key.to_string())
    }
}

impl From<String> for RawEntry {
    fn from(key: String) -> Self {
        Self::TypeKey(key)
    }
}

impl From<Constructor> for RawEntry {
    fn from(ctor: Constructor) -> Self {
        Self::Constructor(ctor)
    }
}

impl From<&DefineType> for RawEntry {
    fn from(ty: &DefineType) -> Self {
        Self::Constructor(ty.constructor())
    }
}

impl From<TypeFn> for RawEntry {
    fn from(f: TypeFn) -> Self {
        Self::Coercion(f)
    }
}

impl From<PropDef> for RawEntry {
    fn from(def: PropDef) -> Self {
        Self::Descriptor(def)
    }
}

/// Ordered raw schema.
#[derive(Clone, Default)]
pub struct RawSchema {
    entries: Vec<(String, RawEntry)>,
    wildcard: Option<RawEntry>,
}

impl RawSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry. The name `"*"` sets the wildcard.
    #[must_use]
    pub fn prop(mut self, name: impl Into<String>, entry: impl Into<RawEntry>) -> Self {
        let name = name.into();
        let entry = entry.into();
        if name == "*" {
            self.wildcard = Some(entry);
            return self;
        }
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = entry,
            None => self.entries.push((name, entry)),
        }
        self
    }

    #[must_use]
    pub fn method(
        self,
        name: impl Into<String>,
        f: impl Fn(&Instance, &[Value]) -> Value + 'static,
    ) -> Self {
        let method: Method = Rc::new(f);
        self.prop(name, RawEntry::Method(method))
    }

    /// Default descriptor for every property lacking one of its keys.
    #[must_use]
    pub fn wildcard(self, entry: impl Into<RawEntry>) -> Self {
        self.prop("*", entry)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.wildcard.is_none()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

// ---------------------------------------------------------------------------
// Normalized form
// ---------------------------------------------------------------------------

/// A resolved `type` coercion.
#[derive(Clone)]
pub enum Coercion {
    Func(TypeFn),
    /// Nested schema type: construct unless already an instance.
    Construct(Constructor),
}

impl Coercion {
    #[must_use]
    pub fn apply(&self, value: Value, property: &str) -> Value {
        match self {
            Self::Func(f) => f.apply(value, property),
            Self::Construct(ctor) => ctor.coerce(value),
        }
    }

    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Func(f) if f.is_passthrough())
    }
}

impl fmt::Debug for Coercion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Func(func) => fmt::Debug::fmt(func, f),
            Self::Construct(ctor) => fmt::Debug::fmt(ctor, f),
        }
    }
}

/// A normalized property definition.
#[derive(Clone, Default)]
pub struct Definition {
    pub get: Option<Getter>,
    pub set: Option<Setter>,
    pub value: Option<DefaultValue>,
    /// The `Value` key.
    pub value_ctor: Option<Constructor>,
    /// The `type` key.
    pub ty: Option<Coercion>,
    /// The `Type` key.
    pub type_ctor: Option<Constructor>,
    pub serialize: Option<bool>,
}

impl Definition {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.get.is_none()
            && self.set.is_none()
            && self.value.is_none()
            && self.value_ctor.is_none()
            && self.ty.is_none()
            && self.type_ctor.is_none()
            && self.serialize.is_none()
    }

    /// Exactly `{type: "*"}`: eligible for the plain accessor fast path.
    #[must_use]
    pub fn is_passthrough_only(&self) -> bool {
        self.ty.as_ref().is_some_and(Coercion::is_passthrough)
            && Self {
                ty: None,
                ..self.clone()
            }
            .is_empty()
    }

    /// Whether a default value provider exists.
    #[must_use]
    pub fn has_default(&self) -> bool {
        self.value.is_some() || self.value_ctor.is_some()
    }

    fn merged_with(self, fallback: &Definition) -> Self {
        Self {
            get: self.get.or_else(|| fallback.get.clone()),
            set: self.set.or_else(|| fallback.set.clone()),
            value: self.value.or_else(|| fallback.value.clone()),
            value_ctor: self.value_ctor.or_else(|| fallback.value_ctor.clone()),
            ty: self.ty.or_else(|| fallback.ty.clone()),
            type_ctor: self.type_ctor.or_else(|| fallback.type_ctor.clone()),
            serialize: self.serialize.or(fallback.serialize),
        }
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Definition");
        if let Some(ty) = &self.ty {
            s.field("type", ty);
        }
        if let Some(ctor) = &self.type_ctor {
            s.field("Type", ctor);
        }
        if let Some(value) = &self.value {
            s.field("value", value);
        }
        if let Some(ctor) = &self.value_ctor {
            s.field("Value", ctor);
        }
        if let Some(get) = &self.get {
            s.field("get", get);
        }
        if let Some(set) = &self.set {
            s.field("set", set);
        }
        if let Some(serialize) = self.serialize {
            s.field("serialize", &serialize);
        }
        s.finish()
    }
}

/// Output of schema compilation.
#[derive(Clone, Default)]
pub struct NormalizedSchema {
    /// Property definitions in declaration order.
    pub definitions: Vec<(Rc<str>, Definition)>,
    pub methods: Vec<(Rc<str>, Method)>,
    pub default_definition: Definition,
}

impl NormalizedSchema {
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|(_, d)| d)
    }

    #[must_use]
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|(_, m)| m)
    }
}

impl fmt::Debug for NormalizedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<&str> = self.methods.iter().map(|(n, _)| &**n).collect();
        f.debug_struct("NormalizedSchema")
            .field("definitions", &self.definitions)
            .field("methods", &methods)
            .field("default_definition", &self.default_definition)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Compiles raw schemas. One compiler is used per top-level type so nested
/// schemas shared between properties compile once.
pub(crate) struct Compiler<'a> {
    registry: &'a Rc<CoercionRegistry>,
    config: &'a DefineConfig,
    nested: Vec<(Rc<RawSchema>, DefineType)>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(registry: &'a Rc<CoercionRegistry>, config: &'a DefineConfig) -> Self {
        Self {
            registry,
            config,
            nested: Vec::new(),
        }
    }

    pub(crate) fn config(&self) -> &DefineConfig {
        self.config
    }

    pub(crate) fn compile(&mut self, type_name: &str, raw: &RawSchema) -> Result<NormalizedSchema> {
        let default_definition = match &raw.wildcard {
            None => Definition::default(),
            Some(entry) => self
                .classify(type_name, "*", entry, &Definition::default())?
                .ok_or_else(|| DefineError::malformed("*", "wildcard entry must be a descriptor"))?,
        };

        let mut definitions = Vec::with_capacity(raw.entries.len());
        let mut methods = Vec::new();
        for (name, entry) in &raw.entries {
            let name: Rc<str> = Rc::from(name.as_str());
            if &*name == "constructor" {
                match entry {
                    RawEntry::Method(m) => methods.push((name, Rc::clone(m))),
                    _ => {
                        return Err(DefineError::malformed(
                            &*name,
                            "`constructor` is reserved for a method",
                        ));
                    }
                }
                continue;
            }
            match self.classify(type_name, &name, entry, &default_definition)? {
                Some(definition) => definitions.push((name, definition)),
                None => {
                    if let RawEntry::Method(m) = entry {
                        methods.push((name, Rc::clone(m)));
                    }
                }
            }
        }

        tracing::debug!(
            type_name,
            definitions = definitions.len(),
            methods = methods.len(),
            "compiled schema"
        );
        Ok(NormalizedSchema {
            definitions,
            methods,
            default_definition,
        })
    }

    /// Expand `entry` to a full definition, or `None` for methods.
    fn classify(
        &mut self,
        owner: &str,
        property: &str,
        entry: &RawEntry,
        fallback: &Definition,
    ) -> Result<Option<Definition>> {
        let own = match entry {
            RawEntry::TypeKey(key) => Definition {
                ty: Some(Coercion::Func(self.registry.resolve(property, key)?)),
                ..Definition::default()
            },
            RawEntry::Constructor(ctor) => Definition {
                type_ctor: Some(ctor.clone()),
                ..Definition::default()
            },
            RawEntry::Coercion(f) => Definition {
                ty: Some(Coercion::Func(f.clone())),
                ..Definition::default()
            },
            RawEntry::Descriptor(def) => self.resolve_descriptor(owner, property, def)?,
            RawEntry::Method(_) => return Ok(None),
        };
        let mut definition = own.merged_with(fallback);
        if definition.is_empty() {
            definition.ty = Some(Coercion::Func(TypeFn::passthrough()));
        }
        Ok(Some(definition))
    }

    fn resolve_descriptor(&mut self, owner: &str, property: &str, def: &PropDef) -> Result<Definition> {
        let ty = match &def.ty {
            None => None,
            Some(TypeSpec::Key(key)) => Some(Coercion::Func(self.registry.resolve(property, key)?)),
            Some(TypeSpec::Func(f)) => Some(Coercion::Func(f.clone())),
            Some(TypeSpec::Schema(schema)) => Some(Coercion::Construct(
                self.nested(owner, property, schema)?.constructor(),
            )),
        };
        let type_ctor = def
            .type_ctor
            .as_ref()
            .map(|spec| self.constructor(owner, property, spec))
            .transpose()?;
        let value_ctor = def
            .value_ctor
            .as_ref()
            .map(|spec| self.constructor(owner, property, spec))
            .transpose()?;
        Ok(Definition {
            get: def.get.clone(),
            set: def.set.clone(),
            value: def.value.clone(),
            value_ctor,
            ty,
            type_ctor,
            serialize: def.serialize,
        })
    }

    fn constructor(&mut self, owner: &str, property: &str, spec: &ConstructorSpec) -> Result<Constructor> {
        match spec {
            ConstructorSpec::Ctor(ctor) => Ok(ctor.clone()),
            ConstructorSpec::Schema(schema) => Ok(self.nested(owner, property, schema)?.constructor()),
        }
    }

    fn nested(&mut self, owner: &str, property: &str, schema: &Rc<RawSchema>) -> Result<DefineType> {
        if let Some((_, ty)) = self.nested.iter().find(|(s, _)| Rc::ptr_eq(s, schema)) {
            return Ok(ty.clone());
        }
        let name = format!("{owner}.{property}");
        let ty = DefineType::compile_nested(&name, schema, self)?;
        self.nested.push((Rc::clone(schema), ty.clone()));
        Ok(ty)
    }
}
