#![forbid(unsafe_code)]

//! Generated types.
//!
//! # Design
//!
//! A [`DefineType`] is a compiled schema plus the accessor table synthesized
//! from it. The table is built once and shared read-only by every instance;
//! per-instance state lives in the instance's storage namespaces.
//!
//! Types are cheap handles: cloning shares the same definition, and
//! equality is identity.

use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::accessor::{self, Accessor, Synthesized};
use crate::coerce::CoercionRegistry;
use crate::config::DefineConfig;
use crate::constructor::Constructor;
use crate::error::Result;
use crate::instance::Instance;
use crate::reactive::BatchScope;
use crate::schema::{Compiler, Definition, NormalizedSchema, RawSchema};
use crate::storage::{BindingFactory, DefaultFn};
use crate::value::Value;

struct TypeInner {
    name: Rc<str>,
    config: Rc<DefineConfig>,
    schema: NormalizedSchema,
    accessors: Vec<(Rc<str>, Accessor)>,
    index: AHashMap<Rc<str>, usize>,
    data_init: Vec<(Rc<str>, DefaultFn)>,
    computed_init: Vec<(Rc<str>, BindingFactory)>,
}

/// A type generated from a schema.
#[derive(Clone)]
pub struct DefineType {
    inner: Rc<TypeInner>,
}

impl DefineType {
    /// Compile `schema` with the default configuration and coercions.
    ///
    /// # Errors
    ///
    /// Returns a [`DefineError`](crate::DefineError) for unknown coercion
    /// keys and malformed entries.
    pub fn new(name: impl Into<Rc<str>>, schema: RawSchema) -> Result<Self> {
        Self::builder(name).build(schema)
    }

    pub fn builder(name: impl Into<Rc<str>>) -> DefineTypeBuilder {
        DefineTypeBuilder {
            name: name.into(),
            config: DefineConfig::default(),
            registry: Rc::new(CoercionRegistry::default()),
        }
    }

    /// Compile an inline nested schema with the enclosing compilation's
    /// registry and configuration.
    pub(crate) fn compile_nested(
        name: &str,
        raw: &RawSchema,
        compiler: &mut Compiler<'_>,
    ) -> Result<Self> {
        let schema = compiler.compile(name, raw)?;
        let config = Rc::new(compiler.config().clone());
        Ok(Self::assemble(Rc::from(name), schema, config))
    }

    fn assemble(name: Rc<str>, schema: NormalizedSchema, config: Rc<DefineConfig>) -> Self {
        let mut accessors = Vec::with_capacity(schema.definitions.len());
        let mut index = AHashMap::with_capacity(schema.definitions.len());
        let mut data_init = Vec::new();
        let mut computed_init = Vec::new();
        for (property, definition) in &schema.definitions {
            let Synthesized {
                accessor,
                data_init: data,
                computed_init: computed,
            } = accessor::synthesize(property, definition, &name, &config);
            if let Some(provider) = data {
                data_init.push((Rc::clone(property), provider));
            }
            if let Some(factory) = computed {
                computed_init.push((Rc::clone(property), factory));
            }
            index.insert(Rc::clone(property), accessors.len());
            accessors.push((Rc::clone(property), accessor));
        }
        Self {
            inner: Rc::new(TypeInner {
                name,
                config,
                schema,
                accessors,
                index,
                data_init,
                computed_init,
            }),
        }
    }

    /// A new instance with every property at its default.
    #[must_use]
    pub fn create(&self) -> Instance {
        self.create_with(std::iter::empty::<(&str, Value)>())
    }

    /// A new instance with `props` assigned in order, inside one batch.
    ///
    /// Names the schema does not declare become plain own values.
    pub fn create_with<K: AsRef<str>>(&self, props: impl IntoIterator<Item = (K, Value)>) -> Instance {
        let instance = Instance::new(self.clone());
        {
            let _batch = BatchScope::new();
            for (name, value) in props {
                instance.assign(name.as_ref(), value);
            }
        }
        if self.inner.config.seal_instances {
            instance.seal();
        }
        instance
    }

    /// Construct from a value: an object's entries become initial props,
    /// anything else is ignored.
    #[must_use]
    pub fn create_from(&self, input: &Value) -> Instance {
        let entries: Vec<(Rc<str>, Value)> = input
            .as_object()
            .map(|map| {
                map.borrow()
                    .iter()
                    .map(|(k, v)| (Rc::clone(k), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        self.create_with(entries)
    }

    /// This type as a `Type`/`Value` constructor.
    #[must_use]
    pub fn constructor(&self) -> Constructor {
        let build = self.clone();
        let test = self.clone();
        Constructor::new(
            Rc::clone(&self.inner.name),
            move |input| Value::Instance(build.create_from(&input)),
            move |value| value.as_instance().is_some_and(|i| i.is_instance_of(&test)),
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn config(&self) -> &DefineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn normalized(&self) -> &NormalizedSchema {
        &self.inner.schema
    }

    #[must_use]
    pub fn definition(&self, property: &str) -> Option<&Definition> {
        self.inner.schema.definition(property)
    }

    /// Declared property names, in declaration order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.inner.accessors.iter().map(|(name, _)| &**name)
    }

    pub(crate) fn accessor(&self, property: &str) -> Option<&Accessor> {
        let index = *self.inner.index.get(property)?;
        Some(&self.inner.accessors[index].1)
    }

    pub(crate) fn accessors(&self) -> impl Iterator<Item = (&Rc<str>, &Accessor)> {
        self.inner.accessors.iter().map(|(name, accessor)| (name, accessor))
    }

    pub(crate) fn data_initializers(&self) -> &[(Rc<str>, DefaultFn)] {
        &self.inner.data_init
    }

    pub(crate) fn computed_initializers(&self) -> &[(Rc<str>, BindingFactory)] {
        &self.inner.computed_init
    }
}

impl PartialEq for DefineType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for DefineType {}

impl fmt::Debug for DefineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefineType")
            .field("name", &self.inner.name)
            .field("properties", &self.property_names().collect::<Vec<_>>())
            .finish()
    }
}

/// Configures and builds a [`DefineType`].
#[derive(Debug)]
pub struct DefineTypeBuilder {
    name: Rc<str>,
    config: DefineConfig,
    registry: Rc<CoercionRegistry>,
}

impl DefineTypeBuilder {
    #[must_use]
    pub fn config(mut self, config: DefineConfig) -> Self {
        self.config = config;
        self
    }

    /// Coercions available to string `type` keys.
    #[must_use]
    pub fn registry(mut self, registry: CoercionRegistry) -> Self {
        self.registry = Rc::new(registry);
        self
    }

    /// Compile `schema` and synthesize the accessor table.
    ///
    /// # Errors
    ///
    /// Returns a [`DefineError`](crate::DefineError) for unknown coercion
    /// keys and malformed entries, including those of nested schemas.
    pub fn build(self, schema: RawSchema) -> Result<DefineType> {
        let normalized = Compiler::new(&self.registry, &self.config).compile(&self.name, &schema)?;
        Ok(DefineType::assemble(self.name, normalized, Rc::new(self.config)))
    }
}
