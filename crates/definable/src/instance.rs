#![forbid(unsafe_code)]

//! Instances of generated types.
//!
//! # Design
//!
//! An [`Instance`] is a shared handle to per-instance state: the two lazily
//! created storage namespaces, the property listener registry, and plain
//! own values for names the schema does not declare. Property access goes
//! through the type's accessor table.
//!
//! Listening to a computed property retains its binding, which binds the
//! underlying computation; removing the last such listener releases it.
//! The instance is also a dependency [`Source`]: a computation that reads a
//! data property subscribes to that property's events here. Each property
//! carries a version that moves when its change is queued, ahead of
//! delivery, so a computation read mid-batch can tell it is out of date.
//!
//! # Invariants
//!
//! 1. Both storage namespaces are created at most once per instance.
//! 2. A computed binding's refcount equals the number of listeners
//!    registered on its property through this instance.
//! 3. A sealed instance never gains a new undeclared property.
//!
//! # Failure Modes
//!
//! - **Setting an undeclared property on a sealed instance**:
//!   [`DefineError::Sealed`]; nothing is stored.
//! - **Calling an unknown method**: [`DefineError::UnknownMethod`].

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::accessor::StorageMode;
use crate::define::DefineType;
use crate::error::{DefineError, Result};
use crate::getter::ComputedBinding;
use crate::notify::ChangeEvent;
use crate::reactive::{batch, Emitter, ListenerKey, Source};
use crate::storage::{ComputedStore, DataStore};
use crate::value::{ObjectMap, Value};
use crate::watchdog;

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}

fn next_id() -> u64 {
    NEXT_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

/// What property listeners are dispatched with.
pub(crate) struct Dispatch {
    event: ChangeEvent,
    new: Value,
    old: Value,
}

type Handler = Rc<dyn Fn(&Dispatch)>;

pub(crate) struct InstanceInner {
    id: u64,
    ty: DefineType,
    data: OnceCell<DataStore>,
    computed: OnceCell<ComputedStore>,
    events: Emitter<Dispatch>,
    versions: RefCell<AHashMap<Rc<str>, u64>>,
    expandos: RefCell<ObjectMap>,
    sealed: Cell<bool>,
    weak_self: Weak<InstanceInner>,
}

/// An instance of a [`DefineType`].
///
/// Cloning creates a new handle to the **same** instance.
#[derive(Clone)]
pub struct Instance {
    inner: Rc<InstanceInner>,
}

impl Instance {
    pub(crate) fn new(ty: DefineType) -> Self {
        let inner = Rc::new_cyclic(|weak_self| InstanceInner {
            id: next_id(),
            ty,
            data: OnceCell::new(),
            computed: OnceCell::new(),
            events: Emitter::new(),
            versions: RefCell::new(AHashMap::new()),
            expandos: RefCell::new(ObjectMap::new()),
            sealed: Cell::new(false),
            weak_self: weak_self.clone(),
        });
        Self { inner }
    }

    pub(crate) fn upgrade(weak: &Weak<InstanceInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<InstanceInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn as_source(&self) -> Weak<dyn Source> {
        let weak: Weak<InstanceInner> = self.downgrade();
        weak
    }

    pub(crate) fn data(&self) -> &DataStore {
        self.inner
            .data
            .get_or_init(|| DataStore::new(self.inner.ty.data_initializers()))
    }

    pub(crate) fn computed(&self) -> &ComputedStore {
        self.inner
            .computed
            .get_or_init(|| ComputedStore::new(self.inner.ty.computed_initializers()))
    }

    pub(crate) fn dispatch(&self, event: ChangeEvent, new: Value, old: Value) {
        let property = Rc::clone(&event.property);
        self.inner
            .events
            .dispatch(&property, &Dispatch { event, new, old });
    }

    /// Mark `property` as changed for computations that read it.
    pub(crate) fn bump_version(&self, property: &Rc<str>) {
        *self
            .inner
            .versions
            .borrow_mut()
            .entry(Rc::clone(property))
            .or_insert(0) += 1;
    }

    pub(crate) fn seal(&self) {
        self.inner.sealed.set(true);
    }

    /// Store without the sealing check.
    pub(crate) fn assign(&self, name: &str, value: Value) {
        match self.inner.ty.accessor(name) {
            Some(accessor) => (accessor.set)(self, value),
            None => {
                self.inner.expandos.borrow_mut().insert(name, value);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    /// Read a property, recording a dependency if a computation is running.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        match self.inner.ty.accessor(name) {
            Some(accessor) => (accessor.get)(self),
            None => self.expando(name),
        }
    }

    /// Read a property without recording a dependency.
    #[must_use]
    pub fn peek(&self, name: &str) -> Value {
        match self.inner.ty.accessor(name) {
            Some(accessor) => (accessor.peek)(self),
            None => self.expando(name),
        }
    }

    fn expando(&self, name: &str) -> Value {
        self.inner
            .expandos
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Write a property.
    ///
    /// Outside a batch, overdue asynchronous setters are reported afterwards.
    ///
    /// # Errors
    ///
    /// [`DefineError::Sealed`] when `name` is neither declared nor already
    /// present on a sealed instance.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.inner.sealed.get()
            && self.inner.ty.accessor(name).is_none()
            && !self.inner.expandos.borrow().contains_key(name)
        {
            return Err(DefineError::Sealed {
                property: name.to_string(),
                type_name: self.type_name().to_string(),
            });
        }
        self.assign(name, value.into());
        if !batch::is_active() {
            watchdog::poll_async_setter_warnings();
        }
        Ok(())
    }

    /// Call a schema method.
    ///
    /// # Errors
    ///
    /// [`DefineError::UnknownMethod`] if the schema declares no such method.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let method = self
            .inner
            .ty
            .normalized()
            .method(name)
            .cloned()
            .ok_or_else(|| DefineError::UnknownMethod {
                name: name.to_string(),
                type_name: self.type_name().to_string(),
            })?;
        Ok(method(self, args))
    }

    /// Enumerable properties and own values, as an object.
    #[must_use]
    pub fn props(&self) -> Value {
        let mut map = ObjectMap::new();
        for (name, accessor) in self.inner.ty.accessors() {
            if accessor.enumerable {
                map.insert(Rc::clone(name), (accessor.get)(self));
            }
        }
        for (name, value) in self.inner.expandos.borrow().iter() {
            map.insert(Rc::clone(name), value.clone());
        }
        Value::from(map)
    }

    /// Names [`Instance::props`] would list, without reading them.
    #[must_use]
    pub fn keys(&self) -> Vec<Rc<str>> {
        let declared = self
            .inner
            .ty
            .accessors()
            .filter(|(_, accessor)| accessor.enumerable)
            .map(|(name, _)| Rc::clone(name));
        let own: Vec<Rc<str>> = self.inner.expandos.borrow().keys().cloned().collect();
        declared.chain(own).collect()
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        self.inner.ty.name()
    }

    #[must_use]
    pub fn define_type(&self) -> &DefineType {
        &self.inner.ty
    }

    #[must_use]
    pub fn is_instance_of(&self, ty: &DefineType) -> bool {
        self.inner.ty == *ty
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.get()
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Listen for changes of `property`. Listening to a computed property
    /// activates it.
    pub fn on(
        &self,
        property: &str,
        listener: impl Fn(&ChangeEvent, &Value, &Value) + 'static,
    ) -> ListenerKey {
        self.listen(
            property,
            Rc::new(move |d: &Dispatch| listener(&d.event, &d.new, &d.old)),
        )
    }

    /// Remove a listener added with [`Instance::on`]. Returns `false` if it
    /// was not registered.
    pub fn off(&self, property: &str, key: ListenerKey) -> bool {
        let removed = self.inner.events.off(property, key);
        if removed {
            if let Some(binding) = self.existing_binding(property) {
                binding.release();
            }
        }
        removed
    }

    pub fn add_event_listener(
        &self,
        property: &str,
        listener: impl Fn(&ChangeEvent, &Value, &Value) + 'static,
    ) -> ListenerKey {
        self.on(property, listener)
    }

    pub fn remove_event_listener(&self, property: &str, key: ListenerKey) -> bool {
        self.off(property, key)
    }

    pub fn bind(
        &self,
        property: &str,
        listener: impl Fn(&ChangeEvent, &Value, &Value) + 'static,
    ) -> ListenerKey {
        self.on(property, listener)
    }

    pub fn unbind(&self, property: &str, key: ListenerKey) -> bool {
        self.off(property, key)
    }

    /// Number of listeners on `property`.
    #[must_use]
    pub fn listener_count(&self, property: &str) -> usize {
        self.inner.events.listener_count(property)
    }

    fn listen(&self, property: &str, handler: Handler) -> ListenerKey {
        if let Some(binding) = self.binding(property) {
            binding.retain();
        }
        self.inner.events.on_rc(property, handler)
    }

    fn binding(&self, property: &str) -> Option<Rc<ComputedBinding>> {
        match self.inner.ty.accessor(property) {
            Some(accessor) if accessor.mode == StorageMode::Computed => {
                self.computed().binding(self, property)
            }
            _ => None,
        }
    }

    fn existing_binding(&self, property: &str) -> Option<Rc<ComputedBinding>> {
        self.inner.computed.get()?.existing(property)
    }
}

impl Source for InstanceInner {
    fn subscribe(&self, key: &str, callback: Rc<dyn Fn()>) -> ListenerKey {
        let handler: Handler = Rc::new(move |_: &Dispatch| callback());
        match Instance::upgrade(&self.weak_self) {
            Some(instance) => instance.listen(key, handler),
            None => self.events.on_rc(key, handler),
        }
    }

    fn unsubscribe(&self, key: &str, listener: ListenerKey) {
        match Instance::upgrade(&self.weak_self) {
            Some(instance) => {
                instance.off(key, listener);
            }
            None => {
                self.events.off(key, listener);
            }
        }
    }

    fn depth(&self, key: &str) -> u32 {
        self.computed
            .get()
            .and_then(|store| store.existing(key))
            .map_or(0, |binding| binding.compute().depth())
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.borrow().get(key).copied().unwrap_or(0)
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Instance {}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.type_name())
            .field("id", &self.inner.id)
            .finish()
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Instance {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let props = crate::reactive::observe::untracked(|| self.props());
        serde::Serialize::serialize(&props, serializer)
    }
}
