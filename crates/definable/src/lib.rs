#![forbid(unsafe_code)]

//! Declarative reactive properties.
//!
//! A [`DefineType`] is generated from a [`RawSchema`] that maps property
//! names to behavior descriptors. Each property gets an accessor pair that
//! combines storage, type coercion, computed derivation with dependency
//! tracking, and batched change notification.
//!
//! ```ignore
//! use definable::{DefineType, PropDef, RawSchema, Value};
//!
//! let paginate = DefineType::new(
//!     "Paginate",
//!     RawSchema::new()
//!         .prop("limit", PropDef::new().ty("number").value(100))
//!         .prop("offset", PropDef::new().ty("number").value(0))
//!         .prop(
//!             "page",
//!             PropDef::new()
//!                 .set(|p, page, _| {
//!                     let limit = p.get("limit").as_f64().unwrap_or(0.0);
//!                     let page = page.as_f64().unwrap_or(1.0);
//!                     p.set("offset", (page - 1.0) * limit).ok();
//!                     Value::Undefined
//!                 })
//!                 .get(|p, _| {
//!                     let offset = p.get("offset").as_f64().unwrap_or(0.0);
//!                     let limit = p.get("limit").as_f64().unwrap_or(1.0);
//!                     Value::from((offset / limit).floor() + 1.0)
//!                 }),
//!         ),
//! )?;
//!
//! let p = paginate.create();
//! p.on("page", |event, new, old| println!("{}: {old} -> {new}", event.property));
//! p.set("page", 3)?;
//! assert_eq!(p.get("offset"), Value::from(200));
//! ```
//!
//! # Architecture
//!
//! ```text
//!   RawSchema ─▶ Compiler ─▶ Definitions ─▶ accessor synthesis ─▶ DefineType
//!
//!   read  ─▶ storage (lazy default) ─▶ plain read + observe │ computation read
//!   write ─▶ coercion ─▶ setter protocol ─▶ storage ─▶ change notifier ─▶ batch
//! ```
//!
//! The reactive primitives (observation stack, batches, computations) live
//! in `definable-reactive`, re-exported as [`reactive`].
//!
//! # Invariants
//!
//! 1. Writing a property's current value stores nothing and emits nothing.
//! 2. A default runs at most once per instance and property, on first read.
//! 3. Every write made while a setter runs is delivered in the same flush.
//! 4. A computed property with no listeners neither recomputes eagerly nor
//!    emits.

pub use definable_reactive as reactive;
pub use definable_reactive::batch;

mod accessor;
pub mod coerce;
pub mod config;
pub mod constructor;
pub mod define;
pub mod error;
pub mod getter;
pub mod instance;
pub mod notify;
pub mod schema;
pub mod setter;
mod storage;
pub mod value;
mod watchdog;

pub use coerce::{CoercionRegistry, TypeFn};
pub use config::{DEFAULT_ASYNC_SETTER_TIMEOUT, DefineConfig};
pub use constructor::Constructor;
pub use define::{DefineType, DefineTypeBuilder};
pub use error::{DefineError, Result};
pub use getter::Getter;
pub use instance::Instance;
pub use notify::{ChangeEvent, ChangeKind};
pub use reactive::{BatchScope, ListenerKey, Resolver};
pub use schema::{
    ConstructorSpec, DefaultValue, Definition, Method, NormalizedSchema, PropDef, Producer,
    RawEntry, RawSchema, TypeSpec,
};
pub use setter::{SetResolver, Setter};
pub use value::{ListRef, ObjectMap, ObjectRef, Opaque, Value};
pub use watchdog::{pending_async_setters, poll_async_setter_warnings};
