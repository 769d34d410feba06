#![forbid(unsafe_code)]

//! Reactive plumbing for `definable`.
//!
//! This crate provides the change-tracking primitives that generated
//! property accessors are built on:
//!
//! - [`observe`]: the ambient "currently running computation" stack. Reads
//!   call [`observe::observe`] and whichever computation is tracking records
//!   the dependency.
//! - [`batch`]: nestable transactions. Notifications queued inside a batch
//!   are delivered when the outermost scope closes.
//! - [`Emitter`]: named-event listener registry with stable [`ListenerKey`]s.
//! - [`Compute`]: a memoized, dependency-tracked value that only binds to its
//!   dependencies while something listens to it.
//!
//! # Architecture
//!
//! Everything is single-threaded and built on `Rc<RefCell<..>>`. Dependency
//! edges hold `Weak` references to their sources, so a computation never
//! keeps the objects it reads alive.
//!
//! # Invariants
//!
//! 1. Listeners only run at batch flush, never in the middle of a write.
//! 2. A computation whose dependencies change several times within one batch
//!    recomputes once, after every queued event of that batch was delivered,
//!    unless it is read earlier. A read of a listened-to computation
//!    re-evaluates it on the spot if an input moved, so it is never stale.
//! 3. A computation with no listeners holds no subscriptions.
//! 4. Setting a value equal to the current value emits nothing.

pub mod batch;
pub mod compute;
pub mod emitter;
pub mod observe;

pub use batch::BatchScope;
pub use compute::{Change, Compute, Resolver};
pub use emitter::{Emitter, ListenerKey};
pub use observe::{Dependency, Source};
