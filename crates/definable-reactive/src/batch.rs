#![forbid(unsafe_code)]

//! Nestable transactions that defer notification delivery.
//!
//! # Design
//!
//! A thread-local counter tracks how many batches are open. Work queued with
//! [`enqueue`] while a batch is open waits until the outermost batch closes.
//! Outside any batch, [`enqueue`] opens a batch around the job and closes it
//! again, so the job runs immediately but anything it queues still lands in
//! one flush.
//!
//! There are two queues:
//!
//! - **events**: listener deliveries, run in FIFO order.
//! - **updates**: recomputations keyed by an id and a graph depth. Queuing
//!   the same id twice keeps the first entry.
//!
//! The flush loop drains every event, then runs the shallowest pending
//! update, then drains events again, until both queues are empty. A derived
//! value therefore recomputes once per batch, after every write that
//! invalidated it was delivered.
//!
//! # Invariants
//!
//! 1. No job runs while a batch is open.
//! 2. Jobs queued during a flush run in the same flush.
//! 3. An update id is pending at most once.
//!
//! # Failure Modes
//!
//! - **Panic in a job or inside a [`BatchScope`]**: the batch is aborted.
//!   Pending work is discarded and the depth returns to zero, so later
//!   batches start from a clean state.

use std::cell::RefCell;
use std::collections::VecDeque;

type Job = Box<dyn FnOnce()>;

struct Update {
    id: u64,
    depth: u32,
    job: Job,
}

#[derive(Default)]
struct BatchState {
    depth: u32,
    flushing: bool,
    events: VecDeque<Job>,
    updates: Vec<Update>,
}

thread_local! {
    static STATE: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Open a batch. Must be paired with [`stop`]; prefer [`BatchScope`].
pub fn start() {
    STATE.with(|s| s.borrow_mut().depth += 1);
}

/// Close a batch. Closing the outermost batch flushes queued work.
pub fn stop() {
    let should_flush = STATE.with(|s| {
        let mut s = s.borrow_mut();
        s.depth = s.depth.saturating_sub(1);
        s.depth == 0 && !s.flushing
    });
    if should_flush {
        flush();
    }
}

/// Number of currently open batches.
#[must_use]
pub fn depth() -> u32 {
    STATE.with(|s| s.borrow().depth)
}

/// Whether a batch is open or a flush is running.
#[must_use]
pub fn is_active() -> bool {
    STATE.with(|s| {
        let s = s.borrow();
        s.depth > 0 || s.flushing
    })
}

/// Run `f` inside a batch.
pub fn run<R>(f: impl FnOnce() -> R) -> R {
    let _scope = BatchScope::new();
    f()
}

/// Queue a notification. Runs immediately when no batch is open.
pub fn enqueue(job: impl FnOnce() + 'static) {
    let idle = STATE.with(|s| {
        let mut s = s.borrow_mut();
        s.events.push_back(Box::new(job));
        s.depth == 0 && !s.flushing
    });
    if idle {
        flush();
    }
}

/// Queue a recomputation identified by `id`.
///
/// If `id` is already pending this call does nothing. Pending updates run
/// shallowest `depth` first, each after all queued events were delivered.
pub fn schedule_update(id: u64, depth: u32, job: impl FnOnce() + 'static) {
    let idle = STATE.with(|s| {
        let mut s = s.borrow_mut();
        if !s.updates.iter().any(|u| u.id == id) {
            s.updates.push(Update {
                id,
                depth,
                job: Box::new(job),
            });
        }
        s.depth == 0 && !s.flushing
    });
    if idle {
        flush();
    }
}

/// Whether an update with `id` is waiting to run.
#[must_use]
pub fn is_update_pending(id: u64) -> bool {
    STATE.with(|s| s.borrow().updates.iter().any(|u| u.id == id))
}

/// Drop all queued work and close every open batch.
pub fn abort() {
    let (events, updates) = STATE.with(|s| {
        let mut s = s.borrow_mut();
        s.depth = 0;
        s.flushing = false;
        (
            std::mem::take(&mut s.events),
            std::mem::take(&mut s.updates),
        )
    });
    if !events.is_empty() || !updates.is_empty() {
        tracing::debug!(
            events = events.len(),
            updates = updates.len(),
            "batch aborted, queued work discarded"
        );
    }
    // Dropped outside the borrow: a job's captures may touch the batch state.
    drop(events);
    drop(updates);
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            abort();
        } else {
            STATE.with(|s| s.borrow_mut().flushing = false);
        }
    }
}

fn next_job() -> Option<Job> {
    STATE.with(|s| {
        let mut s = s.borrow_mut();
        if let Some(event) = s.events.pop_front() {
            return Some(event);
        }
        let index = s
            .updates
            .iter()
            .enumerate()
            .min_by_key(|(i, u)| (u.depth, *i))
            .map(|(i, _)| i)?;
        Some(s.updates.remove(index).job)
    })
}

fn flush() {
    STATE.with(|s| s.borrow_mut().flushing = true);
    let _guard = FlushGuard;
    let mut ran = 0usize;
    while let Some(job) = next_job() {
        job();
        ran += 1;
    }
    tracing::trace!(jobs = ran, "batch flushed");
}

/// RAII batch: opens on creation, closes (and possibly flushes) on drop.
///
/// Dropping during a panic aborts the batch instead of flushing it.
#[must_use = "the batch closes as soon as the scope is dropped"]
pub struct BatchScope {
    _private: (),
}

impl BatchScope {
    /// Open a batch.
    pub fn new() -> Self {
        start();
        Self { _private: () }
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("depth", &depth())
            .finish()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        if std::thread::panicking() {
            abort();
        } else {
            stop();
        }
    }
}
