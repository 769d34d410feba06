#![forbid(unsafe_code)]

//! Development watchdog for asynchronous setters that never complete.
//!
//! An [`AsyncCompletion`](crate::Setter::AsyncCompletion) setter that neither
//! resolved synchronously nor returned a value is registered here with a
//! deadline. Polling reports every registration whose deadline passed
//! without a resolve as a `tracing` warning. The warning is advisory: the
//! property simply keeps its previous value.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use web_time::Instant;

struct PendingSetter {
    property: Rc<str>,
    type_name: Rc<str>,
    deadline: Instant,
    completed: Rc<Cell<bool>>,
}

thread_local! {
    static PENDING: RefCell<Vec<PendingSetter>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn arm(property: Rc<str>, type_name: Rc<str>, timeout: Duration, completed: Rc<Cell<bool>>) {
    let deadline = Instant::now() + timeout;
    PENDING.with(|pending| {
        pending.borrow_mut().push(PendingSetter {
            property,
            type_name,
            deadline,
            completed,
        });
    });
}

/// Warn about asynchronous setters past their deadline.
///
/// Completed setters are forgotten; expired ones are warned about once and
/// forgotten. Returns the number of warnings emitted.
pub fn poll_async_setter_warnings() -> usize {
    let now = Instant::now();
    let expired: Vec<PendingSetter> = PENDING.with(|pending| {
        let mut pending = pending.borrow_mut();
        pending.retain(|p| !p.completed.get());
        let (expired, waiting) = std::mem::take(&mut *pending)
            .into_iter()
            .partition(|p| p.deadline <= now);
        *pending = waiting;
        expired
    });
    for setter in &expired {
        tracing::warn!(
            property = &*setter.property,
            type_name = &*setter.type_name,
            "setter did not return a value or call its resolver"
        );
    }
    expired.len()
}

/// Number of asynchronous setters still waiting for completion.
#[must_use]
pub fn pending_async_setters() -> usize {
    PENDING.with(|pending| pending.borrow().iter().filter(|p| !p.completed.get()).count())
}
