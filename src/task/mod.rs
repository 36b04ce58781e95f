//! # Task Vocabulary
//!
//! A [`Task`] is one pending backend operation: what to do ([`TaskKind`]),
//! where ([`Location`]) and on behalf of which hierarchy node. The flush
//! scheduler fills a [`TaskQueue`] between flush cycles and hands it to the
//! backend as one batch.
//!
//! Read-type tasks carry a [`Slot`] that the backend fills with its answer.
//! Metadata queries (listings, attribute reads, dataset inspection) are
//! answered within `execute`; chunk reads may be deferred until the
//! backend's `flush`.

mod kind;
mod queue;

pub use kind::{Location, StepMode, Task, TaskKind};
pub use queue::TaskQueue;

use std::sync::{Arc, Mutex, PoisonError};

/// Shared output cell filled by a backend
pub type Slot<T> = Arc<Mutex<Option<T>>>;

/// Create an empty output slot
pub fn new_slot<T>() -> Slot<T> {
    Arc::new(Mutex::new(None))
}

/// Store a backend answer in a slot
pub fn fill_slot<T>(slot: &Slot<T>, value: T) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
}

/// Take the answer out of a slot, leaving it empty
pub fn take_slot<T>(slot: &Slot<T>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Whether a slot has been filled
pub fn slot_is_filled<T>(slot: &Slot<T>) -> bool {
    slot.lock().unwrap_or_else(PoisonError::into_inner).is_some()
}
