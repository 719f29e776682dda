//! Admission control for in-flight generation jobs.
//!
//! [`AdmissionController`] tracks how many jobs are currently admitted and
//! refuses new ones once a fixed capacity is reached. Admission never waits:
//! a full broker rejects immediately and the caller is expected to retry.
//!
//! The check and the increment are a single compare-and-swap, so concurrent
//! callers can never push the count past capacity. Each successful admission
//! yields an [`AdmissionPermit`]; dropping the permit releases the slot, which
//! ties the release to every exit path of the request (success, error, panic,
//! or the handler future being dropped when the client disconnects).

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

#[derive(Debug)]
struct Slots {
    in_flight: AtomicUsize,
    capacity: usize,
}

/// Shared admission state. Cloning yields a handle to the same counter.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    slots: Arc<Slots>,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Slots {
                in_flight: AtomicUsize::new(0),
                capacity,
            }),
        }
    }

    /// Attempts to take one slot.
    ///
    /// Returns `None`, leaving the state untouched, when all slots are taken.
    pub fn try_admit(&self) -> Option<AdmissionPermit> {
        let slots = &self.slots;
        let mut current = slots.in_flight.load(Ordering::Acquire);
        loop {
            if current >= slots.capacity {
                return None;
            }
            match slots.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(AdmissionPermit {
                        slots: Arc::clone(slots),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.slots.in_flight.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity
    }

    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.in_flight())
    }
}

/// One admitted job. The slot is released exactly once, when this is dropped.
#[derive(Debug)]
#[must_use = "dropping the permit releases the admission slot immediately"]
pub struct AdmissionPermit {
    slots: Arc<Slots>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let previous = self.slots.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "admission counter underflow");
    }
}
