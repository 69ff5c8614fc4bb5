//! Admission control for in-flight generations
//!
//! Capacity is a fixed number of slots backed by a semaphore. Acquisition never
//! queues: when every slot is taken the caller gets [`CoreError::Overloaded`]
//! immediately. A slot is returned when its [`AdmissionSlot`] is dropped, so
//! every exit path of a request (success, stop-sequence break, error, or the
//! consumer dropping a stream) releases exactly once.

use crate::{CoreError, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{trace, warn};

/// Bounds how many generations run concurrently
#[derive(Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take one slot, or fail with `Overloaded` when none is free.
    ///
    /// The check and the decrement are a single atomic operation on the
    /// semaphore, so two racing callers can never both take the last slot.
    pub fn acquire(&self) -> Result<AdmissionSlot> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                trace!(in_flight = self.in_flight(), capacity = self.capacity, "admission slot acquired");
                Ok(AdmissionSlot { permit })
            }
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                let in_flight = self.in_flight();
                warn!(in_flight, capacity = self.capacity, "admission rejected, all slots in use");
                Err(CoreError::overloaded(in_flight, self.capacity))
            }
        }
    }

    /// Number of slots currently held
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("in_flight", &self.in_flight())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// One occupied unit of concurrency capacity.
///
/// Owned by exactly one request. Releasing consumes the slot, so a second
/// release cannot be expressed.
#[must_use = "dropping the slot releases it immediately"]
#[derive(Debug)]
pub struct AdmissionSlot {
    permit: OwnedSemaphorePermit,
}

impl AdmissionSlot {
    /// Return the slot to its controller
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        trace!(permits = self.permit.num_permits(), "admission slot released");
    }
}
