//! Bounded-memory request admission
//!
//! A single counting semaphore per shard caps the summed memory estimates of
//! all in-flight requests at `max_request_memory`. A request acquires its
//! estimate before its header is read and the permit travels with the
//! response, releasing exactly when the response has been written (or the
//! request failed terminally).

use crate::config::AdmissionConfig;
use crate::error::{Result, TidelogError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Shard-wide request memory budget
pub struct MemoryAdmission {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    config: AdmissionConfig,
    waiters: AtomicUsize,
}

/// An admitted request's memory reservation
///
/// Dropping the reservation returns its units to the shard budget.
#[derive(Debug)]
pub struct MemoryReservation {
    _permit: OwnedSemaphorePermit,
    units: usize,
}

impl MemoryReservation {
    /// Units reserved, in bytes
    pub fn units(&self) -> usize {
        self.units
    }
}

impl MemoryAdmission {
    /// Create an admission gate with the given capacity in bytes
    pub fn new(capacity: usize, config: AdmissionConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            config,
            waiters: AtomicUsize::new(0),
        }
    }

    /// The configured capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Memory estimate for a request of the given wire size
    pub fn estimate(&self, size: usize) -> usize {
        self.config.estimate(size)
    }

    /// Whether a request of the given wire size can ever be admitted
    pub fn admissible(&self, size: usize) -> bool {
        self.estimate(size) < self.capacity
    }

    /// Currently available budget in bytes
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of acquisitions currently waiting for budget
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }

    /// Reserve memory for a request of the given wire size
    ///
    /// Suspends until the estimate fits in the remaining budget. A request
    /// whose estimate meets or exceeds the whole capacity is rejected
    /// outright (it could never be admitted). Returns `ShuttingDown` once
    /// the gate has been closed.
    pub async fn acquire(&self, size: usize) -> Result<MemoryReservation> {
        let units = self.estimate(size);
        if units >= self.capacity {
            return Err(TidelogError::RequestTooLarge {
                size,
                estimate: units,
                allowed: self.capacity,
            });
        }

        let had_to_wait = self.semaphore.available_permits() < units;
        if had_to_wait {
            self.waiters.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_awaiting_memory();
        }

        let result = self
            .semaphore
            .clone()
            .acquire_many_owned(units as u32)
            .await;

        if had_to_wait {
            self.waiters.fetch_sub(1, Ordering::Relaxed);
        }

        let permit = result.map_err(|_| TidelogError::ShuttingDown)?;
        Ok(MemoryReservation {
            _permit: permit,
            units,
        })
    }

    /// Close the gate, waking all waiters with a cancellation outcome
    ///
    /// Subsequent `acquire` calls return `ShuttingDown`. Reservations
    /// already granted remain valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
