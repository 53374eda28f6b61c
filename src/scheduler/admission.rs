//! Admission control: the bounded queue in front of the worker pool.
//!
//! Capacity is counted in pages. A job takes one slot per page when it is
//! admitted; slots come back one at a time as its pages reach a terminal
//! state, and all at once when the job ends. Slots are taken with
//! `acquire_many` and immediately forgotten, then handed back with
//! `add_permits`, because they outlive any single task.

use crate::config::AdmissionMode;
use crate::error::OcrError;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::debug;

#[derive(Debug)]
pub struct Admission {
    semaphore: Semaphore,
    capacity: usize,
    mode: AdmissionMode,
    timeout: Duration,
}

impl Admission {
    pub fn new(capacity: usize, mode: AdmissionMode, timeout: Duration) -> Self {
        let capacity = capacity.min(Semaphore::MAX_PERMITS);
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
            mode,
            timeout,
        }
    }

    /// Take `pages` slots, or fail with `ResourceExhausted`.
    ///
    /// In `reject` mode this never waits. In `wait` mode it waits up to the
    /// admission timeout. A request larger than the whole capacity can never
    /// succeed and is rejected immediately in either mode.
    pub async fn acquire(&self, pages: usize) -> Result<(), OcrError> {
        let exhausted = || OcrError::ResourceExhausted {
            requested: pages,
            available: self.available(),
            capacity: self.capacity,
        };
        if pages > self.capacity {
            return Err(exhausted());
        }
        let n = u32::try_from(pages).map_err(|_| exhausted())?;

        let permit = match self.mode {
            AdmissionMode::Reject => match self.semaphore.try_acquire_many(n) {
                Ok(permit) => permit,
                Err(TryAcquireError::Closed) => return Err(OcrError::ShuttingDown),
                Err(TryAcquireError::NoPermits) => return Err(exhausted()),
            },
            AdmissionMode::Wait => {
                match tokio::time::timeout(self.timeout, self.semaphore.acquire_many(n)).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(OcrError::ShuttingDown),
                    Err(_) => return Err(exhausted()),
                }
            }
        };
        permit.forget();
        debug!(pages, available = self.available(), "Admitted");
        Ok(())
    }

    pub fn release(&self, pages: usize) {
        if pages > 0 {
            self.semaphore.add_permits(pages);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Fail every pending and future `acquire` with `ShuttingDown`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
