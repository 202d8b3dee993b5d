//! Invocation slots — bounds how many invocations run at once.
//!
//! Contexts are never reused, so unlike an instance pool there is nothing
//! to keep warm or recycle: a slot is just a permit to create one.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

pub const DEFAULT_MAX_CONCURRENT: u32 = 64;

/// Host-wide cap on simultaneously running invocations.
#[derive(Debug, Clone)]
pub struct InvocationSlots {
    permits: Arc<Semaphore>,
    max: u32,
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl InvocationSlots {
    /// Allow up to `max` concurrent invocations (at least one).
    pub fn new(max: u32) -> Self {
        let max = max.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max as usize)),
            max,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Slot {
        // The semaphore is never closed, so acquisition only waits.
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("invocation semaphore closed"),
        };
        Slot { _permit: permit }
    }

    /// Take a free slot, or `None` if all are in use.
    pub fn try_acquire(&self) -> Option<Slot> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Some(Slot { _permit: permit }),
            Err(_) => {
                debug!(max = self.max, "all invocation slots in use");
                None
            }
        }
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

impl Default for InvocationSlots {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}
