//! Counting semaphore used to bound frames in flight.

use std::sync::{Condvar, Mutex, MutexGuard};

/// A counting semaphore whose count is clamped to `[0, max]`.
///
/// The producer acquires a permit before queuing a frame; the consumer
/// releases one after fully replaying that frame. Releasing while already at
/// `max` is a no-op rather than an error, mirroring the fact that a frame can
/// only ever be completed once.
pub struct Semaphore {
    max: u32,
    count: Mutex<u32>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with all `max` permits available.
    pub fn new(max: u32) -> Self {
        Self {
            max,
            count: Mutex::new(max),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, u32> {
        match self.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut count = self.lock();
        while *count == 0 {
            count = match self.available.wait(count) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *count -= 1;
    }

    /// Takes a permit if one is available without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut count = self.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Returns a permit, waking one waiter. Clamped at `max`.
    pub fn release(&self) {
        let mut count = self.lock();
        *count = (*count + 1).min(self.max);
        self.available.notify_one();
    }

    /// Permits currently available.
    pub fn permits(&self) -> u32 {
        *self.lock()
    }

    pub fn max_permits(&self) -> u32 {
        self.max
    }
}
