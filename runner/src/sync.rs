use parking_lot::{Condvar, FairMutex, FairMutexGuard, Mutex};
use tracing::trace;

/// Lock serializing discovery, copy-in and move-out in shared working directories
///
/// Only held for filesystem metadata work, never while a solver runs.
#[derive(Debug, Default)]
pub struct DirectoryLock(FairMutex<()>);

impl DirectoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> FairMutexGuard<'_, ()> {
        self.0.lock()
    }
}

/// Counting semaphore bounding the number of running solver processes
#[derive(Debug)]
pub struct Semaphore {
    available: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

/// Permit of a `Semaphore`, returned on drop
#[derive(Debug)]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            available: Mutex::new(capacity),
            released: Condvar::new(),
            capacity,
        }
    }

    /// number of permits currently handed out
    pub fn in_use(&self) -> usize {
        self.capacity - *self.available.lock()
    }

    /// block until a permit is available
    pub fn acquire(&self) -> SemaphorePermit<'_> {
        let mut available = self.available.lock();

        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;

        trace!(available = *available, "Acquired permit");

        SemaphorePermit { semaphore: self }
    }

    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        let mut available = self.available.lock();

        if *available == 0 {
            None
        } else {
            *available -= 1;

            Some(SemaphorePermit { semaphore: self })
        }
    }

    fn release(&self) {
        *self.available.lock() += 1;
        self.released.notify_one();
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
