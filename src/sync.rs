/*!
 * Counting wake signal
 *
 * Semaphore built on a mutex/condvar pair. Posts increment the count and
 * are never lost; waits block until the count is nonzero and decrement it.
 */

use parking_lot::{Condvar, Mutex};

/// Counting semaphore used to wake the dispatch and encode threads.
///
/// One post corresponds to exactly one unit of queued work. Threads suspend
/// only here, once per loop iteration.
pub(crate) struct Semaphore {
    count: Mutex<u64>,
    cvar: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cvar: Condvar::new(),
        }
    }

    /// Increment the count and wake one blocked waiter.
    pub fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cvar.notify_one();
    }

    /// Block until the count is nonzero, then decrement it.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cvar.wait(&mut count);
        }
        *count -= 1;
    }
}
