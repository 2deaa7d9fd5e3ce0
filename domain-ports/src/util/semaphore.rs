use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A counting semaphore with timed acquisition.
///
/// Workers of an executor wait on it for queued tasks: every submission
/// releases one permit and every claimed task consumes one.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with no permit available.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes `n` more permits available.
    pub(crate) fn release(&self, n: usize) {
        let mut permits = self.permits.lock().unwrap();
        *permits += n;
        if n == 1 {
            self.cond.notify_one();
        } else {
            self.cond.notify_all();
        }
    }

    /// Takes one permit, waiting at most `timeout` for one to become
    /// available.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub(crate) fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock().unwrap();

        while *permits == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            permits = self.cond.wait_timeout(permits, deadline - now).unwrap().0;
        }
        *permits -= 1;

        true
    }

    /// Number of permits currently available.
    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        *self.permits.lock().unwrap()
    }
}
