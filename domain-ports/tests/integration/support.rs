//! Helpers shared by the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use domain_ports::{DispatchPolicy, Diagnostics, Domain, SyncPolicy};

static INSTALL: Once = Once::new();
static WARNINGS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static ERRORS: Mutex<Vec<String>> = Mutex::new(Vec::new());

struct Recorder;

impl Diagnostics for Recorder {
    fn warning(&self, message: &str) {
        WARNINGS.lock().unwrap().push(message.to_owned());
    }
    fn error(&self, message: &str) {
        ERRORS.lock().unwrap().push(message.to_owned());
    }
}

/// Installs a diagnostics sink recording every report.
pub(crate) fn install_recorder() {
    INSTALL.call_once(|| domain_ports::set_diagnostics(Recorder));
}

pub(crate) fn warnings_containing(pattern: &str) -> usize {
    WARNINGS
        .lock()
        .unwrap()
        .iter()
        .filter(|w| w.contains(pattern))
        .count()
}

/// A parallel domain with a short idle lifetime.
pub(crate) fn parallel(name: &str, sync: SyncPolicy, max_pool_size: usize) -> Domain {
    Domain::builder(name)
        .dispatch(DispatchPolicy::Parallel)
        .sync(sync)
        .max_pool_size(max_pool_size)
        .idle_lifetime(Duration::from_secs(2))
        .build()
        .unwrap()
}

/// Name of the current thread.
pub(crate) fn thread_name() -> String {
    thread::current().name().unwrap_or_default().to_owned()
}

pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }

    condition()
}

/// Tracks the highest number of threads simultaneously inside a section.
#[derive(Default)]
pub(crate) struct ConcurrencyProbe {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    /// Runs `f` inside the section.
    pub(crate) fn section<R>(&self, f: impl FnOnce() -> R) -> R {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let result = f();
        self.active.fetch_sub(1, Ordering::SeqCst);

        result
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}
