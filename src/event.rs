//! A `threading.Event`-style flag with a monitor, in the same shape as the
//! `Mutex` + `Condvar` pairing `solver::barrier` uses for its work queue.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A one-shot, idempotent, clonable flag. Setting it wakes every thread
/// parked in [`Event::wait`] or [`Event::wait_timeout`].
#[derive(Clone)]
pub struct Event {
    inner: Arc<Inner>,
}

struct Inner {
    set: Mutex<bool>,
    monitor: Condvar,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    pub fn new() -> Self {
        Event {
            inner: Arc::new(Inner {
                set: Mutex::new(false),
                monitor: Condvar::new(),
            }),
        }
    }

    /// Sets the flag. Idempotent: setting an already-set event is a no-op
    /// beyond waking any stragglers.
    pub fn set(&self) {
        let mut set = self.inner.set.lock();
        *set = true;
        self.inner.monitor.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.inner.set.lock()
    }

    /// Blocks until the event is set.
    pub fn wait(&self) {
        let mut set = self.inner.set.lock();
        self.inner.monitor.wait_while(&mut set, |set| !*set);
    }

    /// Blocks until the event is set or `timeout` elapses. Returns whether
    /// the event was observed set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut set = self.inner.set.lock();
        if *set {
            return true;
        }
        self.inner.monitor.wait_for(&mut set, timeout);
        *set
    }
}

/// Shutdown signal shared by every long-lived task in the driver: the
/// discovery loop, every supervisor thread, and the activation waiter.
pub type ShutdownEvent = Event;

/// Per-host signal a worker consults to notice its own host being evicted.
pub type HostEvent = Event;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_unblocks_after_set() {
        let event = Event::new();
        let waiter = event.clone();
        let handle = thread::spawn(move || {
            waiter.wait();
        });
        thread::sleep(Duration::from_millis(20));
        event.set();
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_reports_false_when_unset() {
        let event = Event::new();
        assert!(!event.wait_timeout(Duration::from_millis(10)));
        event.set();
        assert!(event.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn set_is_idempotent() {
        let event = Event::new();
        event.set();
        event.set();
        assert!(event.is_set());
    }
}
