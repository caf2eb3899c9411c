//! Single-slot auto-reset signal
//!
//! One thread waits, another sets. A successful wait consumes the signal.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct AutoResetEvent {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl AutoResetEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake one waiter
    pub fn set(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.cond.notify_one();
    }

    /// Clear a pending signal without waiting
    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }

    /// Block until set, then clear it
    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.cond.wait(&mut signalled);
        }
        *signalled = false;
    }

    /// Block until set or the timeout elapses. Returns whether the signal
    /// was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signalled = self.signalled.lock();
        if !*signalled {
            self.cond.wait_while_for(&mut signalled, |s| !*s, timeout);
        }
        std::mem::replace(&mut *signalled, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_before_wait() {
        let event = AutoResetEvent::new();
        event.set();
        assert!(event.wait_timeout(Duration::from_millis(10)));
        // consumed
        assert!(!event.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wakes_waiter() {
        let event = Arc::new(AutoResetEvent::new());
        let setter = event.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });

        event.wait();
        handle.join().unwrap();
    }

    #[test]
    fn test_reset_discards_pending() {
        let event = AutoResetEvent::new();
        event.set();
        event.reset();
        assert!(!event.wait_timeout(Duration::from_millis(10)));
    }
}
