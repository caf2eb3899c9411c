//! Log throttling utility
//!
//! Limits how often the same message is logged so that a per-frame failure
//! on a 60 fps stream does not flood the log.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Log throttler that limits how often the same message is logged
///
/// # Example
///
/// ```rust
/// use decklink_bridge::utils::LogThrottler;
///
/// let throttler = LogThrottler::with_secs(5);
///
/// assert!(throttler.should_log("schedule_failed"));
/// assert!(!throttler.should_log("schedule_failed"));
/// ```
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    /// Create a new log throttler with the specified interval
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Create a new log throttler with interval specified in seconds
    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Check if a message should be logged (not throttled)
    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Like [`should_log`](Self::should_log), but when the message may be
    /// logged returns how many occurrences were suppressed since the last one.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last_logged = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget a key, so the next occurrence is logged immediately
    ///
    /// Call when the error condition has recovered.
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Get the number of tracked keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the throttler is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_should_log_first_call() {
        let throttler = LogThrottler::with_secs(1);
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn test_throttling() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert!(throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));

        thread::sleep(Duration::from_millis(150));

        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn test_suppressed_count() {
        let throttler = LogThrottler::new(Duration::from_millis(50));

        assert_eq!(throttler.check("drop"), Some(0));
        assert_eq!(throttler.check("drop"), None);
        assert_eq!(throttler.check("drop"), None);

        thread::sleep(Duration::from_millis(80));

        assert_eq!(throttler.check("drop"), Some(2));
        assert_eq!(throttler.check("drop"), None);
    }

    #[test]
    fn test_different_keys_and_clear() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("key1"));
        assert!(throttler.should_log("key2"));
        assert!(!throttler.should_log("key1"));
        assert_eq!(throttler.len(), 2);

        throttler.clear("key1");
        assert!(throttler.should_log("key1"));
    }
}
