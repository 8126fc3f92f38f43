//! Log throttling utilities
//!
//! Rate-limits repetitive log messages, keyed by message type. Used on the
//! capture stderr path where a struggling device can emit the same
//! diagnostic hundreds of times per second.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Throttles log messages to avoid flooding
///
/// ```
/// use std::time::Duration;
/// use camfeed::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
///
/// // First call for a key always logs
/// assert!(throttler.should_log("device_error"));
///
/// // Subsequent calls within 5 seconds return false
/// assert!(!throttler.should_log("device_error"));
/// ```
pub struct LogThrottler {
    /// Map of message key to last log time
    last_logged: RwLock<HashMap<String, Instant>>,
    /// Throttle interval
    interval: Duration,
}

impl LogThrottler {
    /// Create a new log throttler with the specified interval
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: RwLock::new(HashMap::new()),
            interval,
        }
    }

    /// Create a new log throttler with interval specified in seconds
    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Check if a message should be logged (not throttled)
    ///
    /// Returns true if the interval has elapsed since the last accepted
    /// call for this key, and records the acceptance.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();

        // First check with read lock (fast path)
        {
            let last_logged = self.last_logged.read().unwrap();
            if let Some(&last) = last_logged.get(key) {
                if now.duration_since(last) < self.interval {
                    return false;
                }
            }
        }

        // Need to update - acquire write lock
        let mut last_logged = self.last_logged.write().unwrap();
        // Re-check in case another thread updated between locks
        if let Some(&last) = last_logged.get(key) {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        last_logged.insert(key.to_string(), now);
        true
    }
}

impl Default for LogThrottler {
    /// Create a default log throttler with 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_log_allowed() {
        let throttler = LogThrottler::with_secs(5);
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn test_throttling_within_interval() {
        let throttler = LogThrottler::with_secs(5);
        assert!(throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));
    }

    #[test]
    fn test_different_keys_independent() {
        let throttler = LogThrottler::with_secs(5);
        assert!(throttler.should_log("key1"));
        assert!(throttler.should_log("key2"));
        assert!(!throttler.should_log("key1"));
        assert!(!throttler.should_log("key2"));
    }

    #[test]
    fn test_log_allowed_after_interval() {
        let throttler = LogThrottler::new(Duration::from_millis(50));
        assert!(throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));

        thread::sleep(Duration::from_millis(60));
        assert!(throttler.should_log("test_key"));
    }
}
