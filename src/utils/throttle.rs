//! Rate limiting for repeated log lines
//!
//! A frame pump that hits a failing transfer would otherwise log the same
//! error once per tick.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct KeyState {
    last_logged: Instant,
    suppressed: u64,
}

/// Lets one message per key through every `interval`
pub struct LogThrottler {
    keys: Mutex<HashMap<String, KeyState>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Whether a message for `key` should be logged now
    ///
    /// Records the attempt either way, so [`suppressed`](Self::suppressed)
    /// reports how many messages were swallowed since the last one through.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        match keys.get_mut(key) {
            Some(state) if now.duration_since(state.last_logged) < self.interval => {
                state.suppressed += 1;
                false
            }
            Some(state) => {
                state.last_logged = now;
                state.suppressed = 0;
                true
            }
            None => {
                keys.insert(
                    key.to_string(),
                    KeyState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                true
            }
        }
    }

    /// Messages dropped for `key` since it last logged
    pub fn suppressed(&self, key: &str) -> u64 {
        self.keys.lock().get(key).map_or(0, |s| s.suppressed)
    }

    /// Forget `key` after the condition recovered, so the next failure logs at once
    pub fn clear(&self, key: &str) {
        self.keys.lock().remove(key);
    }

    pub fn clear_all(&self) {
        self.keys.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// `tracing::warn!` through a [`LogThrottler`]
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

/// `tracing::error!` through a [`LogThrottler`]
#[macro_export]
macro_rules! error_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::error!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttling() {
        let throttler = LogThrottler::new(Duration::from_millis(100));
        assert!(throttler.should_log("render"));
        assert!(!throttler.should_log("render"));
        assert!(!throttler.should_log("render"));
        assert_eq!(throttler.suppressed("render"), 2);

        thread::sleep(Duration::from_millis(150));
        assert!(throttler.should_log("render"));
        assert_eq!(throttler.suppressed("render"), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("dev1"));
        assert!(throttler.should_log("dev2"));
        assert!(!throttler.should_log("dev1"));
        assert_eq!(throttler.len(), 2);
    }

    #[test]
    fn test_clear() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("dev1"));
        throttler.clear("dev1");
        assert!(throttler.should_log("dev1"));

        throttler.clear_all();
        assert!(throttler.is_empty());
    }

    #[test]
    fn test_macro_consults_throttler() {
        let throttler = LogThrottler::with_secs(10);
        warn_throttled!(throttler, "k", "first {}", 1);
        error_throttled!(throttler, "k", "second {}", 2);
        assert_eq!(throttler.suppressed("k"), 1);
    }
}
