//! Force-termination deadlines.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// First stop request per key, used to escalate stuck terminations.
#[derive(Debug, Clone)]
pub struct StopDeadlines<K> {
    timeout: Duration,
    armed: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> StopDeadlines<K> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            armed: HashMap::new(),
        }
    }

    /// Starts the clock for `key` unless it is already running.
    pub fn arm(&mut self, key: &K, now: Instant) -> Instant {
        *self.armed.entry(key.clone()).or_insert(now)
    }

    /// Returns true once the bound has elapsed since `arm`.
    pub fn expired(&self, key: &K, now: Instant) -> bool {
        self.armed
            .get(key)
            .is_some_and(|first| now.saturating_duration_since(*first) >= self.timeout)
    }

    pub fn clear(&mut self, key: &K) {
        self.armed.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_after_timeout() {
        let mut deadlines = StopDeadlines::new(Duration::from_secs(30));
        let first = deadlines.arm(&"pod", Instant::now());
        assert!(!deadlines.expired(&"pod", Instant::now()));

        tokio::time::advance(Duration::from_secs(10)).await;
        // re-arming keeps the original start
        assert_eq!(deadlines.arm(&"pod", Instant::now()), first);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(deadlines.expired(&"pod", Instant::now()));

        deadlines.clear(&"pod");
        assert!(!deadlines.expired(&"pod", Instant::now()));
    }

    #[test]
    fn unknown_key_never_expires() {
        let deadlines: StopDeadlines<&str> = StopDeadlines::new(Duration::ZERO);
        assert!(!deadlines.expired(&"missing", Instant::now()));
    }
}
