//! Timestamp-change tracking.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Observation {
    stamp: String,
    changed_at: Instant,
}

/// Remembers when each entry's timestamp string last changed.
///
/// Entries are refreshed by remote writers; we only trust our own clock for
/// how long a value has stayed the same.
#[derive(Debug, Clone)]
pub struct ObservationLog<K> {
    entries: HashMap<K, Observation>,
    last_changed: Instant,
    last_checked: Instant,
}

impl<K: Eq + Hash + Clone> ObservationLog<K> {
    pub fn new(now: Instant) -> Self {
        Self {
            entries: HashMap::new(),
            last_changed: now,
            last_checked: now,
        }
    }

    /// Records the current `stamp` for `key`.
    ///
    /// Returns how long the stamp has been unchanged; zero when it is new or
    /// differs from the previous observation.
    pub fn observe(&mut self, key: &K, stamp: &str, now: Instant) -> Duration {
        self.last_checked = now;
        match self.entries.get(key) {
            Some(seen) if seen.stamp == stamp => now.saturating_duration_since(seen.changed_at),
            _ => {
                self.entries.insert(
                    key.clone(),
                    Observation {
                        stamp: stamp.to_string(),
                        changed_at: now,
                    },
                );
                self.last_changed = now;
                Duration::ZERO
            }
        }
    }

    /// Drops `key` after its entry was removed from the record.
    pub fn forget(&mut self, key: &K, now: Instant) {
        if self.entries.remove(key).is_some() {
            self.last_changed = now;
        }
    }

    /// Drops entries unchanged for longer than `max_age`.
    pub fn purge(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, seen| now.saturating_duration_since(seen.changed_at) <= max_age);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.last_changed = now;
        }
        removed
    }

    /// Time since any entry last changed.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_changed)
    }

    /// Time since the log was last consulted.
    pub fn unchecked_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_checked)
    }

    /// Marks the log as consulted without observing an entry.
    pub fn touch(&mut self, now: Instant) {
        self.last_checked = now;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
