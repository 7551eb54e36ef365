//! Per-key progress guard.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

/// A set of keys under active mutation.
///
/// [`acquire`](UniqueSet::acquire) waits until no other holder owns the key,
/// then returns a guard that releases it on drop. Waiters for other keys are
/// never blocked.
#[derive(Debug)]
pub struct UniqueSet<K> {
    keys: Mutex<HashSet<K>>,
    released: Notify,
}

impl<K> Default for UniqueSet<K> {
    fn default() -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
            released: Notify::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> UniqueSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive ownership of `key`.
    pub async fn acquire(&self, key: K) -> UniqueGuard<'_, K> {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and
            // the await is not missed.
            notified.as_mut().enable();

            if let Some(guard) = self.try_acquire(key.clone()) {
                return guard;
            }
            notified.await;
        }
    }

    /// Takes ownership of `key` if nobody holds it.
    pub fn try_acquire(&self, key: K) -> Option<UniqueGuard<'_, K>> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(UniqueGuard { set: self, key })
    }

    /// Returns true if `key` is currently held.
    pub fn contains(&self, key: &K) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn release(&self, key: &K) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.released.notify_waiters();
    }
}

/// Ownership of one key in a [`UniqueSet`].
#[derive(Debug)]
pub struct UniqueGuard<'a, K: Eq + Hash + Clone> {
    set: &'a UniqueSet<K>,
    key: K,
}

impl<K: Eq + Hash + Clone> UniqueGuard<'_, K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone> Drop for UniqueGuard<'_, K> {
    fn drop(&mut self) {
        self.set.release(&self.key);
    }
}
