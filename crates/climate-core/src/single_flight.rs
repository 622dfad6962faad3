// ── Single-flight guard ──
//
// At most one holder per key at a time. Independent of debouncing: the
// debouncer decides *when* a fetch is wanted, this decides whether one
// may start right now.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashSet;

/// Registry of keys with an operation in flight.
#[derive(Debug)]
pub struct SingleFlight<K: Eq + Hash + Clone> {
    active: Arc<DashSet<K>>,
}

impl<K: Eq + Hash + Clone> SingleFlight<K> {
    pub fn new() -> Self {
        Self {
            active: Arc::new(DashSet::new()),
        }
    }

    /// Claim `key`. `None` while another guard for it is alive.
    pub fn try_acquire(&self, key: K) -> Option<FlightGuard<K>> {
        if self.active.insert(key.clone()) {
            Some(FlightGuard {
                active: Arc::clone(&self.active),
                key,
            })
        } else {
            None
        }
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.active.contains(key)
    }
}

impl<K: Eq + Hash + Clone> Default for SingleFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> Clone for SingleFlight<K> {
    fn clone(&self) -> Self {
        Self {
            active: Arc::clone(&self.active),
        }
    }
}

/// Releases its key when dropped, including when the owning task is aborted.
#[derive(Debug)]
pub struct FlightGuard<K: Eq + Hash + Clone> {
    active: Arc<DashSet<K>>,
    key: K,
}

impl<K: Eq + Hash + Clone> Drop for FlightGuard<K> {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_blocked_until_release() {
        let flights = SingleFlight::new();

        let guard = flights.try_acquire("ac-1");
        assert!(guard.is_some());
        assert!(flights.try_acquire("ac-1").is_none());
        assert!(flights.is_in_flight(&"ac-1"));

        drop(guard);
        assert!(!flights.is_in_flight(&"ac-1"));
        assert!(flights.try_acquire("ac-1").is_some());
    }

    #[test]
    fn keys_are_independent() {
        let flights = SingleFlight::new();
        let _a = flights.try_acquire("ac-1");
        assert!(flights.try_acquire("ac-2").is_some());
    }

    #[tokio::test]
    async fn aborted_task_releases_key() {
        let flights = SingleFlight::new();
        let guard = flights.try_acquire("ac-1");

        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;

        assert!(!flights.is_in_flight(&"ac-1"));
    }
}
