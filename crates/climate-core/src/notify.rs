// ── Change listener registry ──
//
// Synchronous callbacks invoked after every applied store change. The
// registry is read from every monitor task and written by register /
// remove calls, so it sits behind its own `DashMap`. Callbacks are cloned
// out before invocation; no shard lock is held while user code runs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::error;

use crate::model::DeviceState;

/// Callback invoked with the new value of a changed entry.
///
/// Runs on the writing monitor's task: it must not block. A panic is
/// caught and logged.
pub type ChangeCallback = Arc<dyn Fn(&Arc<DeviceState>) + Send + Sync>;

/// Handle returned by [`register`](ChangeListeners::register).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

pub(crate) struct ChangeListeners {
    callbacks: DashMap<ListenerId, ChangeCallback>,
    next_id: AtomicU64,
}

impl ChangeListeners {
    pub(crate) fn new() -> Self {
        Self {
            callbacks: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn register(&self, callback: ChangeCallback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.insert(id, callback);
        id
    }

    /// Idempotent.
    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub(crate) fn notify(&self, state: &Arc<DeviceState>) {
        let callbacks: Vec<(ListenerId, ChangeCallback)> = self
            .callbacks
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        for (id, callback) in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(state))).is_err() {
                error!(listener = %id, device_id = %state.id, "change listener panicked");
            }
        }
    }
}
