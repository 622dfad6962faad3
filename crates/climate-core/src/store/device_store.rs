// ── Canonical device store ──
//
// Lock-free reads over `DashMap`, entries replaced whole as immutable
// `Arc<DeviceState>`. Discovery order is kept in an `ArcSwap` index so
// snapshots come back in a stable order. Writers are the per-device
// monitor tasks (one per entry) plus coordinator lifecycle code.

use std::sync::Arc;

use arc_swap::ArcSwap;
use climate_cloud::{DeviceDescriptor, RemoteState};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::convert::device_state_from_remote;
use crate::model::{DeviceId, DeviceState, StateDelta};

/// Result of offering a fetch result to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Entry replaced; carries the new value.
    Applied(Arc<DeviceState>),
    /// Result older than the entry; nothing changed.
    Stale,
    /// No entry for this id.
    Unknown,
}

/// The coordinator's single source of truth.
pub struct DeviceStore {
    entries: DashMap<DeviceId, Arc<DeviceState>>,
    order: ArcSwap<Vec<DeviceId>>,
    version: watch::Sender<u64>,
}

impl DeviceStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            entries: DashMap::new(),
            order: ArcSwap::from_pointee(Vec::new()),
            version,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &DeviceId) -> Option<Arc<DeviceState>> {
        self.entries.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.entries.contains_key(id)
    }

    /// Every entry, in discovery order.
    pub fn all(&self) -> Vec<Arc<DeviceState>> {
        self.order
            .load()
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Ids in discovery order.
    pub fn ids(&self) -> Arc<Vec<DeviceId>> {
        self.order.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bumped on every mutation.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe_version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    // ── Lifecycle writes ─────────────────────────────────────────────

    /// Add placeholder entries for unseen devices and refresh display
    /// names of known ones. Returns the newly added ids.
    pub(crate) fn seed(&self, descriptors: &[DeviceDescriptor]) -> Vec<DeviceId> {
        let mut added = Vec::new();
        for descriptor in descriptors {
            if let Some(mut entry) = self.entries.get_mut(&descriptor.id) {
                if entry.name != descriptor.name {
                    let mut renamed = (**entry).clone();
                    renamed.name.clone_from(&descriptor.name);
                    *entry = Arc::new(renamed);
                }
                continue;
            }
            self.entries.insert(
                descriptor.id.clone(),
                Arc::new(DeviceState::discovered(
                    descriptor.id.clone(),
                    descriptor.name.clone(),
                )),
            );
            added.push(descriptor.id.clone());
        }

        if !added.is_empty() {
            self.order.rcu(|order| {
                let mut next = (**order).clone();
                next.extend(added.iter().cloned());
                next
            });
        }
        self.bump_version();
        added
    }

    pub(crate) fn remove(&self, id: &DeviceId) -> Option<Arc<DeviceState>> {
        let removed = self.entries.remove(id).map(|(_, v)| v);
        if removed.is_some() {
            self.order.rcu(|order| {
                order.iter().filter(|o| *o != id).cloned().collect::<Vec<_>>()
            });
            self.bump_version();
        }
        removed
    }

    // ── Monitor writes ───────────────────────────────────────────────

    /// Replace the entry with a fetch result, unless the result is older
    /// than what the entry already holds.
    pub(crate) fn apply_fetch(&self, id: &DeviceId, remote: RemoteState) -> ApplyOutcome {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return ApplyOutcome::Unknown;
        };
        if entry
            .last_updated
            .is_some_and(|current| remote.timestamp < current)
        {
            return ApplyOutcome::Stale;
        }

        let next = Arc::new(device_state_from_remote(id.clone(), entry.name.clone(), remote));
        *entry = Arc::clone(&next);
        drop(entry);

        self.bump_version();
        ApplyOutcome::Applied(next)
    }

    /// Merge an optimistic delta into the entry.
    pub(crate) fn apply_delta(&self, id: &DeviceId, delta: &StateDelta) -> Option<Arc<DeviceState>> {
        let mut entry = self.entries.get_mut(id)?;
        let next = Arc::new(delta.apply_to(&entry));
        *entry = Arc::clone(&next);
        drop(entry);

        self.bump_version();
        Some(next)
    }

    /// Record that the device stopped answering. Returns the new value
    /// only if the entry actually changed.
    pub(crate) fn mark_offline(&self, id: &DeviceId) -> Option<Arc<DeviceState>> {
        let mut entry = self.entries.get_mut(id)?;
        if !entry.online {
            return None;
        }
        let mut next = (**entry).clone();
        next.online = false;
        let next = Arc::new(next);
        *entry = Arc::clone(&next);
        drop(entry);

        self.bump_version();
        Some(next)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use climate_cloud::ParamMap;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::StateOrigin;

    fn descriptors(ids: &[&str]) -> Vec<DeviceDescriptor> {
        ids.iter()
            .map(|id| DeviceDescriptor::new(*id, format!("Unit {id}")))
            .collect()
    }

    fn remote(target_tenths: i32, at: DateTime<Utc>) -> RemoteState {
        RemoteState {
            online: true,
            power: true,
            mode_code: Some(0),
            fan_code: Some(0),
            target_tenths: Some(target_tenths),
            ambient_tenths: Some(250),
            params: ParamMap::new(),
            timestamp: at,
        }
    }

    #[test]
    fn seed_keeps_discovery_order() {
        let store = DeviceStore::new();
        store.seed(&descriptors(&["ac-3", "ac-1", "ac-2"]));

        let ids: Vec<String> = store.all().iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, vec!["ac-3", "ac-1", "ac-2"]);
        assert!(store.all().iter().all(|s| s.origin == StateOrigin::Discovered));
    }

    #[test]
    fn reseed_adds_only_new_and_renames() {
        let store = DeviceStore::new();
        store.seed(&descriptors(&["ac-1"]));

        let mut next = descriptors(&["ac-1", "ac-2"]);
        next[0].name = "Kitchen".into();
        let added = store.seed(&next);

        assert_eq!(added, vec![DeviceId::from("ac-2")]);
        assert_eq!(store.get(&DeviceId::from("ac-1")).unwrap().name, "Kitchen");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn older_fetch_is_a_no_op() {
        let store = DeviceStore::new();
        store.seed(&descriptors(&["ac-1"]));
        let id = DeviceId::from("ac-1");
        let now = Utc::now();

        assert!(matches!(store.apply_fetch(&id, remote(220, now)), ApplyOutcome::Applied(_)));
        let before = store.get(&id).unwrap();
        let version = store.version();

        let outcome = store.apply_fetch(&id, remote(180, now - Duration::seconds(5)));

        assert_eq!(outcome, ApplyOutcome::Stale);
        assert_eq!(store.get(&id).unwrap(), before);
        assert_eq!(store.version(), version);
    }

    #[test]
    fn equal_timestamp_replaces() {
        let store = DeviceStore::new();
        store.seed(&descriptors(&["ac-1"]));
        let id = DeviceId::from("ac-1");
        let now = Utc::now();

        store.apply_fetch(&id, remote(220, now));
        store.apply_fetch(&id, remote(240, now));

        assert_eq!(store.get(&id).unwrap().target_temperature, Some(24));
    }

    #[test]
    fn fetch_for_unknown_id_creates_nothing() {
        let store = DeviceStore::new();
        let outcome = store.apply_fetch(&DeviceId::from("ghost"), remote(220, Utc::now()));
        assert_eq!(outcome, ApplyOutcome::Unknown);
        assert!(store.is_empty());
    }

    #[test]
    fn fetch_clears_optimistic_overlay() {
        let store = DeviceStore::new();
        store.seed(&descriptors(&["ac-1"]));
        let id = DeviceId::from("ac-1");
        let now = Utc::now();
        store.apply_fetch(&id, remote(200, now));

        let delta = StateDelta {
            target_temperature: Some(22),
            ..StateDelta::default()
        };
        let optimistic = store.apply_delta(&id, &delta).unwrap();
        assert!(optimistic.is_optimistic());
        assert_eq!(optimistic.last_updated, Some(now));

        let ApplyOutcome::Applied(fetched) = store.apply_fetch(&id, remote(210, now)) else {
            panic!("fetch not applied");
        };
        assert_eq!(fetched.target_temperature, Some(21));
        assert_eq!(fetched.origin, StateOrigin::Fetched);
    }

    #[test]
    fn mark_offline_only_reports_changes() {
        let store = DeviceStore::new();
        store.seed(&descriptors(&["ac-1"]));
        let id = DeviceId::from("ac-1");

        assert!(store.mark_offline(&id).is_none());
        store.apply_fetch(&id, remote(200, Utc::now()));
        assert!(!store.mark_offline(&id).unwrap().online);
    }

    #[test]
    fn remove_drops_from_order() {
        let store = DeviceStore::new();
        store.seed(&descriptors(&["ac-1", "ac-2"]));
        store.remove(&DeviceId::from("ac-1"));
        assert_eq!(*store.ids(), vec![DeviceId::from("ac-2")]);
    }
}
