//! Watch registry
//!
//! Bidirectional map between caller-visible watch ids and notifier
//! handles. The two maps are kept mutually consistent; a notifier
//! occupies at most one id slot.

use std::collections::HashMap;

use crate::notifier::NotifierId;

/// Caller-visible identifier returned by `watch_position`. Strictly
/// positive; assigned monotonically by the engine.
pub type WatchId = u64;

#[derive(Debug, Default)]
pub struct Watchers {
    id_to_notifier: HashMap<WatchId, NotifierId>,
    notifier_to_id: HashMap<NotifierId, WatchId>,
}

impl Watchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `notifier` under `id`. Ignored if either side is
    /// already present, preserving map consistency.
    pub fn add(&mut self, id: WatchId, notifier: NotifierId) {
        debug_assert!(id > 0, "watch ids are strictly positive");
        if self.id_to_notifier.contains_key(&id) || self.notifier_to_id.contains_key(&notifier) {
            return;
        }
        self.id_to_notifier.insert(id, notifier);
        self.notifier_to_id.insert(notifier, id);
    }

    /// Remove by caller-visible id, returning the notifier if present.
    pub fn remove_by_id(&mut self, id: WatchId) -> Option<NotifierId> {
        let notifier = self.id_to_notifier.remove(&id)?;
        self.notifier_to_id.remove(&notifier);
        Some(notifier)
    }

    /// Remove by notifier handle, returning its id if present.
    pub fn remove(&mut self, notifier: NotifierId) -> Option<WatchId> {
        let id = self.notifier_to_id.remove(&notifier)?;
        self.id_to_notifier.remove(&id);
        Some(id)
    }

    pub fn contains(&self, notifier: NotifierId) -> bool {
        self.notifier_to_id.contains_key(&notifier)
    }

    pub fn get(&self, id: WatchId) -> Option<NotifierId> {
        self.id_to_notifier.get(&id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_notifier.is_empty()
    }

    pub fn len(&self) -> usize {
        self.id_to_notifier.len()
    }

    pub fn clear(&mut self) {
        self.id_to_notifier.clear();
        self.notifier_to_id.clear();
    }

    /// Snapshot of registered notifiers, for fan-out while mutating.
    pub fn notifiers(&self) -> Vec<NotifierId> {
        self.notifier_to_id.keys().copied().collect()
    }
}
