//! Fence registry.
//!
//! Thread-safe storage of registered fences keyed by id. Registration never
//! blocks on I/O; persistence of the id set is the coordinator's concern.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::error::FenceError;
use crate::fence::{Fence, FenceId};

/// Default maximum number of fences (the platform limit per app).
pub const DEFAULT_MAX_FENCES: usize = 100;

/// Snapshot of the registered fences.
///
/// Iterating does not hold the registry lock and can be restarted any
/// number of times. Order is unspecified.
#[derive(Debug, Clone, Default)]
pub struct FenceList {
    fences: Vec<Fence>,
}

impl FenceList {
    /// Iterates over the fences in the snapshot.
    pub fn iter(&self) -> std::slice::Iter<'_, Fence> {
        self.fences.iter()
    }

    /// Number of fences in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fences.len()
    }

    /// Returns true if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    /// Returns true if the snapshot contains `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.fences.iter().any(|f| f.id.as_str() == id)
    }
}

impl<'a> IntoIterator for &'a FenceList {
    type Item = &'a Fence;
    type IntoIter = std::slice::Iter<'a, Fence>;

    fn into_iter(self) -> Self::IntoIter {
        self.fences.iter()
    }
}

impl IntoIterator for FenceList {
    type Item = Fence;
    type IntoIter = std::vec::IntoIter<Fence>;

    fn into_iter(self) -> Self::IntoIter {
        self.fences.into_iter()
    }
}

/// Registered fences keyed by id.
#[derive(Debug)]
pub struct FenceRegistry {
    fences: RwLock<HashMap<FenceId, Fence>>,
    max_fences: usize,
}

impl Default for FenceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FENCES)
    }
}

impl FenceRegistry {
    /// Creates an empty registry holding at most `max_fences` fences.
    #[must_use]
    pub fn new(max_fences: usize) -> Self {
        Self {
            fences: RwLock::new(HashMap::new()),
            max_fences: max_fences.max(1),
        }
    }

    // The map is only ever mutated by single insert/remove calls, so a
    // poisoned lock still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<FenceId, Fence>> {
        self.fences.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<FenceId, Fence>> {
        self.fences.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `fence`, replacing any fence with the same id.
    ///
    /// Returns the replaced fence, if any.
    ///
    /// # Errors
    ///
    /// Returns `FenceError` if the fence violates its invariants or the
    /// registry is full and the id is new.
    pub fn register(&self, fence: Fence) -> Result<Option<Fence>, FenceError> {
        fence.validate()?;

        let mut fences = self.write();
        if !fences.contains_key(&fence.id) && fences.len() >= self.max_fences {
            return Err(FenceError::CapacityExceeded {
                id: fence.id.to_string(),
                max_fences: self.max_fences,
            });
        }
        Ok(fences.insert(fence.id.clone(), fence))
    }

    /// Removes the fence with `id`. Absent ids are a no-op.
    ///
    /// Returns the removed fence, if any.
    pub fn unregister(&self, id: &str) -> Option<Fence> {
        self.write().remove(id)
    }

    /// Snapshot of all registered fences.
    #[must_use]
    pub fn list(&self) -> FenceList {
        FenceList {
            fences: self.read().values().cloned().collect(),
        }
    }

    /// Removes every fence whose expiry is at or before `now`.
    ///
    /// Returns the removed ids, sorted.
    pub fn expire(&self, now: DateTime<Utc>) -> Vec<FenceId> {
        let mut fences = self.write();
        let mut expired: Vec<FenceId> = fences
            .values()
            .filter(|f| f.is_expired_at(now))
            .map(|f| f.id.clone())
            .collect();
        for id in &expired {
            fences.remove(id);
        }
        expired.sort();
        expired
    }

    /// Returns the fence with `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Fence> {
        self.read().get(id).cloned()
    }

    /// Returns true if a fence with `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<FenceId> {
        let mut ids: Vec<FenceId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered fences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if no fence is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Maximum number of fences.
    #[must_use]
    pub const fn max_fences(&self) -> usize {
        self.max_fences
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::fence::Expiry;
    use crate::geo::Coordinate;

    fn fence(id: &str, radius_m: f64) -> Fence {
        Fence::new(id, Coordinate::new(45.545_184, -122.845_018), radius_m, 0).unwrap()
    }

    #[test]
    fn register_and_list() {
        let reg = FenceRegistry::default();
        reg.register(fence("a", 10.0)).unwrap();
        reg.register(fence("b", 20.0)).unwrap();

        let list = reg.list();
        assert_eq!(list.len(), 2);
        assert!(list.contains("a"));
        assert!(list.contains("b"));

        // Restartable.
        assert_eq!(list.iter().count(), 2);
        assert_eq!((&list).into_iter().count(), 2);
    }

    #[test]
    fn register_replaces_by_id() {
        let reg = FenceRegistry::default();
        assert!(reg.register(fence("a", 10.0)).unwrap().is_none());
        let replaced = reg.register(fence("a", 50.0)).unwrap().unwrap();
        assert!((replaced.radius_m - 10.0).abs() < f64::EPSILON);

        let list = reg.list();
        assert_eq!(list.len(), 1);
        assert!((reg.get("a").unwrap().radius_m - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn register_rejects_invalid_fence() {
        let reg = FenceRegistry::default();
        let mut bad = fence("a", 10.0);
        bad.radius_m = -3.0;
        assert!(matches!(reg.register(bad), Err(FenceError::InvalidRadius { .. })));

        let mut blank = fence("a", 10.0);
        blank.id = FenceId::from("");
        assert_eq!(reg.register(blank), Err(FenceError::EmptyId));
        assert!(reg.is_empty());
    }

    #[test]
    fn unregister_absent_is_noop() {
        let reg = FenceRegistry::default();
        assert!(reg.unregister("missing").is_none());
        reg.register(fence("a", 10.0)).unwrap();
        assert!(reg.unregister("a").is_some());
        assert!(!reg.list().contains("a"));
    }

    #[test]
    fn capacity_applies_to_new_ids_only() {
        let reg = FenceRegistry::new(1);
        reg.register(fence("a", 10.0)).unwrap();
        assert!(matches!(
            reg.register(fence("b", 10.0)),
            Err(FenceError::CapacityExceeded { max_fences: 1, .. })
        ));
        // Replacing an existing id is fine at capacity.
        reg.register(fence("a", 30.0)).unwrap();
    }

    #[test]
    fn expire_removes_due_fences() {
        let reg = FenceRegistry::default();
        let now = Utc::now();

        let mut due = fence("due", 10.0);
        due.expiry = Expiry::At(now);
        let mut later = fence("later", 10.0);
        later.expiry = Expiry::At(now + Duration::seconds(60));
        reg.register(due).unwrap();
        reg.register(later).unwrap();
        reg.register(fence("never", 10.0)).unwrap();

        let expired = reg.expire(now);
        assert_eq!(expired, vec![FenceId::from("due")]);
        assert_eq!(reg.ids(), vec![FenceId::from("later"), FenceId::from("never")]);

        assert!(reg.expire(now).is_empty());
    }
}
