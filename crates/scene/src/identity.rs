use std::collections::HashMap;
use tower_common::{LocalId, SceneHandle};

/// Bijection between cube records and the numeric handles that key their
/// render and physics objects.
///
/// Handles come from a monotonically increasing counter and are never
/// reused, so a stale handle can never alias a newer cube. A record keeps its
/// handle until it is released; the simulation indexes bodies by handle, so
/// remapping would desync it.
#[derive(Debug)]
pub struct IdentityMapper {
    by_local: HashMap<LocalId, SceneHandle>,
    by_handle: HashMap<SceneHandle, LocalId>,
    next: u64,
}

impl Default for IdentityMapper {
    fn default() -> Self {
        Self {
            by_local: HashMap::new(),
            by_handle: HashMap::new(),
            next: 1,
        }
    }
}

impl IdentityMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `id`, allocating the next free one on first use.
    pub fn get_or_create_handle(&mut self, id: LocalId) -> SceneHandle {
        if let Some(handle) = self.by_local.get(&id) {
            return *handle;
        }
        let handle = SceneHandle(self.next);
        self.next += 1;
        self.by_local.insert(id, handle);
        self.by_handle.insert(handle, id);
        tracing::trace!(id = %id.short(), %handle, "handle allocated");
        handle
    }

    pub fn handle_of(&self, id: LocalId) -> Option<SceneHandle> {
        self.by_local.get(&id).copied()
    }

    pub fn local_of(&self, handle: SceneHandle) -> Option<LocalId> {
        self.by_handle.get(&handle).copied()
    }

    /// Drop the mapping for `id`. Returns the handle it held.
    pub fn release_by_local_id(&mut self, id: LocalId) -> Option<SceneHandle> {
        let handle = self.by_local.remove(&id)?;
        self.by_handle.remove(&handle);
        Some(handle)
    }

    /// Drop the mapping for `handle`. Returns the local id it belonged to.
    pub fn release_by_handle(&mut self, handle: SceneHandle) -> Option<LocalId> {
        let id = self.by_handle.remove(&handle)?;
        self.by_local.remove(&id);
        Some(id)
    }

    /// Release every mapping whose local id fails `keep`. Returns the released
    /// handles in ascending order.
    pub fn retain(&mut self, mut keep: impl FnMut(LocalId) -> bool) -> Vec<SceneHandle> {
        let mut released: Vec<SceneHandle> = self
            .by_local
            .iter()
            .filter(|(id, _)| !keep(**id))
            .map(|(_, h)| *h)
            .collect();
        released.sort();
        for handle in &released {
            self.release_by_handle(*handle);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.by_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_local.is_empty()
    }

    /// Live `(local id, handle)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (LocalId, SceneHandle)> + '_ {
        self.by_local.iter().map(|(id, h)| (*id, *h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn same_id_same_handle() {
        let mut m = IdentityMapper::new();
        let id = LocalId::new();
        let a = m.get_or_create_handle(id);
        let b = m.get_or_create_handle(id);
        assert_eq!(a, b);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn distinct_ids_never_share_a_handle() {
        let mut m = IdentityMapper::new();
        let ids: Vec<LocalId> = (0..50).map(|_| LocalId::new()).collect();
        let mut seen: HashSet<SceneHandle> = HashSet::new();
        // Interleave repeats and releases to exercise the counter.
        for (i, id) in ids.iter().enumerate() {
            let h = m.get_or_create_handle(*id);
            assert!(seen.insert(h), "handle {h} handed out twice");
            if i % 3 == 0 {
                assert_eq!(m.get_or_create_handle(ids[i / 2]), m.handle_of(ids[i / 2]).unwrap());
            }
            if i % 7 == 0 {
                m.release_by_local_id(*id);
            }
        }
        for (id, h) in m.iter() {
            assert_eq!(m.local_of(h), Some(id));
        }
    }

    #[test]
    fn handles_are_not_reused_after_release() {
        let mut m = IdentityMapper::new();
        let a = LocalId::new();
        let first = m.get_or_create_handle(a);
        assert_eq!(m.release_by_handle(first), Some(a));
        assert!(m.handle_of(a).is_none());
        let again = m.get_or_create_handle(a);
        assert_ne!(first, again);
        assert!(again > first);
    }

    #[test]
    fn retain_releases_missing_records() {
        let mut m = IdentityMapper::new();
        let keep = LocalId::new();
        let gone = LocalId::new();
        m.get_or_create_handle(keep);
        let gone_handle = m.get_or_create_handle(gone);

        let released = m.retain(|id| id == keep);
        assert_eq!(released, vec![gone_handle]);
        assert!(m.handle_of(gone).is_none());
        assert!(m.handle_of(keep).is_some());
    }

    #[test]
    fn release_unknown_is_none() {
        let mut m = IdentityMapper::new();
        assert!(m.release_by_local_id(LocalId::new()).is_none());
        assert!(m.release_by_handle(SceneHandle(42)).is_none());
    }
}
