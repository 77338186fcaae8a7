use std::collections::{BTreeMap, HashMap, HashSet};

use glam::{Quat, Vec3};
use serde::Serialize;
use tower_common::{LocalId, Pose, RemoteId, Timestamp, UserId};

use crate::record::{
    CubeRecord, CubeStatus, DropPayload, Origin, RemoteCube, normalize_display_name,
};

/// An event record produced by every applied mutation of the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StoreEvent {
    Dropped { id: LocalId },
    Settled { id: LocalId, pose: Pose },
    IdentityAttached { id: LocalId },
    SaveRequested { id: LocalId },
    Saved { id: LocalId, remote_id: RemoteId },
    SaveFailed { id: LocalId, message: String },
    /// The active flow's record was deleted. Carries its last status.
    Abandoned { id: LocalId, status: CubeStatus },
    SnapshotBuffered { len: usize },
    SnapshotApplied(SnapshotStats),
    FeedError { message: String },
}

/// Counts from applying one full remote list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Local records recognised in the list by their remote id.
    pub echoed: usize,
}

/// What happened to an incoming remote snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotDisposition {
    Applied(SnapshotStats),
    /// Held back until the active flow resolves.
    Buffered,
}

/// Errors from store operations. A failed operation leaves the store untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("a flow is already active for cube {0}")]
    FlowActive(LocalId),
    #[error("cannot {op} cube {id} in status {status:?}")]
    InvalidTransition {
        id: LocalId,
        status: CubeStatus,
        op: &'static str,
    },
    #[error("cube {0} has no final pose yet")]
    MissingPose(LocalId),
    #[error("cube {id} already synced as {existing}, refusing {attempted}")]
    RemoteIdReassigned {
        id: LocalId,
        existing: RemoteId,
        attempted: RemoteId,
    },
}

/// A broken store invariant, reported by [`CubeStore::check_invariants`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("{0} records are pending at once")]
    MultiplePending(usize),
    #[error("pending record {0} is not the active flow")]
    PendingOutsideFlow(LocalId),
    #[error("active flow {0} has no record")]
    DanglingFlow(LocalId),
    #[error("synced record {0} has no remote id")]
    SyncedWithoutRemoteId(LocalId),
}

/// Authoritative reducer over every known cube.
///
/// Owns the reconciliation rule between the single optimistic local write and
/// the full-list remote feed: while a flow is active, remote snapshots are
/// buffered and applied in full once the flow resolves.
#[derive(Debug, Default)]
pub struct CubeStore {
    records: BTreeMap<LocalId, CubeRecord>,
    active_flow: Option<LocalId>,
    buffer: Option<Vec<RemoteCube>>,
    seed: Vec<RemoteCube>,
    has_snapshot: bool,
    feed_error: Option<String>,
    events: Vec<StoreEvent>,
}

impl CubeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that falls back to `seed` if the feed fails before delivering anything.
    pub fn with_seed(seed: Vec<RemoteCube>) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: LocalId) -> Option<&CubeRecord> {
        self.records.get(&id)
    }

    /// Live record table keyed by local id.
    pub fn records(&self) -> &BTreeMap<LocalId, CubeRecord> {
        &self.records
    }

    pub fn active_flow(&self) -> Option<LocalId> {
        self.active_flow
    }

    /// The record of the active flow, if any.
    pub fn active_record(&self) -> Option<&CubeRecord> {
        self.active_flow.and_then(|id| self.records.get(&id))
    }

    /// Remote list waiting for the active flow to resolve.
    pub fn pending_buffer(&self) -> Option<&[RemoteCube]> {
        self.buffer.as_deref()
    }

    /// Last feed error, cleared by the next successful snapshot.
    pub fn feed_error(&self) -> Option<&str> {
        self.feed_error.as_deref()
    }

    pub fn events(&self) -> &[StoreEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.events)
    }

    /// Start a local flow with a new draft record.
    pub fn drop_cube(&mut self, payload: DropPayload) -> Result<LocalId, StoreError> {
        if let Some(active) = self.active_flow {
            return Err(StoreError::FlowActive(active));
        }
        let id = LocalId::new();
        self.records.insert(id, CubeRecord::draft(id, payload));
        self.active_flow = Some(id);
        tracing::debug!(id = %id.short(), "cube dropped");
        self.events.push(StoreEvent::Dropped { id });
        Ok(id)
    }

    /// Record the resting pose of a draft or saving cube.
    pub fn settle_cube(
        &mut self,
        id: LocalId,
        position: Vec3,
        rotation: Quat,
    ) -> Result<bool, StoreError> {
        let Some(record) = self.lookup_mut(id, "settle") else {
            return Ok(false);
        };
        if !matches!(record.status, CubeStatus::Draft | CubeStatus::Saving) {
            return Err(invalid(record, "settle"));
        }
        record.final_position = Some(position);
        record.final_rotation = Some(rotation);
        let pose = Pose::new(position, rotation);
        tracing::debug!(id = %id.short(), y = position.y, "cube settled");
        self.events.push(StoreEvent::Settled { id, pose });
        Ok(true)
    }

    /// Attach an optional identity to the active cube before it is saved.
    pub fn attach_identity(
        &mut self,
        id: LocalId,
        user_id: Option<UserId>,
        display_name: Option<&str>,
    ) -> Result<bool, StoreError> {
        let Some(record) = self.lookup_mut(id, "attach identity") else {
            return Ok(false);
        };
        if !matches!(record.status, CubeStatus::Draft | CubeStatus::Error) {
            return Err(invalid(record, "attach identity to"));
        }
        if user_id.is_some() {
            record.user_id = user_id;
        }
        record.display_name = normalize_display_name(display_name);
        self.events.push(StoreEvent::IdentityAttached { id });
        Ok(true)
    }

    /// Move a settled draft (or a failed save) into `Saving`.
    pub fn request_save(&mut self, id: LocalId) -> Result<bool, StoreError> {
        let Some(record) = self.lookup_mut(id, "request save") else {
            return Ok(false);
        };
        match record.status {
            CubeStatus::Saving => return Ok(false),
            CubeStatus::Draft | CubeStatus::Error => {}
            CubeStatus::Synced => return Err(invalid(record, "save")),
        }
        if record.final_pose().is_none() {
            return Err(StoreError::MissingPose(id));
        }
        let retry = record.status == CubeStatus::Error;
        record.status = CubeStatus::Saving;
        record.last_error = None;
        tracing::debug!(id = %id.short(), retry, "save requested");
        self.events.push(StoreEvent::SaveRequested { id });
        Ok(true)
    }

    /// Mark a saving cube as durably stored and resolve the active flow.
    ///
    /// Repeating the call with the same remote id is a no-op.
    pub fn confirm_save(
        &mut self,
        id: LocalId,
        remote_id: RemoteId,
        created_at: Timestamp,
    ) -> Result<bool, StoreError> {
        let Some(record) = self.lookup_mut(id, "confirm save") else {
            return Ok(false);
        };
        match (record.status, &record.remote_id) {
            (CubeStatus::Saving, _) => {}
            (CubeStatus::Synced, Some(existing)) if *existing == remote_id => return Ok(false),
            (CubeStatus::Synced, Some(existing)) => {
                return Err(StoreError::RemoteIdReassigned {
                    id,
                    existing: existing.clone(),
                    attempted: remote_id,
                });
            }
            _ => return Err(invalid(record, "confirm")),
        }
        record.status = CubeStatus::Synced;
        record.remote_id = Some(remote_id.clone());
        record.created_at_remote = Some(created_at);
        tracing::debug!(id = %id.short(), %remote_id, "save confirmed");
        self.events.push(StoreEvent::Saved { id, remote_id });
        if self.active_flow == Some(id) {
            self.active_flow = None;
            self.flush_buffer();
        }
        Ok(true)
    }

    /// Mark a saving cube as failed. The flow stays active for retry or abandon.
    pub fn fail_save(&mut self, id: LocalId, message: impl Into<String>) -> Result<bool, StoreError> {
        let Some(record) = self.lookup_mut(id, "fail save") else {
            return Ok(false);
        };
        match record.status {
            CubeStatus::Saving => {}
            CubeStatus::Error => return Ok(false),
            _ => return Err(invalid(record, "fail")),
        }
        let message = message.into();
        record.status = CubeStatus::Error;
        record.last_error = Some(message.clone());
        tracing::debug!(id = %id.short(), %message, "save failed");
        self.events.push(StoreEvent::SaveFailed { id, message });
        Ok(true)
    }

    /// Delete the active flow's record whatever its status and flush any buffer.
    ///
    /// Returns the removed record. Calling it with no active flow does nothing.
    pub fn abandon_flow(&mut self) -> Option<CubeRecord> {
        let id = self.active_flow.take()?;
        let removed = self.records.remove(&id);
        if let Some(record) = &removed {
            tracing::debug!(id = %id.short(), status = record.status.as_str(), "flow abandoned");
            self.events.push(StoreEvent::Abandoned {
                id,
                status: record.status,
            });
        }
        self.flush_buffer();
        removed
    }

    /// Accept a full remote list: apply it now, or hold it while a flow is active.
    pub fn on_remote_snapshot(&mut self, list: Vec<RemoteCube>) -> SnapshotDisposition {
        self.has_snapshot = true;
        self.feed_error = None;
        if self.active_flow.is_some() {
            tracing::debug!(len = list.len(), "snapshot buffered behind active flow");
            self.events.push(StoreEvent::SnapshotBuffered { len: list.len() });
            self.buffer = Some(list);
            return SnapshotDisposition::Buffered;
        }
        SnapshotDisposition::Applied(self.apply_snapshot(list))
    }

    /// Record a non-fatal feed failure. Falls back to the seed list if nothing
    /// has ever been received, so the scene still has something to show.
    pub fn on_remote_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "remote feed error");
        self.feed_error = Some(message.clone());
        self.events.push(StoreEvent::FeedError { message });
        if !self.has_snapshot && self.active_flow.is_none() && !self.seed.is_empty() {
            let seed = self.seed.clone();
            self.apply_snapshot(seed);
        }
    }

    /// Verify the store's structural invariants.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let pending: Vec<&CubeRecord> = self
            .records
            .values()
            .filter(|r| r.status.is_pending())
            .collect();
        if pending.len() > 1 {
            return Err(InvariantViolation::MultiplePending(pending.len()));
        }
        if let Some(record) = pending.first() {
            if self.active_flow != Some(record.local_id) {
                return Err(InvariantViolation::PendingOutsideFlow(record.local_id));
            }
        }
        if let Some(id) = self.active_flow {
            if !self.records.contains_key(&id) {
                return Err(InvariantViolation::DanglingFlow(id));
            }
        }
        for record in self.records.values() {
            if record.status == CubeStatus::Synced && record.remote_id.is_none() {
                return Err(InvariantViolation::SyncedWithoutRemoteId(record.local_id));
            }
        }
        Ok(())
    }

    fn lookup_mut(&mut self, id: LocalId, op: &'static str) -> Option<&mut CubeRecord> {
        let record = self.records.get_mut(&id);
        if record.is_none() {
            tracing::debug!(id = %id.short(), op, "ignoring action for unknown cube");
        }
        record
    }

    fn flush_buffer(&mut self) {
        if let Some(list) = self.buffer.take() {
            self.apply_snapshot(list);
        }
    }

    /// Replace every remote-origin record with the contents of `list`.
    ///
    /// Local-origin and pending records are kept. A document whose remote id
    /// matches a known record keeps that record's local id; a local record
    /// seen in the list becomes remote-origin so later deletions apply to it.
    fn apply_snapshot(&mut self, list: Vec<RemoteCube>) -> SnapshotStats {
        let _span = tracing::debug_span!("apply_snapshot", len = list.len()).entered();
        let mut previous = std::mem::take(&mut self.records);
        let by_remote: HashMap<RemoteId, LocalId> = previous
            .values()
            .filter_map(|r| r.remote_id.clone().map(|rid| (rid, r.local_id)))
            .collect();

        let mut next: BTreeMap<LocalId, CubeRecord> = BTreeMap::new();
        let kept: Vec<LocalId> = previous
            .values()
            .filter(|r| r.origin == Origin::Local || Some(r.local_id) == self.active_flow)
            .map(|r| r.local_id)
            .collect();
        for id in kept {
            if let Some(record) = previous.remove(&id) {
                next.insert(id, record);
            }
        }

        let mut stats = SnapshotStats::default();
        let mut seen: HashSet<RemoteId> = HashSet::new();
        for doc in list {
            if !seen.insert(doc.remote_id.clone()) {
                continue;
            }
            if let Some(&id) = by_remote.get(&doc.remote_id) {
                if let Some(local) = next.get_mut(&id) {
                    if local.origin == Origin::Local {
                        local.origin = Origin::Remote;
                        stats.echoed += 1;
                    }
                    continue;
                }
                previous.remove(&id);
                next.insert(id, CubeRecord::from_remote(id, doc));
                stats.updated += 1;
                continue;
            }
            let id = doc
                .cube
                .local_id
                .filter(|l| !next.contains_key(l) && !previous.contains_key(l))
                .unwrap_or_else(LocalId::new);
            next.insert(id, CubeRecord::from_remote(id, doc));
            stats.added += 1;
        }

        stats.removed = previous.len();
        self.records = next;
        tracing::debug!(
            added = stats.added,
            updated = stats.updated,
            removed = stats.removed,
            echoed = stats.echoed,
            "snapshot applied"
        );
        self.events.push(StoreEvent::SnapshotApplied(stats));
        stats
    }
}

fn invalid(record: &CubeRecord, op: &'static str) -> StoreError {
    StoreError::InvalidTransition {
        id: record.local_id,
        status: record.status,
        op,
    }
}
