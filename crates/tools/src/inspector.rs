use std::fmt;

use serde::Serialize;
use tower_camera::TransitionKind;
use tower_common::{LocalId, RemoteId};
use tower_flow::{FlowController, FlowState};
use tower_kernel::{CubeRecord, CubeStatus, Origin};

/// Tower inspector for developer tooling.
///
/// Read-only queries against a flow controller and the store, scene and
/// camera it owns, for debugging and CLI output.
pub struct TowerInspector;

impl TowerInspector {
    pub fn summary(flow: &FlowController) -> TowerSummary {
        let store = flow.store();
        let count = |status: CubeStatus| {
            store
                .records()
                .values()
                .filter(|r| r.status == status)
                .count()
        };
        TowerSummary {
            state: flow.state(),
            cubes: store.len(),
            draft: count(CubeStatus::Draft),
            saving: count(CubeStatus::Saving),
            synced: count(CubeStatus::Synced),
            error: count(CubeStatus::Error),
            active_flow: store.active_flow(),
            buffered_snapshot: store.pending_buffer().map(<[_]>::len),
            feed_error: store.feed_error().map(str::to_owned),
            tower_height: flow.settle().tower_height(),
            camera: flow.camera().mode().kind(),
            camera_transitioning: flow.camera().is_transitioning(),
            scene_handles: flow.mapper().len(),
        }
    }

    pub fn inspect_cube(flow: &FlowController, id: LocalId) -> Option<CubeInfo> {
        flow.store().get(id).map(|record| cube_info(flow, record))
    }

    /// Every cube, oldest first.
    pub fn list_cubes(flow: &FlowController) -> Vec<CubeInfo> {
        let mut records: Vec<&CubeRecord> = flow.store().records().values().collect();
        records.sort_by_key(|r| (r.created_at_remote.unwrap_or(r.created_at_local), r.local_id));
        records.into_iter().map(|r| cube_info(flow, r)).collect()
    }
}

fn cube_info(flow: &FlowController, record: &CubeRecord) -> CubeInfo {
    let handle = flow.mapper().handle_of(record.local_id);
    let position = handle
        .and_then(|h| flow.settle().last_pose(h))
        .map_or_else(|| record.position(), |pose| pose.position);
    CubeInfo {
        local_id: record.local_id,
        remote_id: record.remote_id.clone(),
        status: record.status,
        origin: record.origin,
        handle: handle.map(|h| h.0),
        position: position.to_array(),
        settled: handle.is_some_and(|h| flow.settle().is_settled(h)),
        display_name: record.display_name.clone(),
        last_error: record.last_error.clone(),
    }
}

/// Summary of a tower session for the inspector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TowerSummary {
    pub state: FlowState,
    pub cubes: usize,
    pub draft: usize,
    pub saving: usize,
    pub synced: usize,
    pub error: usize,
    pub active_flow: Option<LocalId>,
    /// Length of the remote list held back behind the active flow.
    pub buffered_snapshot: Option<usize>,
    pub feed_error: Option<String>,
    pub tower_height: f32,
    pub camera: TransitionKind,
    pub camera_transitioning: bool,
    pub scene_handles: usize,
}

impl fmt::Display for TowerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tower: state={:?} cubes={} (draft={} saving={} synced={} error={}) height={:.2} camera={:?}",
            self.state,
            self.cubes,
            self.draft,
            self.saving,
            self.synced,
            self.error,
            self.tower_height,
            self.camera,
        )?;
        if let Some(id) = self.active_flow {
            write!(f, " active={}", id.short())?;
        }
        if let Some(len) = self.buffered_snapshot {
            write!(f, " buffered={len}")?;
        }
        if let Some(err) = &self.feed_error {
            write!(f, " feed_error={err:?}")?;
        }
        Ok(())
    }
}

/// Detailed info about a single cube.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CubeInfo {
    pub local_id: LocalId,
    pub remote_id: Option<RemoteId>,
    pub status: CubeStatus,
    pub origin: Origin,
    pub handle: Option<u64>,
    pub position: [f32; 3],
    pub settled: bool,
    pub display_name: Option<String>,
    pub last_error: Option<String>,
}

impl fmt::Display for CubeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cube [{}] {} pos=({:.2}, {:.2}, {:.2})",
            self.local_id.short(),
            self.status.as_str(),
            self.position[0],
            self.position[1],
            self.position[2],
        )?;
        if let Some(remote) = &self.remote_id {
            write!(f, " remote={remote}")?;
        }
        if let Some(name) = &self.display_name {
            write!(f, " name={name:?}")?;
        }
        if let Some(err) = &self.last_error {
            write!(f, " error={err:?}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};
    use tower_common::{Color, Timestamp};
    use tower_flow::TowerConfig;
    use tower_kernel::{NewCube, RemoteCube};
    use tower_scene::ScriptedPhysics;

    fn remote(id: &str, y: f32, created: u64) -> RemoteCube {
        RemoteCube {
            remote_id: RemoteId::from(id),
            created_at: Timestamp(created),
            cube: NewCube {
                local_id: None,
                user_id: None,
                display_name: Some(format!("name-{id}")),
                color: Color::rgb(9, 9, 9),
                position: Vec3::new(0.0, y, 0.0),
                rotation: Quat::IDENTITY,
                created_at_local: Timestamp(created),
            },
        }
    }

    #[test]
    fn summary_empty_tower() {
        let flow = FlowController::new(TowerConfig::default());
        let summary = TowerInspector::summary(&flow);
        assert_eq!(summary.state, FlowState::Idle);
        assert_eq!(summary.cubes, 0);
        assert_eq!(summary.camera, TransitionKind::Base);
        assert!(summary.active_flow.is_none());
        assert!(format!("{summary}").contains("cubes=0"));
    }

    #[test]
    fn summary_counts_statuses_and_active_flow() {
        let mut flow = FlowController::new(TowerConfig::default());
        let mut physics = ScriptedPhysics::new();
        flow.on_remote_snapshot(vec![remote("r-1", 0.5, 10), remote("r-2", 1.5, 20)]);
        flow.enter_placement().unwrap();
        let id = flow
            .drop_cube(Color::rgb(1, 1, 1), Vec3::new(0.0, 6.0, 0.0), None, &mut physics)
            .unwrap();
        flow.on_remote_snapshot(vec![remote("r-1", 0.5, 10)]);

        let summary = TowerInspector::summary(&flow);
        assert_eq!(summary.cubes, 3);
        assert_eq!((summary.draft, summary.synced), (1, 2));
        assert_eq!(summary.active_flow, Some(id));
        assert_eq!(summary.buffered_snapshot, Some(1));
        assert_eq!(summary.scene_handles, 3);
        let text = summary.to_string();
        assert!(text.contains(&format!("active={}", id.short())));
        assert!(text.contains("buffered=1"));
    }

    #[test]
    fn list_cubes_oldest_first() {
        let mut flow = FlowController::new(TowerConfig::default());
        flow.on_remote_snapshot(vec![remote("late", 1.5, 20), remote("early", 0.5, 10)]);
        let cubes = TowerInspector::list_cubes(&flow);
        let ids: Vec<&str> = cubes
            .iter()
            .filter_map(|c| c.remote_id.as_ref().map(RemoteId::as_str))
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert!(cubes.iter().all(|c| c.handle.is_some()));
        assert_eq!(cubes[1].position, [0.0, 1.5, 0.0]);
    }

    #[test]
    fn inspect_cube_found_and_missing() {
        let mut flow = FlowController::new(TowerConfig::default());
        flow.on_remote_snapshot(vec![remote("r-1", 0.5, 10)]);
        let id = *flow.store().records().keys().next().unwrap();
        let info = TowerInspector::inspect_cube(&flow, id).unwrap();
        assert_eq!(info.status, CubeStatus::Synced);
        assert_eq!(info.origin, Origin::Remote);
        let text = info.to_string();
        assert!(text.contains("synced"));
        assert!(text.contains("remote=r-1"));
        assert!(TowerInspector::inspect_cube(&flow, LocalId::new()).is_none());
    }
}
