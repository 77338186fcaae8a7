use glam::Vec3;
use serde::Serialize;
use tower_camera::{CameraEvent, CameraMode, CameraOrchestrator, TransitionKind};
use tower_common::{Color, LocalId, Pose, RemoteId, SceneHandle, Timestamp, UserId};
use tower_kernel::{
    CubeStore, DropPayload, NewCube, RemoteAck, RemoteCube, SnapshotDisposition, StoreError,
};
use tower_scene::{IdentityMapper, PhysicsWorld, SettleDetector, SettleEvent};

use crate::config::{FlowConfig, TowerConfig};
use crate::view::{CubeView, IdentityDirectory, Presentation};

/// Where the local transaction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Idle,
    /// Placement enabled, camera heading to the drop zone.
    Placing,
    /// Camera framed on the drop zone, waiting for the visitor.
    AwaitingDrop,
    AwaitingSettle,
    AwaitingFocus,
    /// Camera arrived on the cube; identity entry is open.
    EditingIdentity,
    Saving,
    Synced,
    Error,
}

impl FlowState {
    /// States with nothing left to abandon.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Synced)
    }
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FlowEvent {
    Dropped { id: LocalId },
    Settled { id: LocalId, pose: Pose },
    FocusArrived { id: LocalId },
    Saved { id: LocalId, remote_id: RemoteId },
    SaveFailed { id: LocalId, message: String },
    /// The flow was abandoned. `id` is the removed cube, if one had been dropped.
    FlowAborted { id: Option<LocalId> },
    SceneSettled {
        tower_height: f32,
        highest: Option<LocalId>,
    },
}

/// Identity the visitor chose to attach to their cube.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<UserId>,
    pub display_name: Option<String>,
}

/// A document the host should append to the backing store, then report back
/// through [`FlowController::on_save_result`].
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub local_id: LocalId,
    pub cube: NewCube,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FlowError {
    #[error("cannot {op} while {state:?}")]
    WrongState { state: FlowState, op: &'static str },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sequences the drop -> settle -> focus -> save -> confirm/fail/abandon
/// transaction over the store, identity mapper, settle detector and camera.
///
/// The controller owns all four. Hosts drive it with one [`update`] per
/// frame and feed it remote snapshots and save results as they arrive.
///
/// [`update`]: FlowController::update
#[derive(Debug)]
pub struct FlowController {
    config: FlowConfig,
    store: CubeStore,
    mapper: IdentityMapper,
    settle: SettleDetector,
    camera: CameraOrchestrator,
    state: FlowState,
    /// Seconds spent in the current state; drives the watchdogs.
    state_elapsed: f32,
    outbox: Option<SaveRequest>,
    selected: Option<LocalId>,
    events: Vec<FlowEvent>,
}

impl FlowController {
    pub fn new(config: TowerConfig) -> Self {
        Self::with_store(CubeStore::new(), config)
    }

    /// Build around an existing store, e.g. one carrying a seed list.
    pub fn with_store(store: CubeStore, config: TowerConfig) -> Self {
        let mut flow = Self {
            config: config.flow,
            store,
            mapper: IdentityMapper::new(),
            settle: SettleDetector::new(config.settle),
            camera: CameraOrchestrator::new(config.camera),
            state: FlowState::Idle,
            state_elapsed: 0.0,
            outbox: None,
            selected: None,
            events: Vec::new(),
        };
        flow.reconcile();
        flow
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn store(&self) -> &CubeStore {
        &self.store
    }

    pub fn camera(&self) -> &CameraOrchestrator {
        &self.camera
    }

    pub fn settle(&self) -> &SettleDetector {
        &self.settle
    }

    pub fn mapper(&self) -> &IdentityMapper {
        &self.mapper
    }

    pub fn active_flow(&self) -> Option<LocalId> {
        self.store.active_flow()
    }

    pub fn selected(&self) -> Option<LocalId> {
        self.selected
    }

    /// Handle of the active flow's cube, if it has one.
    pub fn active_handle(&self) -> Option<SceneHandle> {
        self.store
            .active_flow()
            .and_then(|id| self.mapper.handle_of(id))
    }

    pub fn drain_events(&mut self) -> Vec<FlowEvent> {
        std::mem::take(&mut self.events)
    }

    /// Turn placement mode on.
    pub fn enter_placement(&mut self) -> Result<(), FlowError> {
        match self.state {
            FlowState::Idle | FlowState::Synced => {}
            FlowState::Placing | FlowState::AwaitingDrop => return Ok(()),
            state => return Err(FlowError::WrongState { state, op: "enter placement" }),
        }
        self.clear_selection();
        self.camera.set_placement(true);
        self.enter(FlowState::Placing);
        Ok(())
    }

    /// Turn placement mode off without dropping.
    pub fn exit_placement(&mut self) -> Result<(), FlowError> {
        match self.state {
            FlowState::Placing | FlowState::AwaitingDrop => {}
            state => return Err(FlowError::WrongState { state, op: "exit placement" }),
        }
        self.camera.set_placement(false);
        self.camera.start_cooldown();
        self.enter(FlowState::Idle);
        Ok(())
    }

    /// Drop a new cube at `position` and start watching it settle.
    pub fn drop_cube(
        &mut self,
        color: Color,
        position: Vec3,
        user_id: Option<UserId>,
        physics: &mut dyn PhysicsWorld,
    ) -> Result<LocalId, FlowError> {
        match self.state {
            FlowState::Placing | FlowState::AwaitingDrop => {}
            state => return Err(FlowError::WrongState { state, op: "drop" }),
        }
        let created_at = Timestamp::now();
        let id = self.store.drop_cube(DropPayload {
            color,
            position,
            user_id,
            created_at,
        })?;
        let handle = self.mapper.get_or_create_handle(id);
        self.settle.register(
            handle,
            Some(created_at),
            Some(Pose::new(position, glam::Quat::IDENTITY)),
        );
        self.settle.watch(handle);
        physics.set_linear_velocity(handle, self.config.drop_velocity);
        self.camera.set_drop_in_flight(true);
        self.events.push(FlowEvent::Dropped { id });
        self.enter(FlowState::AwaitingSettle);
        Ok(id)
    }

    /// Close identity entry and queue the save. `None` saves anonymously.
    pub fn submit_identity(&mut self, identity: Option<Identity>) -> Result<(), FlowError> {
        if self.state != FlowState::EditingIdentity {
            return Err(FlowError::WrongState {
                state: self.state,
                op: "submit identity",
            });
        }
        let Some(id) = self.store.active_flow() else {
            return Err(FlowError::WrongState {
                state: self.state,
                op: "submit identity",
            });
        };
        if let Some(identity) = identity {
            self.store
                .attach_identity(id, identity.user_id, identity.display_name.as_deref())?;
        }
        self.queue_save(id)
    }

    /// Retry a failed save.
    pub fn retry_save(&mut self) -> Result<(), FlowError> {
        let Some(id) = self.store.active_flow().filter(|_| self.state == FlowState::Error) else {
            return Err(FlowError::WrongState {
                state: self.state,
                op: "retry save",
            });
        };
        self.queue_save(id)
    }

    /// Pending append for the host to perform.
    pub fn take_save_request(&mut self) -> Option<SaveRequest> {
        self.outbox.take()
    }

    /// Report the outcome of an append. Results for cubes that are no longer
    /// the active flow (e.g. abandoned meanwhile) are ignored.
    pub fn on_save_result(
        &mut self,
        id: LocalId,
        result: Result<RemoteAck, String>,
    ) -> Result<(), FlowError> {
        let is_active = self.store.active_flow() == Some(id);
        match result {
            Ok(ack) => {
                let remote_id = ack.remote_id.clone();
                let applied = self.store.confirm_save(id, ack.remote_id, ack.created_at)?;
                if applied && is_active {
                    self.camera.clear_focus();
                    self.events.push(FlowEvent::Saved { id, remote_id });
                    self.enter(FlowState::Synced);
                }
            }
            Err(message) => {
                if self.store.fail_save(id, message.clone())? && is_active {
                    self.events.push(FlowEvent::SaveFailed { id, message });
                    self.enter(FlowState::Error);
                }
            }
        }
        self.reconcile();
        Ok(())
    }

    /// Cancel the active flow from any state. Safe to call repeatedly.
    ///
    /// Returns the removed cube, if one had been dropped.
    pub fn abandon(&mut self) -> Option<LocalId> {
        if self.state.is_terminal() && self.store.active_flow().is_none() {
            return None;
        }
        let removed = self.store.abandon_flow().map(|r| r.local_id);
        if let Some(id) = removed {
            if let Some(handle) = self.mapper.release_by_local_id(id) {
                self.settle.unregister(handle);
            }
        }
        self.outbox = None;
        self.selected = None;
        self.camera.set_placement(false);
        self.camera.set_drop_in_flight(false);
        self.camera.clear_focus();
        tracing::debug!(state = ?self.state, removed = removed.is_some(), "flow abandoned");
        self.events.push(FlowEvent::FlowAborted { id: removed });
        self.enter(FlowState::Idle);
        self.reconcile();
        removed
    }

    /// Leave the synced state once the UI has shown the result.
    pub fn dismiss(&mut self) {
        if self.state == FlowState::Synced {
            self.enter(FlowState::Idle);
        }
    }

    /// Focus the camera on any settled cube. Only while no flow is in progress.
    pub fn select(&mut self, id: LocalId) -> Result<bool, FlowError> {
        if !self.state.is_terminal() {
            return Err(FlowError::WrongState {
                state: self.state,
                op: "select",
            });
        }
        let Some(pose) = self.store.get(id).and_then(|r| r.final_pose()) else {
            return Ok(false);
        };
        self.selected = Some(id);
        self.camera.focus(id, pose.position);
        Ok(true)
    }

    pub fn clear_selection(&mut self) {
        if self.selected.take().is_some() {
            self.camera.clear_focus();
        }
    }

    /// Full remote list from the feed.
    pub fn on_remote_snapshot(&mut self, list: Vec<RemoteCube>) -> SnapshotDisposition {
        let disposition = self.store.on_remote_snapshot(list);
        self.reconcile();
        disposition
    }

    pub fn on_remote_error(&mut self, message: impl Into<String>) {
        self.store.on_remote_error(message);
        self.reconcile();
    }

    /// Advance one frame: mappings, settle detection, camera, then watchdogs.
    pub fn update(&mut self, dt: f32, physics: &mut dyn PhysicsWorld) {
        let _span = tracing::trace_span!("flow_update", state = ?self.state).entered();
        self.state_elapsed += dt;
        self.reconcile();
        for event in self.store.drain_events() {
            tracing::trace!(?event, "store");
        }

        self.settle.update(physics);
        self.process_settle_events();

        self.camera.update(dt);
        self.process_camera_events();

        self.run_watchdogs();
    }

    /// Snapshot for the UI layer.
    pub fn presentation(&self, directory: &dyn IdentityDirectory) -> Presentation {
        let active = self.store.active_flow();
        let highest = self.settle.highest().map(|h| h.handle);
        let mut cubes: Vec<CubeView> = self
            .store
            .records()
            .values()
            .map(|record| {
                let handle = self.mapper.handle_of(record.local_id);
                let pose = handle
                    .and_then(|h| self.settle.last_pose(h))
                    .or_else(|| record.final_pose())
                    .unwrap_or_else(|| Pose::new(record.drop_position, glam::Quat::IDENTITY));
                let profile = record
                    .user_id
                    .as_ref()
                    .and_then(|user| directory.profile(user));
                let label = profile
                    .as_ref()
                    .and_then(|p| p.display_name.clone())
                    .or_else(|| record.display_name.clone());
                CubeView {
                    local_id: record.local_id,
                    handle: handle.map(|h| h.0),
                    status: record.status,
                    color: record.color,
                    position: pose.position,
                    rotation: pose.rotation,
                    label,
                    photo_url: profile.and_then(|p| p.photo_url),
                    is_highest: handle.is_some() && handle == highest,
                    is_active: Some(record.local_id) == active,
                    error: record.last_error.clone(),
                }
            })
            .collect();
        cubes.sort_by_key(|c| {
            let r = &self.store.records()[&c.local_id];
            (r.created_at_remote.unwrap_or(r.created_at_local), c.local_id)
        });
        Presentation {
            cubes,
            active_flow: active,
            state: self.state,
            camera: self.camera.pose(),
            camera_kind: self.camera.mode().kind(),
            tower_height: self.settle.tower_height(),
            feed_degraded: self.store.feed_error().is_some(),
        }
    }

    fn enter(&mut self, state: FlowState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "flow state");
        }
        self.state = state;
        self.state_elapsed = 0.0;
    }

    fn queue_save(&mut self, id: LocalId) -> Result<(), FlowError> {
        self.store.request_save(id)?;
        self.outbox = self
            .store
            .get(id)
            .and_then(|r| r.to_new_cube())
            .map(|cube| SaveRequest { local_id: id, cube });
        self.enter(FlowState::Saving);
        Ok(())
    }

    /// Give every record a handle and a tracked body, and tear down those
    /// whose record is gone.
    fn reconcile(&mut self) {
        for record in self.store.records().values() {
            let handle = self.mapper.get_or_create_handle(record.local_id);
            if !self.settle.is_registered(handle) {
                let created_at = Some(record.created_at_remote.unwrap_or(record.created_at_local));
                match record.final_pose() {
                    Some(pose) => self.settle.register_resting(handle, created_at, pose),
                    None => self.settle.register(handle, created_at, None),
                }
            }
        }
        let store = &self.store;
        for handle in self.mapper.retain(|id| store.get(id).is_some()) {
            self.settle.unregister(handle);
        }
        if let Some(id) = self.selected {
            if self.store.get(id).is_none() {
                self.clear_selection();
            }
        }
    }

    fn process_settle_events(&mut self) {
        for event in self.settle.drain_events() {
            match event {
                SettleEvent::CubeSettled { handle, pose } => self.on_cube_settled(handle, pose),
                SettleEvent::SceneSettled {
                    highest,
                    tower_height,
                } => {
                    self.camera.set_tower_height(tower_height);
                    let highest = highest.and_then(|h| self.mapper.local_of(h.handle));
                    self.events.push(FlowEvent::SceneSettled {
                        tower_height,
                        highest,
                    });
                }
                SettleEvent::SceneMoving => tracing::trace!("scene moving"),
            }
        }
    }

    fn on_cube_settled(&mut self, handle: SceneHandle, pose: Pose) {
        let Some(id) = self.mapper.local_of(handle) else {
            return;
        };
        if self.state != FlowState::AwaitingSettle || self.store.active_flow() != Some(id) {
            return;
        }
        match self.store.settle_cube(id, pose.position, pose.rotation) {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                tracing::warn!(%err, "settle rejected");
                return;
            }
        }
        self.camera.set_drop_in_flight(false);
        self.camera.set_placement(false);
        self.camera.start_cooldown();
        self.camera.focus(id, pose.position);
        self.events.push(FlowEvent::Settled { id, pose });
        self.enter(FlowState::AwaitingFocus);
    }

    fn process_camera_events(&mut self) {
        for event in self.camera.drain_events() {
            let CameraEvent::Arrived { kind, focus } = event;
            match (kind, focus) {
                (TransitionKind::Placing, _) if self.state == FlowState::Placing => {
                    self.enter(FlowState::AwaitingDrop);
                }
                (TransitionKind::Focus, Some(id)) => {
                    if self.state == FlowState::AwaitingFocus && self.store.active_flow() == Some(id)
                    {
                        self.enter(FlowState::EditingIdentity);
                    }
                    self.events.push(FlowEvent::FocusArrived { id });
                }
                _ => {}
            }
        }
    }

    fn run_watchdogs(&mut self) {
        match self.state {
            FlowState::AwaitingSettle if self.state_elapsed > self.config.settle_timeout_secs => {
                let Some((id, handle)) = self
                    .store
                    .active_record()
                    .map(|r| r.local_id)
                    .zip(self.active_handle())
                else {
                    return;
                };
                tracing::warn!(id = %id.short(), "settle watchdog expired");
                let fallback = self
                    .store
                    .get(id)
                    .map(|r| Pose::new(r.drop_position, glam::Quat::IDENTITY))
                    .unwrap_or_default();
                self.settle.force_settle(handle, fallback);
                self.process_settle_events();
            }
            FlowState::AwaitingFocus if self.state_elapsed > self.config.focus_timeout_secs => {
                tracing::warn!("focus watchdog expired");
                self.camera.finish_transition();
                self.process_camera_events();
                // Camera may already have been on target with nothing to finish.
                if self.state == FlowState::AwaitingFocus {
                    if let (Some(id), CameraMode::Focus(target)) =
                        (self.store.active_flow(), self.camera.mode())
                    {
                        if id == target {
                            self.events.push(FlowEvent::FocusArrived { id });
                        }
                    }
                    self.enter(FlowState::EditingIdentity);
                }
            }
            _ => {}
        }
    }
}
