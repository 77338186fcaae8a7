use glam::Vec3;
use serde::{Deserialize, Serialize};
use tower_common::LocalId;

use crate::pose::{SphericalPose, ease_in_out_cubic};

/// Framings and timings for the orchestrated camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Duration of every transition, in seconds.
    pub transition_secs: f32,
    /// Quiet period after a drop resolves before returning to base framing.
    pub cooldown_secs: f32,
    pub base_radius: f32,
    /// Extra orbit radius per unit of tower height.
    pub base_radius_per_height: f32,
    pub base_polar: f32,
    pub base_azimuth: f32,
    pub placing_radius: f32,
    pub placing_polar: f32,
    /// How far above the tower top the drop zone sits.
    pub placing_height: f32,
    pub focus_radius: f32,
    pub focus_polar: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            transition_secs: 0.9,
            cooldown_secs: 0.7,
            base_radius: 14.0,
            base_radius_per_height: 0.6,
            base_polar: 1.1,
            base_azimuth: 0.6,
            placing_radius: 22.0,
            placing_polar: 0.8,
            placing_height: 4.0,
            focus_radius: 6.0,
            focus_polar: 1.25,
        }
    }
}

/// Which framing the camera is in, or heading to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    /// Framed on the tallest settled cube.
    Base,
    /// Wide framing over the drop zone.
    Placing,
    /// Close framing on one cube.
    Focus(LocalId),
}

impl CameraMode {
    pub fn kind(self) -> TransitionKind {
        match self {
            Self::Base => TransitionKind::Base,
            Self::Placing => TransitionKind::Placing,
            Self::Focus(_) => TransitionKind::Focus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Base,
    Placing,
    Focus,
}

/// One in-flight camera move. Discarded on completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTransition {
    pub from: SphericalPose,
    pub to: SphericalPose,
    pub progress: f32,
    pub kind: TransitionKind,
    pub focus_target: Option<LocalId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraEvent {
    /// A transition reached its target pose.
    Arrived {
        kind: TransitionKind,
        focus: Option<LocalId>,
    },
}

/// Finite-state camera driver: BASE, PLACING and FOCUS framings.
///
/// Inputs (placement flag, drop in flight, focus target, tower height) are
/// set by the caller; [`CameraOrchestrator::update`] decides the framing and
/// advances the current transition.
#[derive(Debug)]
pub struct CameraOrchestrator {
    pub config: CameraConfig,
    mode: CameraMode,
    pose: SphericalPose,
    transition: Option<CameraTransition>,
    placement_enabled: bool,
    drop_in_flight: bool,
    focus: Option<(LocalId, Vec3)>,
    tower_height: f32,
    cooldown: f32,
    events: Vec<CameraEvent>,
}

impl CameraOrchestrator {
    /// Start at rest in base framing over an empty scene.
    pub fn new(config: CameraConfig) -> Self {
        let mut camera = Self {
            config,
            mode: CameraMode::Base,
            pose: SphericalPose::new(0.0, 0.0, 0.0, Vec3::ZERO),
            transition: None,
            placement_enabled: false,
            drop_in_flight: false,
            focus: None,
            tower_height: 0.0,
            cooldown: 0.0,
            events: Vec::new(),
        };
        camera.pose = camera.base_pose();
        camera
    }

    /// Live, interpolated pose.
    pub fn pose(&self) -> SphericalPose {
        self.pose
    }

    pub fn eye(&self) -> Vec3 {
        self.pose.eye()
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    pub fn transition(&self) -> Option<&CameraTransition> {
        self.transition.as_ref()
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.is_some()
    }

    pub fn focus_target(&self) -> Option<LocalId> {
        self.focus.map(|(id, _)| id)
    }

    pub fn placement_enabled(&self) -> bool {
        self.placement_enabled
    }

    pub fn cooldown_remaining(&self) -> f32 {
        self.cooldown
    }

    pub fn drain_events(&mut self) -> Vec<CameraEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn set_placement(&mut self, enabled: bool) {
        self.placement_enabled = enabled;
    }

    pub fn set_drop_in_flight(&mut self, in_flight: bool) {
        self.drop_in_flight = in_flight;
    }

    /// Frame `id` resting at `position`.
    pub fn focus(&mut self, id: LocalId, position: Vec3) {
        self.focus = Some((id, position));
    }

    /// Release the focus target and hold framing for the cooldown window.
    pub fn clear_focus(&mut self) {
        if self.focus.take().is_some() {
            self.start_cooldown();
        }
    }

    /// Hold the current framing for the cooldown window.
    pub fn start_cooldown(&mut self) {
        self.cooldown = self.config.cooldown_secs;
    }

    /// New tower height. Base and placing framings follow it.
    pub fn set_tower_height(&mut self, height: f32) {
        self.tower_height = height;
    }

    /// Jump to the end of the current transition, raising its arrival.
    pub fn finish_transition(&mut self) -> bool {
        let Some(t) = self.transition.take() else {
            return false;
        };
        self.pose = t.to;
        self.arrive(t);
        true
    }

    /// Advance by `dt` seconds: re-evaluate the framing, then step the transition.
    pub fn update(&mut self, dt: f32) {
        self.cooldown = (self.cooldown - dt).max(0.0);

        if let Some(mode) = self.desired_mode() {
            let target = self.target_for(mode);
            let retarget = match &self.transition {
                Some(t) => !t.to.approx_eq(&target, 1e-3),
                None => !self.pose.approx_eq(&target, 1e-3),
            };
            if mode != self.mode || retarget {
                self.begin(mode, target);
            }
        }

        let Some(mut t) = self.transition else {
            return;
        };
        let step = if self.config.transition_secs > 0.0 {
            dt / self.config.transition_secs
        } else {
            1.0
        };
        t.progress = (t.progress + step).min(1.0);
        if t.progress >= 1.0 {
            self.pose = t.to;
            self.transition = None;
            self.arrive(t);
        } else {
            self.pose = t.from.lerp(&t.to, ease_in_out_cubic(t.progress));
            self.transition = Some(t);
        }
    }

    /// Framing the inputs call for, or `None` to hold the current one.
    fn desired_mode(&self) -> Option<CameraMode> {
        if let Some((id, _)) = self.focus {
            return Some(CameraMode::Focus(id));
        }
        if self.placement_enabled {
            return (!self.drop_in_flight).then_some(CameraMode::Placing);
        }
        (self.cooldown <= 0.0).then_some(CameraMode::Base)
    }

    fn begin(&mut self, mode: CameraMode, to: SphericalPose) {
        tracing::debug!(?mode, from = ?self.mode, "camera transition");
        self.mode = mode;
        self.transition = Some(CameraTransition {
            from: self.pose,
            to,
            progress: 0.0,
            kind: mode.kind(),
            focus_target: match mode {
                CameraMode::Focus(id) => Some(id),
                _ => None,
            },
        });
    }

    fn arrive(&mut self, t: CameraTransition) {
        tracing::debug!(kind = ?t.kind, "camera arrived");
        self.events.push(CameraEvent::Arrived {
            kind: t.kind,
            focus: t.focus_target,
        });
    }

    fn target_for(&self, mode: CameraMode) -> SphericalPose {
        match mode {
            CameraMode::Base => self.base_pose(),
            CameraMode::Placing => SphericalPose::new(
                self.config.placing_radius,
                self.config.placing_polar,
                self.config.base_azimuth,
                Vec3::new(0.0, self.tower_height + self.config.placing_height, 0.0),
            ),
            CameraMode::Focus(_) => {
                let position = self.focus.map_or(Vec3::ZERO, |(_, p)| p);
                // Keep the current heading so the camera swings in, not around.
                let azimuth = self.transition.map_or(self.pose.azimuth, |t| {
                    if t.kind == TransitionKind::Focus {
                        t.to.azimuth
                    } else {
                        self.pose.azimuth
                    }
                });
                SphericalPose::new(
                    self.config.focus_radius,
                    self.config.focus_polar,
                    azimuth,
                    position,
                )
            }
        }
    }

    fn base_pose(&self) -> SphericalPose {
        SphericalPose::new(
            self.config.base_radius + self.tower_height * self.config.base_radius_per_height,
            self.config.base_polar,
            self.config.base_azimuth,
            Vec3::new(0.0, self.tower_height, 0.0),
        )
    }
}

impl Default for CameraOrchestrator {
    fn default() -> Self {
        Self::new(CameraConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn run(camera: &mut CameraOrchestrator, secs: f32) {
        let frames = (secs / DT).ceil() as usize;
        for _ in 0..frames {
            camera.update(DT);
        }
    }

    #[test]
    fn starts_at_rest_in_base() {
        let mut camera = CameraOrchestrator::default();
        camera.update(DT);
        assert_eq!(camera.mode(), CameraMode::Base);
        assert!(!camera.is_transitioning());
        assert!(camera.drain_events().is_empty());
    }

    #[test]
    fn placement_moves_to_placing_and_arrives() {
        let mut camera = CameraOrchestrator::default();
        camera.set_placement(true);
        camera.update(DT);
        assert_eq!(camera.mode(), CameraMode::Placing);
        assert!(camera.is_transitioning());

        run(&mut camera, 1.0);
        assert!(!camera.is_transitioning());
        assert_eq!(
            camera.drain_events(),
            vec![CameraEvent::Arrived {
                kind: TransitionKind::Placing,
                focus: None
            }]
        );
        assert!((camera.pose().radius - camera.config.placing_radius).abs() < 1e-4);
    }

    #[test]
    fn placing_is_held_while_drop_in_flight() {
        let mut camera = CameraOrchestrator::default();
        camera.set_drop_in_flight(true);
        camera.set_placement(true);
        camera.update(DT);
        assert_eq!(camera.mode(), CameraMode::Base);
        assert!(!camera.is_transitioning());
    }

    #[test]
    fn progress_is_monotonic_and_restarts_from_live_pose() {
        let mut camera = CameraOrchestrator::default();
        camera.set_placement(true);
        let mut last = 0.0;
        for _ in 0..20 {
            camera.update(DT);
            let p = camera.transition().unwrap().progress;
            assert!(p >= last);
            last = p;
        }
        let live = camera.pose();
        let old_target = camera.transition().unwrap().to;

        let id = LocalId::new();
        camera.focus(id, Vec3::new(1.0, 0.5, 0.0));
        camera.update(0.0);
        let t = camera.transition().unwrap();
        assert_eq!(t.kind, TransitionKind::Focus);
        assert_eq!(t.progress, 0.0);
        assert_eq!(t.from, live);
        assert_ne!(t.from, old_target);
        assert_eq!(t.focus_target, Some(id));
    }

    #[test]
    fn focus_arrival_names_target() {
        let mut camera = CameraOrchestrator::default();
        let id = LocalId::new();
        camera.focus(id, Vec3::new(0.0, 0.5, 0.0));
        run(&mut camera, 1.0);
        assert_eq!(camera.mode(), CameraMode::Focus(id));
        assert_eq!(
            camera.drain_events(),
            vec![CameraEvent::Arrived {
                kind: TransitionKind::Focus,
                focus: Some(id)
            }]
        );
        assert!(camera.pose().target.abs_diff_eq(Vec3::new(0.0, 0.5, 0.0), 1e-5));
    }

    #[test]
    fn base_waits_for_cooldown_after_focus_clears() {
        let mut camera = CameraOrchestrator::default();
        let id = LocalId::new();
        camera.focus(id, Vec3::new(0.0, 0.5, 0.0));
        run(&mut camera, 1.0);
        camera.drain_events();

        camera.clear_focus();
        run(&mut camera, 0.5);
        assert_eq!(camera.mode(), CameraMode::Focus(id));
        assert!(!camera.is_transitioning());

        run(&mut camera, 0.25);
        assert_eq!(camera.mode(), CameraMode::Base);
    }

    #[test]
    fn finish_transition_snaps_and_reports() {
        let mut camera = CameraOrchestrator::default();
        let id = LocalId::new();
        camera.focus(id, Vec3::new(2.0, 0.5, 0.0));
        camera.update(DT);
        assert!(camera.finish_transition());
        assert!(camera.pose().target.abs_diff_eq(Vec3::new(2.0, 0.5, 0.0), 1e-5));
        assert_eq!(camera.drain_events().len(), 1);
        assert!(!camera.finish_transition());
    }

    #[test]
    fn base_follows_tower_height() {
        let mut camera = CameraOrchestrator::default();
        camera.set_tower_height(5.0);
        run(&mut camera, 1.0);
        assert_eq!(camera.mode(), CameraMode::Base);
        assert!((camera.pose().target.y - 5.0).abs() < 1e-4);
    }
}
