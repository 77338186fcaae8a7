use glam::{Quat, Vec3};
use tower_common::{Pose, SceneHandle};

/// One body's state as reported by the physics simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodySample {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Explicit rest flag, when the simulation exposes one.
    pub is_sleeping: Option<bool>,
}

impl BodySample {
    /// A motionless body at `position`.
    pub fn at_rest(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            is_sleeping: None,
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }
}

/// Read/write contract with the physics simulation.
///
/// Bodies are keyed by scene handle and use a fixed-size cuboid collider.
pub trait PhysicsWorld {
    /// Current state of a body, or `None` if no body exists for `handle`.
    fn body(&self, handle: SceneHandle) -> Option<BodySample>;

    /// Give a freshly dropped body its initial velocity.
    fn set_linear_velocity(&mut self, handle: SceneHandle, velocity: Vec3);
}

/// Physics world whose bodies are set by hand, for tests.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Default)]
pub struct ScriptedPhysics {
    bodies: std::collections::HashMap<SceneHandle, BodySample>,
    /// Every velocity write, in order.
    pub impulses: Vec<(SceneHandle, Vec3)>,
}

#[cfg(any(test, feature = "testing"))]
impl ScriptedPhysics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, handle: SceneHandle, sample: BodySample) {
        self.bodies.insert(handle, sample);
    }

    /// Set a body moving straight down at `speed`.
    pub fn falling(&mut self, handle: SceneHandle, position: Vec3, speed: f32) {
        let mut sample = BodySample::at_rest(position);
        sample.linear_velocity = Vec3::new(0.0, -speed, 0.0);
        self.bodies.insert(handle, sample);
    }

    pub fn remove(&mut self, handle: SceneHandle) {
        self.bodies.remove(&handle);
    }
}

#[cfg(any(test, feature = "testing"))]
impl PhysicsWorld for ScriptedPhysics {
    fn body(&self, handle: SceneHandle) -> Option<BodySample> {
        self.bodies.get(&handle).copied()
    }

    fn set_linear_velocity(&mut self, handle: SceneHandle, velocity: Vec3) {
        self.impulses.push((handle, velocity));
        if let Some(body) = self.bodies.get_mut(&handle) {
            body.linear_velocity = velocity;
        }
    }
}
