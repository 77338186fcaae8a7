//! Toy stacking physics for headless sessions: gravity, unit cubes landing on
//! the ground or on resting cubes below them, one damped bounce.

use std::collections::{BTreeMap, HashMap};

use glam::{Quat, Vec3};
use tower_common::{CUBE_HALF_EXTENT, Pose, SceneHandle};
use tower_flow::FlowController;
use tower_scene::{BodySample, PhysicsWorld};

const GRAVITY: f32 = 9.81;
/// Landing speed above which a cube bounces instead of stopping.
const BOUNCE_SPEED: f32 = 2.0;
const RESTITUTION: f32 = 0.25;

#[derive(Debug, Clone)]
struct SimBody {
    position: Vec3,
    rotation: Quat,
    velocity: Vec3,
    resting: bool,
}

#[derive(Debug, Default)]
pub struct StackSim {
    bodies: BTreeMap<SceneHandle, SimBody>,
    /// Velocities set before the host spawned the body.
    pending: HashMap<SceneHandle, Vec3>,
}

impl StackSim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Add a body. Resting bodies stay put until given a velocity.
    pub fn spawn(&mut self, handle: SceneHandle, pose: Pose, resting: bool) {
        let velocity = self.pending.remove(&handle).unwrap_or(Vec3::ZERO);
        let resting = resting && velocity == Vec3::ZERO;
        self.bodies.insert(
            handle,
            SimBody {
                position: pose.position,
                rotation: pose.rotation,
                velocity,
                resting,
            },
        );
    }

    pub fn despawn(&mut self, handle: SceneHandle) {
        self.bodies.remove(&handle);
        self.pending.remove(&handle);
    }

    /// Mirror the controller's handles: spawn bodies for new ones, drop
    /// bodies whose handle was released.
    pub fn sync(&mut self, flow: &FlowController) {
        let live: HashMap<SceneHandle, _> = flow.mapper().iter().map(|(id, h)| (h, id)).collect();
        let gone: Vec<SceneHandle> = self
            .bodies
            .keys()
            .filter(|h| !live.contains_key(h))
            .copied()
            .collect();
        for handle in gone {
            self.despawn(handle);
        }
        for (handle, id) in live {
            if self.bodies.contains_key(&handle) {
                continue;
            }
            let Some(record) = flow.store().get(id) else {
                continue;
            };
            match record.final_pose() {
                Some(pose) => self.spawn(handle, pose, true),
                None => self.spawn(handle, Pose::new(record.drop_position, Quat::IDENTITY), false),
            }
        }
    }

    /// Advance the simulation by `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        let supports: Vec<Vec3> = self
            .bodies
            .values()
            .filter(|b| b.resting)
            .map(|b| b.position)
            .collect();
        let size = 2.0 * CUBE_HALF_EXTENT;

        for body in self.bodies.values_mut().filter(|b| !b.resting) {
            body.velocity.y -= GRAVITY * dt;
            let from = body.position;
            body.position += body.velocity * dt;

            let floor = supports
                .iter()
                .filter(|s| {
                    (s.x - from.x).abs() < size && (s.z - from.z).abs() < size && s.y < from.y
                })
                .map(|s| s.y + size)
                .fold(CUBE_HALF_EXTENT, f32::max);

            if body.position.y <= floor {
                body.position.y = floor;
                if body.velocity.y.abs() > BOUNCE_SPEED {
                    body.velocity.y = -body.velocity.y * RESTITUTION;
                } else {
                    body.velocity = Vec3::ZERO;
                    body.resting = true;
                }
            }
        }
    }
}

impl PhysicsWorld for StackSim {
    fn body(&self, handle: SceneHandle) -> Option<BodySample> {
        self.bodies.get(&handle).map(|b| BodySample {
            position: b.position,
            rotation: b.rotation,
            linear_velocity: b.velocity,
            angular_velocity: Vec3::ZERO,
            is_sleeping: Some(b.resting),
        })
    }

    fn set_linear_velocity(&mut self, handle: SceneHandle, velocity: Vec3) {
        match self.bodies.get_mut(&handle) {
            Some(body) => {
                body.velocity = velocity;
                body.resting = velocity == Vec3::ZERO && body.resting;
            }
            None => {
                self.pending.insert(handle, velocity);
            }
        }
    }
}

/// splitmix64: small, seedable, identical on every platform.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Uniform in `[-extent, extent)`.
    pub fn jitter(&mut self, extent: f32) -> f32 {
        (self.next_f32() * 2.0 - 1.0) * extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn run(sim: &mut StackSim, secs: f32) {
        for _ in 0..(secs / DT).ceil() as usize {
            sim.step(DT);
        }
    }

    #[test]
    fn cube_falls_to_ground_and_rests() {
        let mut sim = StackSim::new();
        let h = SceneHandle(1);
        sim.spawn(h, Pose::new(Vec3::new(0.0, 6.0, 0.0), Quat::IDENTITY), false);
        run(&mut sim, 4.0);
        let body = sim.body(h).unwrap();
        assert_eq!(body.is_sleeping, Some(true));
        assert_eq!(body.position.y, CUBE_HALF_EXTENT);
    }

    #[test]
    fn cube_lands_on_resting_cube_below() {
        let mut sim = StackSim::new();
        let base = SceneHandle(1);
        let top = SceneHandle(2);
        sim.spawn(base, Pose::new(Vec3::new(0.0, 0.5, 0.0), Quat::IDENTITY), true);
        sim.spawn(top, Pose::new(Vec3::new(0.3, 5.0, 0.0), Quat::IDENTITY), false);
        run(&mut sim, 4.0);
        assert_eq!(sim.body(top).unwrap().position.y, 1.5);
        assert_eq!(sim.body(base).unwrap().position.y, 0.5);
    }

    #[test]
    fn clear_of_the_stack_lands_on_ground() {
        let mut sim = StackSim::new();
        sim.spawn(SceneHandle(1), Pose::new(Vec3::new(0.0, 0.5, 0.0), Quat::IDENTITY), true);
        let h = SceneHandle(2);
        sim.spawn(h, Pose::new(Vec3::new(2.0, 5.0, 0.0), Quat::IDENTITY), false);
        run(&mut sim, 4.0);
        assert_eq!(sim.body(h).unwrap().position.y, 0.5);
    }

    #[test]
    fn velocity_before_spawn_is_applied_on_spawn() {
        let mut sim = StackSim::new();
        let h = SceneHandle(4);
        sim.set_linear_velocity(h, Vec3::new(0.0, -2.0, 0.0));
        assert!(sim.body(h).is_none());
        sim.spawn(h, Pose::new(Vec3::new(0.0, 6.0, 0.0), Quat::IDENTITY), false);
        assert_eq!(sim.body(h).unwrap().linear_velocity, Vec3::new(0.0, -2.0, 0.0));
    }

    #[test]
    fn rng_is_deterministic_and_bounded() {
        let mut a = SplitMix64::new(7);
        let mut b = SplitMix64::new(7);
        for _ in 0..100 {
            let x = a.next_f32();
            assert_eq!(x, b.next_f32());
            assert!((0.0..1.0).contains(&x));
        }
        assert_ne!(SplitMix64::new(1).next_u64(), SplitMix64::new(2).next_u64());
    }
}
