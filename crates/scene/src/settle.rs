use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tower_common::{CUBE_HALF_EXTENT, Pose, SceneHandle, Timestamp};

use crate::physics::PhysicsWorld;

/// Thresholds and sampling rate for settle detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// Linear speed below which a body counts as calm.
    pub linear_epsilon: f32,
    /// Angular speed below which a body counts as calm.
    pub angular_epsilon: f32,
    /// Sample bodies on every n-th update.
    pub sample_every: u32,
    /// Consecutive calm samples needed before a body is settled.
    pub debounce_samples: u32,
    /// Collider half extent, used for top-surface height.
    pub half_extent: f32,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            linear_epsilon: 0.05,
            angular_epsilon: 0.05,
            sample_every: 4,
            debounce_samples: 2,
            half_extent: CUBE_HALF_EXTENT,
        }
    }
}

/// Something the detector noticed during a sampled tick.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleEvent {
    /// The watched body (the latest drop) came to rest. Reported once.
    CubeSettled { handle: SceneHandle, pose: Pose },
    /// Nothing in the scene is moving any more.
    SceneSettled {
        highest: Option<Highest>,
        tower_height: f32,
    },
    /// Something started moving after the scene had settled.
    SceneMoving,
}

/// The settled body with the highest top surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Highest {
    pub handle: SceneHandle,
    pub top: f32,
}

#[derive(Debug, Clone)]
struct TrackedBody {
    created_at: Option<Timestamp>,
    calm_samples: u32,
    settled: bool,
    last: Option<Pose>,
    /// Physics has reported this body, or it was registered at rest.
    seen: bool,
}

/// Samples physics state on a throttled tick and decides when bodies, and the
/// whole scene, have come to rest.
///
/// All bookkeeping lives here and changes only inside [`SettleDetector::update`]
/// (plus registration calls); callers read it through accessors.
#[derive(Debug)]
pub struct SettleDetector {
    pub config: SettleConfig,
    bodies: BTreeMap<SceneHandle, TrackedBody>,
    watched: Option<SceneHandle>,
    frame: u64,
    scene_at_rest: bool,
    highest: Option<Highest>,
    events: Vec<SettleEvent>,
}

impl SettleDetector {
    pub fn new(config: SettleConfig) -> Self {
        Self {
            config,
            bodies: BTreeMap::new(),
            watched: None,
            frame: 0,
            scene_at_rest: false,
            highest: None,
            events: Vec::new(),
        }
    }

    /// Start tracking a body. Re-registering an existing handle does nothing.
    ///
    /// `pose` is only a starting guess: the body cannot settle before physics
    /// has reported it at least once.
    pub fn register(&mut self, handle: SceneHandle, created_at: Option<Timestamp>, pose: Option<Pose>) {
        self.track(handle, created_at, pose, false);
    }

    /// Start tracking a body already known to rest at `pose`, such as a cube
    /// loaded from the remote list. If physics never spawns it, it counts as
    /// resting there.
    pub fn register_resting(&mut self, handle: SceneHandle, created_at: Option<Timestamp>, pose: Pose) {
        self.track(handle, created_at, Some(pose), true);
    }

    fn track(&mut self, handle: SceneHandle, created_at: Option<Timestamp>, pose: Option<Pose>, seen: bool) {
        self.bodies.entry(handle).or_insert_with(|| TrackedBody {
            created_at,
            calm_samples: 0,
            settled: false,
            last: pose,
            seen,
        });
    }

    /// Stop tracking a body. Clears the watch if it was the watched one.
    pub fn unregister(&mut self, handle: SceneHandle) {
        self.bodies.remove(&handle);
        if self.watched == Some(handle) {
            self.watched = None;
        }
        if self.highest.is_some_and(|h| h.handle == handle) {
            self.highest = None;
        }
    }

    /// Report a [`SettleEvent::CubeSettled`] once `handle` comes to rest.
    pub fn watch(&mut self, handle: SceneHandle) {
        if let Some(body) = self.bodies.get_mut(&handle) {
            body.calm_samples = 0;
            body.settled = false;
        }
        self.watched = Some(handle);
    }

    pub fn watched(&self) -> Option<SceneHandle> {
        self.watched
    }

    pub fn is_registered(&self, handle: SceneHandle) -> bool {
        self.bodies.contains_key(&handle)
    }

    pub fn is_settled(&self, handle: SceneHandle) -> bool {
        self.bodies.get(&handle).is_some_and(|b| b.settled)
    }

    pub fn last_pose(&self, handle: SceneHandle) -> Option<Pose> {
        self.bodies.get(&handle).and_then(|b| b.last)
    }

    pub fn handles(&self) -> impl Iterator<Item = SceneHandle> + '_ {
        self.bodies.keys().copied()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Highest settled body as of the last sample.
    pub fn highest(&self) -> Option<Highest> {
        self.highest
    }

    /// Top of the tower as of the last sample, zero for an empty scene.
    pub fn tower_height(&self) -> f32 {
        self.highest.map_or(0.0, |h| h.top)
    }

    pub fn scene_at_rest(&self) -> bool {
        self.scene_at_rest
    }

    pub fn drain_events(&mut self) -> Vec<SettleEvent> {
        std::mem::take(&mut self.events)
    }

    /// Declare the watched body settled without waiting for physics.
    ///
    /// Uses its last known pose, or `fallback` if it was never sampled.
    /// Returns the pose reported, or `None` if `handle` is not tracked.
    pub fn force_settle(&mut self, handle: SceneHandle, fallback: Pose) -> Option<Pose> {
        let debounce = self.config.debounce_samples;
        let body = self.bodies.get_mut(&handle)?;
        body.calm_samples = body.calm_samples.max(debounce);
        body.settled = true;
        let pose = *body.last.get_or_insert(fallback);
        if self.watched == Some(handle) {
            self.watched = None;
        }
        tracing::warn!(%handle, "settle forced");
        self.events.push(SettleEvent::CubeSettled { handle, pose });
        Some(pose)
    }

    /// Advance one frame. Samples physics only every `sample_every` frames.
    /// Returns whether this frame was sampled.
    pub fn update(&mut self, physics: &dyn PhysicsWorld) -> bool {
        self.frame += 1;
        if self.frame % u64::from(self.config.sample_every.max(1)) != 0 {
            return false;
        }
        let _span = tracing::trace_span!("settle_sample", frame = self.frame).entered();

        let debounce = self.config.debounce_samples.max(1);
        let lin_eps = self.config.linear_epsilon;
        let ang_eps = self.config.angular_epsilon;
        let watched = self.watched;
        let mut watched_settled: Option<(SceneHandle, Pose)> = None;

        for (handle, body) in self.bodies.iter_mut() {
            match physics.body(*handle) {
                Some(sample) => {
                    body.seen = true;
                    body.last = Some(sample.pose());
                    if sample.is_sleeping == Some(true) {
                        body.calm_samples = body.calm_samples.max(debounce);
                    } else if sample.linear_velocity.length() < lin_eps
                        && sample.angular_velocity.length() < ang_eps
                    {
                        body.calm_samples = body.calm_samples.saturating_add(1);
                    } else {
                        body.calm_samples = 0;
                    }
                }
                // Body vanished under us: treat it as resting where we last saw it.
                None if body.seen => body.calm_samples = body.calm_samples.max(debounce),
                // Not spawned yet.
                None => {}
            }

            let was_settled = body.settled;
            body.settled = body.calm_samples >= debounce;
            if body.settled && !was_settled && watched == Some(*handle) {
                if let Some(pose) = body.last {
                    watched_settled = Some((*handle, pose));
                }
            }
        }

        if let Some((handle, pose)) = watched_settled {
            tracing::debug!(%handle, y = pose.position.y, "watched cube settled");
            self.watched = None;
            self.events.push(SettleEvent::CubeSettled { handle, pose });
        }

        self.highest = self.highest_settled();
        let any_moving = self.bodies.values().any(|b| !b.settled);
        if !any_moving && !self.scene_at_rest {
            self.scene_at_rest = true;
            let tower_height = self.tower_height();
            tracing::debug!(tower_height, "scene settled");
            self.events.push(SettleEvent::SceneSettled {
                highest: self.highest,
                tower_height,
            });
        } else if any_moving && self.scene_at_rest {
            self.scene_at_rest = false;
            self.events.push(SettleEvent::SceneMoving);
        }
        true
    }

    /// Settled body with the greatest top surface.
    ///
    /// Ties go to the most recently created body (creation time, else handle
    /// value). The comparison is non-strict, so on an exact tie the body
    /// iterated later wins; this decides which cube carries the flag marker.
    fn highest_settled(&self) -> Option<Highest> {
        let mut best: Option<(Highest, u64)> = None;
        for (handle, body) in &self.bodies {
            if !body.settled {
                continue;
            }
            let Some(pose) = body.last else {
                continue;
            };
            let top = pose.position.y + self.config.half_extent;
            let recency = body.created_at.map_or(handle.0, |t| t.0);
            let wins = match &best {
                None => true,
                Some((b, r)) => top > b.top || (top == b.top && recency >= *r),
            };
            if wins {
                best = Some((
                    Highest {
                        handle: *handle,
                        top,
                    },
                    recency,
                ));
            }
        }
        best.map(|(h, _)| h)
    }
}

impl Default for SettleDetector {
    fn default() -> Self {
        Self::new(SettleConfig::default())
    }
}
