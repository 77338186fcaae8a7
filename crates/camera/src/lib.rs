//! Camera orchestration for the tower scene.
//!
//! # Invariants
//! - Transitions always start from the live interpolated pose; the camera
//!   never teleports and never queues requests.
//! - `progress` only grows within one transition.

mod orchestrator;
mod pose;

pub use orchestrator::{
    CameraConfig, CameraEvent, CameraMode, CameraOrchestrator, CameraTransition, TransitionKind,
};
pub use pose::{SphericalPose, ease_in_out_cubic};
