//! Shared types for the tower workspace.
//!
//! # Invariants
//! - `LocalId` is the only identity that is meaningful outside the core.
//! - `SceneHandle` values are session-scoped and never persisted.

pub mod types;

pub use types::{
    CUBE_HALF_EXTENT, Color, ColorParseError, LocalId, Pose, RemoteId, SceneHandle, Timestamp,
    UserId,
};
