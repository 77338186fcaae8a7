//! Scene glue between stable cube records and ephemeral physics bodies.
//!
//! # Invariants
//! - Handles are never reused within a session; a local id keeps its handle
//!   until it is released.
//! - Settling needs consecutive calm samples; one quiet sample mid-bounce
//!   does not count.

pub mod identity;
pub mod physics;
pub mod settle;

pub use identity::IdentityMapper;
#[cfg(any(test, feature = "testing"))]
pub use physics::ScriptedPhysics;
pub use physics::{BodySample, PhysicsWorld};
pub use settle::{Highest, SettleConfig, SettleDetector, SettleEvent};
