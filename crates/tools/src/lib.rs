//! Developer tooling: read-only inspection of a running tower session.
//!
//! # Invariants
//! - Inspection never mutates the flow, store or scene.

pub mod inspector;

pub use inspector::{CubeInfo, TowerInspector, TowerSummary};
