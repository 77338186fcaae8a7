//! Flow Controller: the single local drop -> settle -> focus -> save transaction.
//!
//! # Invariants
//! - At most one flow is active per client; drops are refused, not queued,
//!   while one is.
//! - `abandon` is the only cancellation path. It is idempotent and leaves
//!   store, identity mapping and camera consistent.
//! - All per-frame work happens in one ordered `update(dt)` call.

pub mod config;
pub mod controller;
pub mod view;

pub use config::{ConfigError, FlowConfig, TowerConfig};
pub use controller::{FlowController, FlowError, FlowEvent, FlowState, Identity, SaveRequest};
pub use view::{CubeView, IdentityDirectory, NoDirectory, Presentation, Profile};
