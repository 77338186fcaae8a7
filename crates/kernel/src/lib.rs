//! Cube record store: authoritative table of every known cube.
//!
//! # Invariants
//! - At most one record is pending (`draft`, `saving` or `error`), and it is the active flow.
//! - A synced record always has a remote id, and that id never changes.
//! - Remote snapshots arriving during a flow are buffered and applied in full
//!   exactly once when the flow resolves.

pub mod record;
pub mod store;

pub use record::{
    CubeRecord, CubeStatus, DropPayload, MAX_DISPLAY_NAME_CHARS, NewCube, Origin, RemoteAck,
    RemoteCube,
};
pub use store::{
    CubeStore, InvariantViolation, SnapshotDisposition, SnapshotStats, StoreError, StoreEvent,
};
