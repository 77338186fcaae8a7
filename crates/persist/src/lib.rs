//! Remote store collaborators: the shared, append-only cube collection every
//! client subscribes to.
//!
//! # Invariants
//! - Documents are only ever appended; nothing is rewritten in place.
//! - Every live subscription gets the full list on subscribe and after each
//!   change.
//! - A remote id is assigned once and never reused.
//! - A file store that fails its integrity or schema checks does not open.

pub mod feed;
pub mod file;
pub mod memory;

pub use feed::{FeedMessage, RemoteError, RemoteStore, SnapshotMeta, Subscription, SubscriptionId};
pub use file::{FileRemote, IntegrityManifest, ManifestEntry, StoreMeta};
pub use memory::MemoryRemote;
