use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use serde::{Deserialize, Serialize};
use tower_kernel::{NewCube, RemoteAck, RemoteCube};

/// Errors from a remote store.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The store refused or could not take the write. Safe to retry.
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
}

/// Describes one delivered snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Increases by one with every change to the stored list.
    pub sequence: u64,
    /// Delivered on subscribe rather than in response to a write.
    pub initial: bool,
}

/// One message on a subscription channel.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// The full current list, oldest first.
    Snapshot(Vec<RemoteCube>, SnapshotMeta),
    /// A non-fatal feed failure. The subscription stays open.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// The shared collection every client reads and appends to.
///
/// Implementations push the full list to every live subscription on
/// subscribe and after each successful append.
pub trait RemoteStore {
    /// Open a feed. The current list is queued on it immediately.
    fn subscribe(&mut self) -> Subscription;

    /// Stop delivering to `id`. Dropping the [`Subscription`] has the same
    /// effect from the next delivery on.
    fn unsubscribe(&mut self, id: SubscriptionId);

    /// Durably store one document and assign its remote id.
    fn append(&mut self, cube: NewCube) -> Result<RemoteAck, RemoteError>;
}

/// Receiving end of a feed. Drained by the host between ticks.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: Receiver<FeedMessage>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next queued message, without blocking.
    pub fn try_next(&self) -> Option<FeedMessage> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Everything queued so far, in delivery order.
    pub fn drain(&self) -> Vec<FeedMessage> {
        self.rx.try_iter().collect()
    }
}

/// Fan-out to live subscriptions. Dead receivers are pruned on send.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    senders: Vec<(SubscriptionId, Sender<FeedMessage>)>,
}

impl Subscribers {
    pub(crate) fn add(&mut self, initial: FeedMessage) -> Subscription {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let (tx, rx) = mpsc::channel();
        if tx.send(initial).is_ok() {
            self.senders.push((id, tx));
        }
        tracing::debug!(subscription = id.0, "subscribed");
        Subscription { id, rx }
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) {
        self.senders.retain(|(sid, _)| *sid != id);
        tracing::debug!(subscription = id.0, "unsubscribed");
    }

    pub(crate) fn broadcast(&mut self, message: &FeedMessage) {
        self.senders.retain(|(id, tx)| {
            let alive = tx.send(message.clone()).is_ok();
            if !alive {
                tracing::debug!(subscription = id.0, "subscriber dropped");
            }
            alive
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(sequence: u64) -> FeedMessage {
        FeedMessage::Snapshot(
            Vec::new(),
            SnapshotMeta {
                sequence,
                initial: false,
            },
        )
    }

    #[test]
    fn initial_message_is_queued() {
        let mut subs = Subscribers::default();
        let sub = subs.add(snapshot(0));
        assert_eq!(sub.try_next(), Some(snapshot(0)));
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn broadcast_reaches_every_live_subscription() {
        let mut subs = Subscribers::default();
        let a = subs.add(snapshot(0));
        let b = subs.add(snapshot(0));
        assert_ne!(a.id(), b.id());
        subs.broadcast(&FeedMessage::Error("down".into()));
        assert_eq!(a.drain().len(), 2);
        assert_eq!(b.drain().last(), Some(&FeedMessage::Error("down".into())));
    }

    #[test]
    fn dropped_and_removed_subscriptions_stop_receiving() {
        let mut subs = Subscribers::default();
        let kept = subs.add(snapshot(0));
        let dropped = subs.add(snapshot(0));
        let removed = subs.add(snapshot(0));
        drop(dropped);
        subs.remove(removed.id());
        subs.broadcast(&snapshot(1));
        assert_eq!(subs.len(), 1);
        assert_eq!(kept.drain().len(), 2);
        assert_eq!(removed.drain(), vec![snapshot(0)]);
    }
}
