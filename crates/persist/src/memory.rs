use tower_common::{RemoteId, Timestamp};
use tower_kernel::{NewCube, RemoteAck, RemoteCube};

use crate::feed::{FeedMessage, RemoteError, RemoteStore, SnapshotMeta, Subscribers, Subscription, SubscriptionId};

/// In-process remote store. Backs tests and offline sessions.
///
/// Appends can be made to fail on demand with [`MemoryRemote::fail_next_appends`].
#[derive(Debug, Default)]
pub struct MemoryRemote {
    docs: Vec<RemoteCube>,
    subscribers: Subscribers,
    sequence: u64,
    next_id: u64,
    failures: u32,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with documents already stored.
    pub fn with_docs(docs: Vec<RemoteCube>) -> Self {
        Self {
            next_id: docs.len() as u64,
            docs,
            ..Default::default()
        }
    }

    /// Make the next `n` appends fail with [`RemoteError::Unavailable`].
    pub fn fail_next_appends(&mut self, n: u32) {
        self.failures = n;
    }

    pub fn docs(&self) -> &[RemoteCube] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Delete a document, as another client or a moderator would.
    pub fn remove(&mut self, remote_id: &RemoteId) -> bool {
        let before = self.docs.len();
        self.docs.retain(|d| &d.remote_id != remote_id);
        let removed = self.docs.len() != before;
        if removed {
            self.publish();
        }
        removed
    }

    /// Push a feed failure to every subscription.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.subscribers.broadcast(&FeedMessage::Error(message.into()));
    }

    fn snapshot(&self, initial: bool) -> FeedMessage {
        FeedMessage::Snapshot(
            self.docs.clone(),
            SnapshotMeta {
                sequence: self.sequence,
                initial,
            },
        )
    }

    fn publish(&mut self) {
        self.sequence += 1;
        let message = self.snapshot(false);
        self.subscribers.broadcast(&message);
    }
}

impl RemoteStore for MemoryRemote {
    fn subscribe(&mut self) -> Subscription {
        let initial = self.snapshot(true);
        self.subscribers.add(initial)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.remove(id);
    }

    fn append(&mut self, cube: NewCube) -> Result<RemoteAck, RemoteError> {
        if self.failures > 0 {
            self.failures -= 1;
            tracing::debug!(remaining = self.failures, "scripted append failure");
            return Err(RemoteError::Unavailable("scripted failure".into()));
        }
        self.next_id += 1;
        let ack = RemoteAck {
            remote_id: RemoteId(format!("mem-{:06}", self.next_id)),
            created_at: Timestamp::now(),
        };
        self.docs.push(RemoteCube {
            remote_id: ack.remote_id.clone(),
            created_at: ack.created_at,
            cube,
        });
        tracing::debug!(remote_id = %ack.remote_id, "appended");
        self.publish();
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};
    use tower_common::Color;

    fn cube(y: f32) -> NewCube {
        NewCube {
            local_id: None,
            user_id: None,
            display_name: None,
            color: Color::rgb(0, 128, 255),
            position: Vec3::new(0.0, y, 0.0),
            rotation: Quat::IDENTITY,
            created_at_local: Timestamp(1),
        }
    }

    fn list(message: Option<FeedMessage>) -> Vec<RemoteCube> {
        match message {
            Some(FeedMessage::Snapshot(list, _)) => list,
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn subscribe_delivers_current_list() {
        let mut remote = MemoryRemote::new();
        remote.append(cube(0.5)).unwrap();
        let sub = remote.subscribe();
        match sub.try_next() {
            Some(FeedMessage::Snapshot(list, meta)) => {
                assert_eq!(list.len(), 1);
                assert!(meta.initial);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn append_assigns_unique_ids_and_notifies() {
        let mut remote = MemoryRemote::new();
        let sub = remote.subscribe();
        sub.drain();
        let a = remote.append(cube(0.5)).unwrap();
        let b = remote.append(cube(1.5)).unwrap();
        assert_ne!(a.remote_id, b.remote_id);
        let messages = sub.drain();
        assert_eq!(messages.len(), 2);
        let last = list(messages.into_iter().last());
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].remote_id, b.remote_id);
    }

    #[test]
    fn scripted_failures_then_success() {
        let mut remote = MemoryRemote::new();
        remote.fail_next_appends(2);
        assert!(matches!(remote.append(cube(0.5)), Err(RemoteError::Unavailable(_))));
        assert!(remote.append(cube(0.5)).is_err());
        assert!(remote.append(cube(0.5)).is_ok());
        assert_eq!(remote.len(), 1);
    }

    #[test]
    fn remove_publishes_shorter_list() {
        let mut remote = MemoryRemote::new();
        let ack = remote.append(cube(0.5)).unwrap();
        let sub = remote.subscribe();
        sub.drain();
        assert!(remote.remove(&ack.remote_id));
        assert!(!remote.remove(&ack.remote_id));
        assert!(list(sub.try_next()).is_empty());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut remote = MemoryRemote::new();
        let sub = remote.subscribe();
        sub.drain();
        remote.unsubscribe(sub.id());
        remote.append(cube(0.5)).unwrap();
        assert!(sub.try_next().is_none());
        assert_eq!(remote.subscriber_count(), 0);
    }
}
