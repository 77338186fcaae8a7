//! Two clients sharing one remote feed: snapshots that arrive mid-flight are
//! held back and applied once the local flow resolves.

use glam::Vec3;
use tower_common::{Color, LocalId};
use tower_flow::{FlowController, FlowState, TowerConfig};
use tower_kernel::{CubeStatus, Origin, SnapshotDisposition};
use tower_persist::{FeedMessage, MemoryRemote, RemoteStore, Subscription};
use tower_scene::{BodySample, ScriptedPhysics};

const DT: f32 = 1.0 / 60.0;

struct Client {
    flow: FlowController,
    physics: ScriptedPhysics,
    feed: Subscription,
}

impl Client {
    fn new(remote: &mut MemoryRemote) -> Self {
        let mut config = TowerConfig::default();
        config.settle.sample_every = 1;
        let mut client = Self {
            flow: FlowController::new(config),
            physics: ScriptedPhysics::new(),
            feed: remote.subscribe(),
        };
        client.pump();
        client
    }

    fn pump(&mut self) -> Vec<SnapshotDisposition> {
        let mut dispositions = Vec::new();
        for message in self.feed.drain() {
            match message {
                FeedMessage::Snapshot(list, _) => {
                    dispositions.push(self.flow.on_remote_snapshot(list));
                }
                FeedMessage::Error(message) => self.flow.on_remote_error(message),
            }
        }
        dispositions
    }

    fn run(&mut self, secs: f32) {
        for _ in 0..(secs / DT).ceil() as usize {
            self.flow.update(DT, &mut self.physics);
        }
    }

    /// Drop at column `x` and wait for identity entry.
    fn drop_to_identity(&mut self, x: f32) -> LocalId {
        self.flow.enter_placement().unwrap();
        self.run(1.0);
        let id = self
            .flow
            .drop_cube(Color::rgb(40, 90, 200), Vec3::new(x, 6.0, 0.0), None, &mut self.physics)
            .unwrap();
        let handle = self.flow.active_handle().unwrap();
        self.physics.set(handle, BodySample::at_rest(Vec3::new(x, 0.5, 0.0)));
        self.run(1.2);
        assert_eq!(self.flow.state(), FlowState::EditingIdentity);
        id
    }

    fn save(&mut self, remote: &mut MemoryRemote) {
        let request = self.flow.take_save_request().unwrap();
        let result = remote.append(request.cube).map_err(|e| e.to_string());
        self.flow.on_save_result(request.local_id, result).unwrap();
    }

    fn remote_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .flow
            .store()
            .records()
            .values()
            .filter_map(|r| r.remote_id.as_ref().map(|id| id.as_str().to_owned()))
            .collect();
        ids.sort();
        ids
    }
}

#[test]
fn concurrent_drops_converge() {
    let mut remote = MemoryRemote::new();
    let mut a = Client::new(&mut remote);
    let mut b = Client::new(&mut remote);

    let b_id = b.drop_to_identity(3.0);
    let a_id = a.drop_to_identity(0.0);

    a.flow.submit_identity(None).unwrap();
    a.save(&mut remote);
    assert_eq!(a.flow.state(), FlowState::Synced);
    a.pump();
    assert_eq!(a.flow.store().get(a_id).unwrap().origin, Origin::Remote);

    // B is mid-flight: A's cube waits in the buffer.
    assert_eq!(b.pump(), vec![SnapshotDisposition::Buffered]);
    assert_eq!(b.flow.store().len(), 1);
    assert_eq!(b.flow.store().pending_buffer().map(<[_]>::len), Some(1));

    b.flow.submit_identity(None).unwrap();
    b.save(&mut remote);
    assert_eq!(b.flow.state(), FlowState::Synced);
    assert_eq!(b.flow.store().len(), 2);
    assert_eq!(b.flow.store().get(b_id).unwrap().status, CubeStatus::Synced);

    a.pump();
    b.pump();
    assert_eq!(a.flow.store().len(), 2);
    assert_eq!(a.remote_ids(), b.remote_ids());
    assert_eq!(b.flow.store().get(b_id).unwrap().origin, Origin::Remote);
    for client in [&a, &b] {
        assert!(client.flow.store().check_invariants().is_ok());
        assert_eq!(client.flow.mapper().len(), 2);
    }
}

#[test]
fn rejected_append_is_retried_and_peers_see_one_copy() {
    let mut remote = MemoryRemote::new();
    let mut a = Client::new(&mut remote);
    let mut b = Client::new(&mut remote);

    let id = a.drop_to_identity(0.0);
    a.flow.submit_identity(None).unwrap();
    remote.fail_next_appends(1);
    a.save(&mut remote);
    assert_eq!(a.flow.state(), FlowState::Error);
    assert!(b.pump().is_empty());

    a.flow.retry_save().unwrap();
    a.save(&mut remote);
    assert_eq!(a.flow.state(), FlowState::Synced);
    assert_eq!(a.flow.store().get(id).unwrap().status, CubeStatus::Synced);

    b.pump();
    assert_eq!(b.flow.store().len(), 1);
    assert_eq!(remote.len(), 1);
    // B adopts the writer's local id from the document.
    assert!(b.flow.store().get(id).is_some());
}

#[test]
fn feed_error_keeps_existing_cubes() {
    let mut remote = MemoryRemote::new();
    let mut a = Client::new(&mut remote);
    a.drop_to_identity(0.0);
    a.flow.submit_identity(None).unwrap();
    a.save(&mut remote);
    a.pump();

    remote.push_error("backend unreachable");
    a.pump();
    assert_eq!(a.flow.store().len(), 1);
    assert_eq!(a.flow.store().feed_error(), Some("backend unreachable"));

    a.flow.dismiss();
    a.drop_to_identity(2.0);
    assert_eq!(a.flow.store().len(), 2);
}
