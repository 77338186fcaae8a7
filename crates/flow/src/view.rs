use glam::{Quat, Vec3};
use serde::Serialize;
use tower_camera::{SphericalPose, TransitionKind};
use tower_common::{Color, LocalId, UserId};
use tower_kernel::CubeStatus;

use crate::controller::FlowState;

/// Verified profile data from the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// Read-only lookup of visitor profiles, used for overlays.
pub trait IdentityDirectory {
    fn profile(&self, user: &UserId) -> Option<Profile>;
}

/// Directory that knows nobody.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDirectory;

impl IdentityDirectory for NoDirectory {
    fn profile(&self, _user: &UserId) -> Option<Profile> {
        None
    }
}

impl IdentityDirectory for std::collections::HashMap<UserId, Profile> {
    fn profile(&self, user: &UserId) -> Option<Profile> {
        self.get(user).cloned()
    }
}

/// One cube as the UI should draw it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CubeView {
    pub local_id: LocalId,
    /// Scene handle, if the cube currently has a render object.
    pub handle: Option<u64>,
    pub status: CubeStatus,
    pub color: Color,
    pub position: Vec3,
    pub rotation: Quat,
    /// Overlay label: verified profile name, else the name typed at drop time.
    pub label: Option<String>,
    pub photo_url: Option<String>,
    /// Carries the flag marker.
    pub is_highest: bool,
    pub is_active: bool,
    pub error: Option<String>,
}

/// Immutable snapshot of everything the UI renders against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Presentation {
    pub cubes: Vec<CubeView>,
    pub active_flow: Option<LocalId>,
    pub state: FlowState,
    pub camera: SphericalPose,
    pub camera_kind: TransitionKind,
    pub tower_height: f32,
    /// The remote feed failed; the scene may be showing fallback data.
    pub feed_degraded: bool,
}

impl Presentation {
    pub fn cube(&self, id: LocalId) -> Option<&CubeView> {
        self.cubes.iter().find(|c| c.local_id == id)
    }
}
