use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use tower_common::{Color, LocalId, Pose, RemoteId, Timestamp, UserId};

/// Longest display name kept on a record, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 48;

/// Lifecycle status of a cube record.
///
/// Moves forward only: `Draft -> Saving -> Synced | Error`, with `Error`
/// allowed to re-enter `Saving` on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CubeStatus {
    Draft,
    Saving,
    Synced,
    Error,
}

impl CubeStatus {
    /// Whether the record still belongs to an unresolved local flow.
    pub fn is_pending(self) -> bool {
        !matches!(self, Self::Synced)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Saving => "saving",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

/// Where a record came from, as far as this client knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Created by this client and not yet echoed back by the remote feed.
    Local,
    /// Known through the remote feed.
    Remote,
}

/// What the visitor supplies when dropping a cube.
#[derive(Debug, Clone, PartialEq)]
pub struct DropPayload {
    pub color: Color,
    pub position: Vec3,
    pub user_id: Option<UserId>,
    pub created_at: Timestamp,
}

/// A cube as written to the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCube {
    /// Originating client's id, echoed back so handles can survive the round trip.
    #[serde(default)]
    pub local_id: Option<LocalId>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub color: Color,
    pub position: Vec3,
    pub rotation: Quat,
    pub created_at_local: Timestamp,
}

/// A cube as delivered by the remote feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCube {
    pub remote_id: RemoteId,
    pub created_at: Timestamp,
    #[serde(flatten)]
    pub cube: NewCube,
}

/// Acknowledgement returned by the backing store for a successful append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAck {
    pub remote_id: RemoteId,
    pub created_at: Timestamp,
}

/// The authoritative local view of one cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeRecord {
    pub local_id: LocalId,
    pub remote_id: Option<RemoteId>,
    pub user_id: Option<UserId>,
    pub display_name: Option<String>,
    pub status: CubeStatus,
    pub color: Color,
    pub drop_position: Vec3,
    pub final_position: Option<Vec3>,
    pub final_rotation: Option<Quat>,
    pub created_at_local: Timestamp,
    pub created_at_remote: Option<Timestamp>,
    pub last_error: Option<String>,
    pub origin: Origin,
}

impl CubeRecord {
    /// A fresh draft from a local drop.
    pub fn draft(local_id: LocalId, payload: DropPayload) -> Self {
        Self {
            local_id,
            remote_id: None,
            user_id: payload.user_id,
            display_name: None,
            status: CubeStatus::Draft,
            color: payload.color,
            drop_position: payload.position,
            final_position: None,
            final_rotation: None,
            created_at_local: payload.created_at,
            created_at_remote: None,
            last_error: None,
            origin: Origin::Local,
        }
    }

    /// A synced record built from a feed document.
    ///
    /// Remote cubes have already settled elsewhere, so the stored pose is both
    /// the drop position and the final pose.
    pub fn from_remote(local_id: LocalId, doc: RemoteCube) -> Self {
        Self {
            local_id,
            remote_id: Some(doc.remote_id),
            user_id: doc.cube.user_id,
            display_name: doc.cube.display_name,
            status: CubeStatus::Synced,
            color: doc.cube.color,
            drop_position: doc.cube.position,
            final_position: Some(doc.cube.position),
            final_rotation: Some(doc.cube.rotation),
            created_at_local: doc.cube.created_at_local,
            created_at_remote: Some(doc.created_at),
            last_error: None,
            origin: Origin::Remote,
        }
    }

    /// Final pose, if the cube has settled.
    pub fn final_pose(&self) -> Option<Pose> {
        match (self.final_position, self.final_rotation) {
            (Some(position), Some(rotation)) => Some(Pose::new(position, rotation)),
            _ => None,
        }
    }

    /// Best known position: the settled one, else where it was dropped.
    pub fn position(&self) -> Vec3 {
        self.final_position.unwrap_or(self.drop_position)
    }

    /// The document to append for this record. `None` until it has settled.
    pub fn to_new_cube(&self) -> Option<NewCube> {
        let pose = self.final_pose()?;
        Some(NewCube {
            local_id: Some(self.local_id),
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            color: self.color,
            position: pose.position,
            rotation: pose.rotation,
            created_at_local: self.created_at_local,
        })
    }
}

/// Trim a display name and cap its length. Blank names become `None`.
pub fn normalize_display_name(name: Option<&str>) -> Option<String> {
    let trimmed = name?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_DISPLAY_NAME_CHARS).collect())
}
