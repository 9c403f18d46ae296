mod builder;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::files::{kind_from_path, FileKind};

pub use builder::{build_render_job, AngleForm, ExteriorForm, JobForm, RoomForm};

pub const DEFAULT_PROJECT_NAME: &str = "Untitled Project";
pub const DEFAULT_MODEL_NAME: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_ROOM_NAME: &str = "Room";

/// A user-provided plan or reference file. Only the path is held; bytes are
/// read when the request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInput {
    pub path: PathBuf,
    #[serde(default)]
    pub kind: FileKind,
}

impl FileInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = kind_from_path(&path);
        Self { path, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraAngle {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl CameraAngle {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FinishNotes {
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExteriorInputs {
    #[serde(default)]
    pub plan_files: Vec<FileInput>,
    #[serde(default)]
    pub finishes: FinishNotes,
    #[serde(default)]
    pub camera_angles: Vec<CameraAngle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInputs {
    pub room_name: String,
    #[serde(default)]
    pub plan_or_reference_files: Vec<FileInput>,
    #[serde(default)]
    pub finishes: FinishNotes,
    #[serde(default)]
    pub camera_angles: Vec<CameraAngle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InteriorInputs {
    #[serde(default)]
    pub rooms: Vec<RoomInputs>,
}

/// The unit of work handed to the render orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderJob {
    pub project_name: String,
    #[serde(default)]
    pub style_consistency_notes: String,
    #[serde(default)]
    pub exterior: ExteriorInputs,
    #[serde(default)]
    pub interior: InteriorInputs,
    pub model_name: String,
}

impl Default for RenderJob {
    fn default() -> Self {
        Self {
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            style_consistency_notes: String::new(),
            exterior: ExteriorInputs::default(),
            interior: InteriorInputs::default(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
        }
    }
}

impl RenderJob {
    /// Number of render requests the job will issue.
    pub fn angle_count(&self) -> usize {
        self.exterior.camera_angles.len()
            + self
                .interior
                .rooms
                .iter()
                .map(|room| room.camera_angles.len())
                .sum::<usize>()
    }
}
