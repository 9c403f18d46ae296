use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{
    CameraAngle, ExteriorInputs, FileInput, FinishNotes, InteriorInputs, RenderJob, RoomInputs,
    DEFAULT_MODEL_NAME, DEFAULT_PROJECT_NAME, DEFAULT_ROOM_NAME,
};

/// Raw form state as entered by the user. Every field may be left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobForm {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub style_notes: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub exterior: ExteriorForm,
    #[serde(default)]
    pub rooms: Vec<RoomForm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExteriorForm {
    #[serde(default)]
    pub plan_files: Vec<PathBuf>,
    #[serde(default)]
    pub finishes: String,
    #[serde(default)]
    pub angles: Vec<AngleForm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RoomForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub finishes: String,
    #[serde(default)]
    pub angles: Vec<AngleForm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AngleForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

pub fn build_render_job(form: &JobForm) -> RenderJob {
    let exterior = ExteriorInputs {
        plan_files: file_inputs(&form.exterior.plan_files),
        finishes: FinishNotes {
            notes: form.exterior.finishes.clone(),
        },
        camera_angles: camera_angles(&form.exterior.angles),
    };

    let rooms = form
        .rooms
        .iter()
        .map(|room| RoomInputs {
            room_name: non_blank_or(&room.name, DEFAULT_ROOM_NAME),
            plan_or_reference_files: file_inputs(&room.files),
            finishes: FinishNotes {
                notes: room.finishes.clone(),
            },
            camera_angles: camera_angles(&room.angles),
        })
        .collect();

    RenderJob {
        project_name: non_blank_or(&form.project_name, DEFAULT_PROJECT_NAME),
        style_consistency_notes: form.style_notes.clone(),
        exterior,
        interior: InteriorInputs { rooms },
        model_name: non_blank_or(&form.model_name, DEFAULT_MODEL_NAME),
    }
}

fn file_inputs(paths: &[PathBuf]) -> Vec<FileInput> {
    paths.iter().cloned().map(FileInput::new).collect()
}

// Rows with a blank name are the empty trailing rows of the angle table.
fn camera_angles(rows: &[AngleForm]) -> Vec<CameraAngle> {
    rows.iter()
        .filter(|row| !row.name.trim().is_empty())
        .map(|row| CameraAngle::new(row.name.trim(), row.description.trim()))
        .collect()
}

fn non_blank_or(value: &str, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}
