use std::fmt;

use serde::{Deserialize, Serialize};

use crate::job::RenderJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Exterior,
    Room,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exterior => "exterior",
            Self::Room => "room",
        }
    }

    fn finish_heading(self) -> &'static str {
        match self {
            Self::Exterior => "EXTERIOR FINISH NOTES",
            Self::Room => "ROOM FINISH NOTES",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn build_prompt_for_angle(
    job: &RenderJob,
    scope: Scope,
    scope_name: &str,
    angle_name: &str,
    angle_desc: &str,
) -> String {
    format!(
        "You are an architectural visualization rendering assistant.

Goal: Generate a photorealistic render that is CONSISTENT across views.

PROJECT: {project}
STYLE / CONSISTENCY NOTES:
{style}

SCOPE: {scope}
SCOPE_NAME: {scope_name}
CAMERA ANGLE NAME: {angle_name}
CAMERA ANGLE DETAILS: {angle_desc}

Instructions:
- Maintain consistent materials, colors, and style across all generated images.
- Use the provided plan and material notes as ground truth.
- Do not hallucinate additional rooms/materials not described.
- Produce a high quality, realistic render.

Return only the final image.",
        project = job.project_name,
        style = job.style_consistency_notes,
    )
    .trim()
    .to_string()
}

/// Appends the scope's finish notes block to an angle prompt.
pub fn with_finish_notes(prompt: &str, scope: Scope, notes: &str) -> String {
    format!("{prompt}\n\n{}:\n{notes}", scope.finish_heading())
}
