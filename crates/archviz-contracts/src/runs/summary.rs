use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::events::now_utc_iso;

/// An angle whose response carried no image payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyAngle {
    pub scope: String,
    pub scope_name: String,
    pub angle: String,
    pub debug_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub project_name: String,
    pub model: String,
    pub angles_requested: u64,
    pub written_files: Vec<PathBuf>,
    pub debug_files: Vec<PathBuf>,
    pub empty_angles: Vec<EmptyAngle>,
}

impl RenderSummary {
    pub fn total_images(&self) -> usize {
        self.written_files.len()
    }
}

/// Writes `summary` as pretty JSON, stamping `written_at`.
pub fn write_summary(path: &Path, summary: &RenderSummary) -> anyhow::Result<()> {
    let mut payload = serde_json::to_value(summary)?;
    if let Some(object) = payload.as_object_mut() {
        object.insert(
            "total_images".to_string(),
            serde_json::Value::Number(summary.total_images().into()),
        );
        object.insert(
            "written_at".to_string(),
            serde_json::Value::String(now_utc_iso()),
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

pub fn read_summary(path: &Path) -> anyhow::Result<RenderSummary> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::{json, Value};

    use super::{read_summary, write_summary, EmptyAngle, RenderSummary};

    fn summary() -> RenderSummary {
        RenderSummary {
            run_id: "20260219_101500".to_string(),
            started_at: "2026-02-19T10:15:00+00:00".to_string(),
            finished_at: "2026-02-19T10:16:00+00:00".to_string(),
            project_name: "Lakeview Villa".to_string(),
            model: "gemini-2.5-flash-image-preview".to_string(),
            angles_requested: 2,
            written_files: vec![PathBuf::from("out/exterior/Front_1.png")],
            debug_files: vec![PathBuf::from("out/exterior/Rear_debug.json")],
            empty_angles: vec![EmptyAngle {
                scope: "exterior".to_string(),
                scope_name: "exterior".to_string(),
                angle: "Rear".to_string(),
                debug_file: PathBuf::from("out/exterior/Rear_debug.json"),
            }],
        }
    }

    #[test]
    fn write_summary_adds_totals_and_timestamp() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");
        write_summary(&path, &summary())?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["run_id"], json!("20260219_101500"));
        assert_eq!(parsed["total_images"], json!(1));
        assert_eq!(parsed["empty_angles"][0]["angle"], json!("Rear"));
        assert!(parsed.get("written_at").and_then(Value::as_str).is_some());
        Ok(())
    }

    #[test]
    fn summary_reads_back() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("summary.json");
        write_summary(&path, &summary())?;
        assert_eq!(read_summary(&path)?, summary());
        Ok(())
    }
}
