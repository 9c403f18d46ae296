use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use archviz_contracts::events::{now_utc_iso, EventPayload, EventWriter, RunEvent};
use archviz_contracts::files::sanitize_segment;
use archviz_contracts::job::{CameraAngle, FileInput, RenderJob};
use archviz_contracts::prompt::{build_prompt_for_angle, with_finish_notes, Scope};
use archviz_contracts::runs::summary::{write_summary, EmptyAngle, RenderSummary};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::client::ImageClient;
use crate::transport::read_inline_files;

pub const EXTERIOR_DIR: &str = "exterior";
pub const INTERIOR_DIR: &str = "interior";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOutput {
    pub output_dir: PathBuf,
    /// Decoded images only, in write order.
    pub written_files: Vec<PathBuf>,
    pub debug_files: Vec<PathBuf>,
    pub empty_angles: Vec<EmptyAngle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderProgress {
    AngleStarted {
        index: usize,
        total: usize,
        scope: Scope,
        scope_name: String,
        angle: String,
    },
    ImagesWritten {
        angle: String,
        files: Vec<PathBuf>,
    },
    AngleEmpty {
        angle: String,
        debug_file: PathBuf,
    },
}

impl fmt::Display for RenderProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AngleStarted {
                index,
                total,
                scope,
                scope_name,
                angle,
            } => match scope {
                Scope::Exterior => write!(f, "[{index}/{total}] Rendering exterior: {angle}"),
                Scope::Room => write!(f, "[{index}/{total}] Rendering {scope_name}: {angle}"),
            },
            Self::ImagesWritten { angle, files } => {
                write!(f, "{angle}: wrote {} image(s)", files.len())
            }
            Self::AngleEmpty { angle, debug_file } => write!(
                f,
                "{angle}: no images returned; raw response saved to {}",
                debug_file.display()
            ),
        }
    }
}

struct RunRecords {
    run_id: String,
    events: EventWriter,
    summary_path: PathBuf,
}

/// One exterior or room unit, flattened for the sequential walk.
struct ScopeUnit<'a> {
    scope: Scope,
    scope_name: &'a str,
    dir: PathBuf,
    files: &'a [FileInput],
    notes: &'a str,
    angles: &'a [CameraAngle],
}

fn scope_units(job: &RenderJob) -> Vec<ScopeUnit<'_>> {
    let mut units = vec![ScopeUnit {
        scope: Scope::Exterior,
        scope_name: EXTERIOR_DIR,
        dir: PathBuf::from(EXTERIOR_DIR),
        files: &job.exterior.plan_files,
        notes: &job.exterior.finishes.notes,
        angles: &job.exterior.camera_angles,
    }];
    units.extend(job.interior.rooms.iter().map(|room| ScopeUnit {
        scope: Scope::Room,
        scope_name: &room.room_name,
        dir: Path::new(INTERIOR_DIR).join(sanitize_segment(&room.room_name)),
        files: &room.plan_or_reference_files,
        notes: &room.finishes.notes,
        angles: &room.camera_angles,
    }));
    units
}

/// Walks a [`RenderJob`] one angle at a time and writes what comes back.
pub struct Renderer<C: ImageClient> {
    client: C,
    output_dir: PathBuf,
    records: Option<RunRecords>,
}

impl<C: ImageClient> Renderer<C> {
    pub fn new(client: C, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
            records: None,
        }
    }

    /// Enables `events.jsonl` and `summary.json` inside the output directory.
    pub fn with_run_records(mut self, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        self.records = Some(RunRecords {
            events: EventWriter::new(self.output_dir.join(EVENTS_FILE), run_id.clone()),
            summary_path: self.output_dir.join(SUMMARY_FILE),
            run_id,
        });
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn render_all(&self, job: &RenderJob) -> Result<RenderOutput> {
        self.render_all_with(job, &mut |_: RenderProgress| {})
    }

    /// Like [`Renderer::render_all`], reporting each angle to `progress`. The
    /// first failing angle aborts the run.
    pub fn render_all_with(
        &self,
        job: &RenderJob,
        progress: &mut dyn FnMut(RenderProgress),
    ) -> Result<RenderOutput> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "failed to create output directory {}",
                self.output_dir.display()
            )
        })?;
        let started_at = now_utc_iso();
        self.emit(
            RunEvent::RunStarted,
            json!({
                "project_name": job.project_name,
                "model": job.model_name,
                "angles": job.angle_count(),
                "out_dir": self.output_dir.to_string_lossy(),
            }),
        )?;

        let mut output = RenderOutput {
            output_dir: self.output_dir.clone(),
            ..RenderOutput::default()
        };
        if let Err(err) = self.render_scopes(job, progress, &mut output) {
            let failed = self.emit(
                RunEvent::RunFailed,
                json!({
                    "error": format!("{err:#}"),
                    "written_files": output.written_files.len(),
                }),
            );
            if let Err(emit_err) = failed {
                log::warn!("failed to record run_failed event: {emit_err:#}");
            }
            return Err(err);
        }

        self.emit(
            RunEvent::RunFinished,
            json!({
                "total_images": output.written_files.len(),
                "empty_angles": output.empty_angles.len(),
            }),
        )?;
        if let Some(records) = &self.records {
            let summary = RenderSummary {
                run_id: records.run_id.clone(),
                started_at,
                finished_at: now_utc_iso(),
                project_name: job.project_name.clone(),
                model: job.model_name.clone(),
                angles_requested: job.angle_count() as u64,
                written_files: output.written_files.clone(),
                debug_files: output.debug_files.clone(),
                empty_angles: output.empty_angles.clone(),
            };
            write_summary(&records.summary_path, &summary)?;
        }
        Ok(output)
    }

    fn render_scopes(
        &self,
        job: &RenderJob,
        progress: &mut dyn FnMut(RenderProgress),
        output: &mut RenderOutput,
    ) -> Result<()> {
        let total = job.angle_count();
        let mut index = 0;
        let mut names = OutputNames::default();
        for unit in scope_units(job) {
            if unit.angles.is_empty() {
                continue;
            }
            let inline_files = read_inline_files(unit.files.iter().map(|file| file.path.as_path()))
                .with_context(|| format!("failed to read attachments for {}", unit.scope_name))?;
            let dir = self.output_dir.join(&unit.dir);

            for angle in unit.angles {
                index += 1;
                progress(RenderProgress::AngleStarted {
                    index,
                    total,
                    scope: unit.scope,
                    scope_name: unit.scope_name.to_string(),
                    angle: angle.name.clone(),
                });
                self.emit(
                    RunEvent::AngleStarted,
                    json!({
                        "scope": unit.scope.as_str(),
                        "scope_name": unit.scope_name,
                        "angle": angle.name,
                        "attachments": inline_files.len(),
                    }),
                )?;

                let prompt = with_finish_notes(
                    &build_prompt_for_angle(
                        job,
                        unit.scope,
                        unit.scope_name,
                        &angle.name,
                        &angle.description,
                    ),
                    unit.scope,
                    unit.notes,
                );
                let response = self
                    .client
                    .generate(&job.model_name, &prompt, &inline_files)
                    .with_context(|| {
                        format!(
                            "render failed for {} angle '{}' ({})",
                            unit.scope, angle.name, unit.scope_name
                        )
                    })?;

                if response.images_b64.is_empty() {
                    let debug_file =
                        write_debug(&mut names, &response.raw, &dir, &angle.name)?;
                    self.emit(
                        RunEvent::AngleEmpty,
                        json!({
                            "scope": unit.scope.as_str(),
                            "scope_name": unit.scope_name,
                            "angle": angle.name,
                            "model": response.model,
                            "transport": response.transport.as_str(),
                            "debug_file": debug_file.to_string_lossy(),
                        }),
                    )?;
                    output.debug_files.push(debug_file.clone());
                    output.empty_angles.push(EmptyAngle {
                        scope: unit.scope.as_str().to_string(),
                        scope_name: unit.scope_name.to_string(),
                        angle: angle.name.clone(),
                        debug_file: debug_file.clone(),
                    });
                    progress(RenderProgress::AngleEmpty {
                        angle: angle.name.clone(),
                        debug_file,
                    });
                    continue;
                }

                let files =
                    write_images(&mut names, &response.images_b64, &dir, &angle.name)?;
                self.emit(
                    RunEvent::ImagesWritten,
                    json!({
                        "scope": unit.scope.as_str(),
                        "scope_name": unit.scope_name,
                        "angle": angle.name,
                        "model": response.model,
                        "transport": response.transport.as_str(),
                        "files": files
                            .iter()
                            .map(|path| path.to_string_lossy().to_string())
                            .collect::<Vec<_>>(),
                    }),
                )?;
                output.written_files.extend(files.iter().cloned());
                progress(RenderProgress::ImagesWritten {
                    angle: angle.name.clone(),
                    files,
                });
            }
        }
        Ok(())
    }

    /// Records a failure that escaped `render_all_with` without an error value.
    pub(crate) fn record_failure(&self, error: &str) {
        if let Err(err) = self.emit(RunEvent::RunFailed, json!({ "error": error })) {
            log::warn!("failed to record run_failed event: {err:#}");
        }
    }

    fn emit(&self, event: RunEvent, payload: Value) -> Result<()> {
        if let Some(records) = &self.records {
            records.events.emit(event, map_object(payload))?;
        }
        Ok(())
    }
}

fn map_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Output names handed out during one run. Numbering continues per
/// `(directory, stem)` so repeated angle names, or rooms that sanitize to the
/// same segment, never reuse a path. Files already on disk are skipped.
#[derive(Debug, Default)]
struct OutputNames {
    images: HashMap<PathBuf, usize>,
    debug_dumps: HashMap<PathBuf, usize>,
}

impl OutputNames {
    fn next_image(&mut self, dir: &Path, stem: &str) -> PathBuf {
        let counter = self.images.entry(dir.join(stem)).or_insert(0);
        loop {
            *counter += 1;
            let path = dir.join(format!("{stem}_{counter}.png"));
            if !path.exists() {
                return path;
            }
        }
    }

    fn next_debug(&mut self, dir: &Path, stem: &str) -> PathBuf {
        let counter = self.debug_dumps.entry(dir.join(stem)).or_insert(0);
        loop {
            *counter += 1;
            let path = match *counter {
                1 => dir.join(format!("{stem}_debug.json")),
                n => dir.join(format!("{stem}_debug_{n}.json")),
            };
            if !path.exists() {
                return path;
            }
        }
    }
}

/// Decodes each payload to `<dir>/<angle>_<n>.png`.
fn write_images(
    names: &mut OutputNames,
    images_b64: &[String],
    dir: &Path,
    angle_name: &str,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;
    let stem = sanitize_segment(angle_name);
    let mut paths = Vec::with_capacity(images_b64.len());
    for (offset, encoded) in images_b64.iter().enumerate() {
        let compact: String = encoded.split_whitespace().collect();
        let bytes = BASE64.decode(compact.as_bytes()).with_context(|| {
            format!("image {} for '{angle_name}' is not valid base64", offset + 1)
        })?;
        let path = names.next_image(dir, &stem);
        fs::write(&path, bytes).with_context(|| format!("failed writing {}", path.display()))?;
        paths.push(path);
    }
    Ok(paths)
}

/// Persists a response that carried no image as `<dir>/<angle>_debug.json`.
fn write_debug(
    names: &mut OutputNames,
    raw: &Value,
    dir: &Path,
    angle_name: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;
    let path = names.next_debug(dir, &sanitize_segment(angle_name));
    fs::write(&path, serde_json::to_string_pretty(raw)?)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(path)
}
