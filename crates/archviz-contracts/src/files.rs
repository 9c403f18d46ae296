use std::path::Path;

use serde::{Deserialize, Serialize};

/// Placeholder segment used when a name sanitizes down to nothing.
pub const UNNAMED_SEGMENT: &str = "untitled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Image,
    #[default]
    Other,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Image => "image",
            Self::Other => "other",
        }
    }
}

pub fn kind_from_path(path: &Path) -> FileKind {
    match lowercase_extension(path).as_deref() {
        Some("pdf") => FileKind::Pdf,
        Some("png" | "jpg" | "jpeg" | "webp") => FileKind::Image,
        _ => FileKind::Other,
    }
}

pub fn guess_mime(path: &Path) -> &'static str {
    let Some(ext) = lowercase_extension(path) else {
        return "application/octet-stream";
    };
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Turns a user-supplied label into a single safe path segment.
///
/// Anything other than alphanumerics, `-` and `_` becomes `_`, then
/// underscores are trimmed from both ends. Idempotent.
pub fn sanitize_segment(raw: &str) -> String {
    let replaced = raw
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() {
        return UNNAMED_SEGMENT.to_string();
    }
    trimmed.to_string()
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase)
}
