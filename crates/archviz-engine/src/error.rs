use thiserror::Error;

/// Remediation text attached to 404 responses.
pub const MODEL_NOT_FOUND_HINT: &str = "Gemini returned 404 \
(model not found or endpoint not supported). \
Fix by choosing a model name that exists for your API key. \
Try `archviz list-models` or call: \
https://generativelanguage.googleapis.com/v1beta/models?key=YOUR_KEY";

const BODY_PREVIEW_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{}", http_error_message(.status, .body))]
    Http { status: u16, body: String },

    #[error("{transport} transport unavailable: {reason}")]
    TransportUnavailable {
        transport: &'static str,
        reason: String,
    },

    #[error("{context} returned invalid JSON payload: {source}")]
    MalformedResponse {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("request timed out after {seconds}s ({endpoint})")]
    Timeout { endpoint: String, seconds: u64 },

    #[error("request failed ({endpoint}): {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("missing API key: set GEMINI_API_KEY (or GOOGLE_API_KEY) or pass --api-key")]
    MissingApiKey,

    #[error("placeholder image encoding failed: {reason}")]
    Encode { reason: String },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_transport_unavailable(&self) -> bool {
        matches!(self, Self::TransportUnavailable { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

fn http_error_message(status: &u16, body: &str) -> String {
    let preview = truncate_text(body.trim(), BODY_PREVIEW_CHARS);
    if *status == 404 {
        if preview.is_empty() {
            return MODEL_NOT_FOUND_HINT.to_string();
        }
        return format!("{MODEL_NOT_FOUND_HINT} (response: {preview})");
    }
    format!("request failed (HTTP {status}): {preview}")
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
