use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_FALLBACK_MODEL: &str = "imagen-4.0-generate-001";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPreference {
    /// Structured content transport when it probes available, REST otherwise.
    #[default]
    Auto,
    Rest,
    Dryrun,
}

/// Values supplied explicitly by the caller; each wins over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub rest_endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub fallback_model: Option<String>,
    pub disable_fallback: bool,
    pub transport: TransportPreference,
}

#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub api_base: String,
    /// REST endpoint template; `{model}` is replaced with the model id.
    pub rest_endpoint: Option<String>,
    pub timeout: Duration,
    pub fallback_model: Option<String>,
    pub transport: TransportPreference,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("api_base", &self.api_base)
            .field("rest_endpoint", &self.rest_endpoint)
            .field("timeout", &self.timeout)
            .field("fallback_model", &self.fallback_model)
            .field("transport", &self.transport)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            rest_endpoint: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            fallback_model: Some(DEFAULT_FALLBACK_MODEL.to_string()),
            transport: TransportPreference::Auto,
        }
    }

    /// Resolves against the process environment.
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self, ClientError> {
        Self::resolve_with(overrides, |key| env::var(key).ok())
    }

    /// Resolves with an explicit variable lookup. Blank values count as unset.
    /// A missing API key is an error unless the dry-run transport is selected.
    pub fn resolve_with<F>(overrides: ConfigOverrides, lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_key = non_blank(overrides.api_key)
            .or_else(|| var("GEMINI_API_KEY"))
            .or_else(|| var("GOOGLE_API_KEY"));
        let api_key = match (api_key, overrides.transport) {
            (Some(key), _) => key,
            (None, TransportPreference::Dryrun) => String::new(),
            (None, _) => return Err(ClientError::MissingApiKey),
        };

        let api_base = non_blank(overrides.api_base)
            .or_else(|| var("GEMINI_API_BASE"))
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let rest_endpoint =
            non_blank(overrides.rest_endpoint).or_else(|| var("GEMINI_REST_ENDPOINT"));
        let timeout = Duration::from_secs(
            overrides
                .timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );
        let fallback_model = if overrides.disable_fallback {
            None
        } else {
            Some(
                non_blank(overrides.fallback_model)
                    .or_else(|| var("ARCHVIZ_FALLBACK_MODEL"))
                    .unwrap_or_else(|| DEFAULT_FALLBACK_MODEL.to_string()),
            )
        };

        Ok(Self {
            api_key,
            api_base,
            rest_endpoint,
            timeout,
            fallback_model,
            transport: overrides.transport,
        })
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }

    pub fn models_endpoint(&self) -> String {
        format!("{}/models", self.api_base)
    }

    /// REST `generateContent` URL for `model`, from the custom template when
    /// one is configured.
    pub fn rest_endpoint_for(&self, model: &str) -> String {
        rest_endpoint(&self.api_base, self.rest_endpoint.as_deref(), model)
    }
}

pub(crate) fn rest_endpoint(api_base: &str, template: Option<&str>, model: &str) -> String {
    let model_id = bare_model_id(model);
    match template {
        Some(template) if template.contains("{model}") => template.replace("{model}", model_id),
        Some(fixed) => fixed.to_string(),
        None => format!("{api_base}/models/{model_id}:generateContent"),
    }
}

/// Loads `.env` from the working directory or its ancestors, if present.
/// Variables already set in the environment are left untouched.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Default root for timestamped output directories.
pub fn default_output_root() -> PathBuf {
    env::var("ARCHVIZ_OUTPUT_DIR")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("output"))
}

pub(crate) fn bare_model_id(model: &str) -> &str {
    let trimmed = model.trim();
    trimmed.strip_prefix("models/").unwrap_or(trimmed)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<char>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{tail}")
}
