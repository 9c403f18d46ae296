use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use archviz_contracts::files::guess_mime;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::{bare_model_id, rest_endpoint, ClientConfig, TransportPreference};
use crate::error::ClientError;

const DRYRUN_IMAGE_SIDE: u32 = 256;

/// A reference document sent alongside a prompt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineFile {
    pub mime_type: String,
    pub data_b64: String,
}

impl fmt::Debug for InlineFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineFile")
            .field("mime_type", &self.mime_type)
            .field("data_b64_len", &self.data_b64.len())
            .finish()
    }
}

impl InlineFile {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data_b64: BASE64.encode(bytes),
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Self::from_bytes(guess_mime(path), &bytes))
    }
}

pub fn read_inline_files<'a>(
    paths: impl IntoIterator<Item = &'a Path>,
) -> anyhow::Result<Vec<InlineFile>> {
    paths.into_iter().map(InlineFile::from_path).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Content,
    Rest,
    Imagen,
    Dryrun,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Rest => "rest",
            Self::Imagen => "imagen",
            Self::Dryrun => "dryrun",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransportRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub inline_files: &'a [InlineFile],
}

/// One way of turning a prompt plus attachments into a raw response document.
pub trait ImageTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Capability check run once when the client is built.
    fn probe(&self) -> Result<(), ClientError> {
        Ok(())
    }

    fn generate(&self, request: &TransportRequest<'_>) -> Result<Value, ClientError>;
}

/// Authenticated blocking HTTP shared by the network transports.
#[derive(Clone)]
pub(crate) struct HttpContext {
    http: HttpClient,
    api_key: String,
    timeout_secs: u64,
}

impl HttpContext {
    pub(crate) fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| ClientError::Request {
                endpoint: "http client init".to_string(),
                source,
            })?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs(),
        })
    }

    pub(crate) fn get_json(&self, context: &str, endpoint: &str) -> Result<Value, ClientError> {
        log::debug!("{context}: GET {endpoint}");
        let response = self
            .http
            .get(endpoint)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .map_err(|err| self.send_error(endpoint, err))?;
        self.json_or_error(context, endpoint, response)
    }

    pub(crate) fn post_json(
        &self,
        context: &str,
        endpoint: &str,
        payload: &Value,
    ) -> Result<Value, ClientError> {
        log::debug!("{context}: POST {endpoint}");
        let response = self
            .http
            .post(endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(payload)
            .send()
            .map_err(|err| self.send_error(endpoint, err))?;
        self.json_or_error(context, endpoint, response)
    }

    fn json_or_error(
        &self,
        context: &str,
        endpoint: &str,
        response: HttpResponse,
    ) -> Result<Value, ClientError> {
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| self.send_error(endpoint, err))?;
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|source| ClientError::MalformedResponse {
            context: context.to_string(),
            source,
        })
    }

    // The request URL carries the key as a query parameter; strip it from
    // reqwest's error before it reaches a log line.
    fn send_error(&self, endpoint: &str, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            return ClientError::Timeout {
                endpoint: endpoint.to_string(),
                seconds: self.timeout_secs,
            };
        }
        ClientError::Request {
            endpoint: endpoint.to_string(),
            source: err.without_url(),
        }
    }
}

/// Structured `generateContent` call asking for image output, the path the
/// vendor SDK takes.
pub struct ContentTransport {
    http: HttpContext,
    api_base: String,
    unavailable_reason: Option<String>,
}

impl ContentTransport {
    pub(crate) fn new(http: HttpContext, config: &ClientConfig) -> Self {
        let unavailable_reason = if config.transport == TransportPreference::Rest {
            Some("REST transport forced".to_string())
        } else if config.rest_endpoint.is_some() {
            Some("custom REST endpoint configured".to_string())
        } else {
            None
        };
        Self {
            http,
            api_base: config.api_base.clone(),
            unavailable_reason,
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_base,
            bare_model_id(model)
        )
    }

    /// Prompt first, then one `inlineData` part per attachment. Attachments
    /// that are neither images nor PDFs are declined so the REST path can
    /// carry them as-is.
    pub fn build_payload(request: &TransportRequest<'_>) -> Result<Value, ClientError> {
        let mut parts = vec![json!({ "text": request.prompt })];
        for file in request.inline_files {
            if !(file.mime_type.starts_with("image/") || file.mime_type == "application/pdf") {
                return Err(ClientError::TransportUnavailable {
                    transport: TransportKind::Content.as_str(),
                    reason: format!("attachment type {} not supported", file.mime_type),
                });
            }
            parts.push(json!({
                "inlineData": {
                    "mimeType": file.mime_type,
                    "data": file.data_b64,
                }
            }));
        }
        Ok(json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"],
            },
        }))
    }
}

impl ImageTransport for ContentTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Content
    }

    fn probe(&self) -> Result<(), ClientError> {
        match &self.unavailable_reason {
            Some(reason) => Err(ClientError::TransportUnavailable {
                transport: TransportKind::Content.as_str(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn generate(&self, request: &TransportRequest<'_>) -> Result<Value, ClientError> {
        self.probe()?;
        let payload = Self::build_payload(request)?;
        let endpoint = self.endpoint_for_model(request.model);
        self.http.post_json("Gemini", &endpoint, &payload)
    }
}

/// Plain REST body sent to the configured endpoint template.
pub struct RestTransport {
    http: HttpContext,
    api_base: String,
    endpoint_template: Option<String>,
}

impl RestTransport {
    pub(crate) fn new(http: HttpContext, config: &ClientConfig) -> Self {
        Self {
            http,
            api_base: config.api_base.clone(),
            endpoint_template: config.rest_endpoint.clone(),
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        rest_endpoint(&self.api_base, self.endpoint_template.as_deref(), model)
    }

    pub fn build_payload(request: &TransportRequest<'_>) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        parts.extend(request.inline_files.iter().map(|file| {
            json!({
                "inline_data": {
                    "mime_type": file.mime_type,
                    "data": file.data_b64,
                }
            })
        }));
        json!({ "contents": [{ "parts": parts }] })
    }
}

impl ImageTransport for RestTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Rest
    }

    fn generate(&self, request: &TransportRequest<'_>) -> Result<Value, ClientError> {
        let endpoint = self.endpoint_for_model(request.model);
        self.http
            .post_json("Gemini REST", &endpoint, &Self::build_payload(request))
    }
}

/// Prompt-only Imagen `:predict` call. Attachments are ignored.
pub struct ImagenTransport {
    http: HttpContext,
    api_base: String,
}

impl ImagenTransport {
    pub(crate) fn new(http: HttpContext, config: &ClientConfig) -> Self {
        Self {
            http,
            api_base: config.api_base.clone(),
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        format!("{}/models/{}:predict", self.api_base, bare_model_id(model))
    }

    pub fn build_payload(prompt: &str) -> Value {
        json!({
            "instances": [{ "prompt": prompt }],
            "parameters": { "sampleCount": 1 },
        })
    }
}

impl ImageTransport for ImagenTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Imagen
    }

    fn generate(&self, request: &TransportRequest<'_>) -> Result<Value, ClientError> {
        let endpoint = self.endpoint_for_model(request.model);
        self.http
            .post_json("Imagen", &endpoint, &Self::build_payload(request.prompt))
    }
}

/// Offline transport: a solid-colour PNG derived from the prompt, wrapped in a
/// content-shaped response.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunTransport;

impl DryrunTransport {
    fn placeholder_png(prompt: &str, model: &str) -> Result<(Vec<u8>, String), ClientError> {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(prompt.as_bytes());
        let digest = hasher.finalize();

        let mut image = RgbImage::new(DRYRUN_IMAGE_SIDE, DRYRUN_IMAGE_SIDE);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([digest[0], digest[1], digest[2]]);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| ClientError::Encode {
                reason: err.to_string(),
            })?;
        Ok((bytes, hex::encode(&digest[..8])))
    }
}

impl ImageTransport for DryrunTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Dryrun
    }

    fn generate(&self, request: &TransportRequest<'_>) -> Result<Value, ClientError> {
        let (png, digest) = Self::placeholder_png(request.prompt, request.model)?;
        Ok(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": format!("dry run for {}", bare_model_id(request.model)) },
                        { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(png) } },
                    ],
                },
            }],
            "modelVersion": format!("dryrun:{}", bare_model_id(request.model)),
            "promptDigest": digest,
            "attachments": request.inline_files.len(),
        }))
    }
}
