use serde_json::{json, Value};

use crate::config::{ClientConfig, TransportPreference};
use crate::error::ClientError;
use crate::extract::{extract_images, extract_inline_images};
use crate::transport::{
    ContentTransport, DryrunTransport, HttpContext, ImageTransport, ImagenTransport, InlineFile,
    RestTransport, TransportKind, TransportRequest,
};

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Base64 image payloads, ready to decode.
    pub images_b64: Vec<String>,
    /// The response body as received, kept for debug dumps.
    pub raw: Value,
    pub transport: TransportKind,
    pub model: String,
}

/// Anything the render orchestrator can ask for images.
pub trait ImageClient: Send + Sync {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        inline_files: &[InlineFile],
    ) -> Result<GenerateResponse, ClientError>;
}

pub struct GeminiClient {
    http: Option<HttpContext>,
    models_endpoint: String,
    primary: Option<Box<dyn ImageTransport>>,
    rest: Box<dyn ImageTransport>,
    fallback: Option<Box<dyn ImageTransport>>,
    fallback_model: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        if config.transport == TransportPreference::Dryrun {
            return Ok(Self::assemble(
                None,
                config.models_endpoint(),
                Some(Box::new(DryrunTransport)),
                Box::new(DryrunTransport),
                None,
                None,
            ));
        }
        if config.api_key.trim().is_empty() {
            return Err(ClientError::MissingApiKey);
        }

        let http = HttpContext::from_config(config)?;
        Ok(Self::assemble(
            Some(http.clone()),
            config.models_endpoint(),
            Some(Box::new(ContentTransport::new(http.clone(), config))),
            Box::new(RestTransport::new(http.clone(), config)),
            Some(Box::new(ImagenTransport::new(http, config))),
            config.fallback_model.clone(),
        ))
    }

    /// Builds a client around caller-supplied transports. `list_models` is
    /// unavailable on such a client.
    pub fn with_transports(
        primary: Option<Box<dyn ImageTransport>>,
        rest: Box<dyn ImageTransport>,
        fallback: Option<Box<dyn ImageTransport>>,
        fallback_model: Option<String>,
    ) -> Self {
        Self::assemble(None, String::new(), primary, rest, fallback, fallback_model)
    }

    // The primary transport is probed exactly once, here.
    fn assemble(
        http: Option<HttpContext>,
        models_endpoint: String,
        primary: Option<Box<dyn ImageTransport>>,
        rest: Box<dyn ImageTransport>,
        fallback: Option<Box<dyn ImageTransport>>,
        fallback_model: Option<String>,
    ) -> Self {
        let primary = primary.and_then(|transport| match transport.probe() {
            Ok(()) => Some(transport),
            Err(err) => {
                log::info!("{err}; using {} transport", rest.kind());
                None
            }
        });
        Self {
            http,
            models_endpoint,
            primary,
            rest,
            fallback,
            fallback_model,
        }
    }

    /// Transport that `generate_image` tries first.
    pub fn active_transport(&self) -> TransportKind {
        self.primary
            .as_ref()
            .map(|transport| transport.kind())
            .unwrap_or_else(|| self.rest.kind())
    }

    pub fn list_models(&self) -> Result<Value, ClientError> {
        match &self.http {
            Some(http) => http.get_json("Gemini models", &self.models_endpoint),
            None if self.active_transport() == TransportKind::Dryrun => Ok(json!({
                "models": [{
                    "name": "models/dryrun-image",
                    "displayName": "Offline placeholder renders",
                    "supportedGenerationMethods": ["generateContent"],
                }]
            })),
            None => Err(ClientError::TransportUnavailable {
                transport: "models",
                reason: "client has no HTTP transport".to_string(),
            }),
        }
    }

    /// Primary transport, REST when the primary declines, then a single
    /// prompt-only request against `fallback_model` when the primary answered
    /// without any image.
    pub fn generate_image(
        &self,
        model: &str,
        prompt: &str,
        inline_files: &[InlineFile],
        fallback_model: Option<&str>,
    ) -> Result<GenerateResponse, ClientError> {
        let request = TransportRequest {
            model,
            prompt,
            inline_files,
        };

        if let Some(primary) = &self.primary {
            match primary.generate(&request) {
                Ok(raw) => {
                    let images_b64 = extract_inline_images(&raw);
                    let response = GenerateResponse {
                        images_b64,
                        raw,
                        transport: primary.kind(),
                        model: model.to_string(),
                    };
                    if !response.images_b64.is_empty() {
                        return Ok(response);
                    }
                    return match (fallback_model, &self.fallback) {
                        (Some(fallback_model), Some(fallback)) => {
                            log::warn!(
                                "{model} returned no images; retrying prompt-only with {}",
                                fallback_model
                            );
                            let raw = fallback.generate(&TransportRequest {
                                model: fallback_model,
                                prompt,
                                inline_files: &[],
                            })?;
                            Ok(GenerateResponse {
                                images_b64: extract_images(&raw),
                                raw,
                                transport: fallback.kind(),
                                model: fallback_model.to_string(),
                            })
                        }
                        _ => Ok(response),
                    };
                }
                Err(err) if err.is_transport_unavailable() => {
                    log::warn!("{err}; falling back to {} transport", self.rest.kind());
                }
                Err(err) => return Err(err),
            }
        }

        let raw = self.rest.generate(&request)?;
        Ok(GenerateResponse {
            images_b64: extract_inline_images(&raw),
            raw,
            transport: self.rest.kind(),
            model: model.to_string(),
        })
    }
}

impl ImageClient for GeminiClient {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        inline_files: &[InlineFile],
    ) -> Result<GenerateResponse, ClientError> {
        self.generate_image(model, prompt, inline_files, self.fallback_model.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::{GeminiClient, ImageClient};
    use crate::config::{ClientConfig, TransportPreference};
    use crate::error::{ClientError, MODEL_NOT_FOUND_HINT};
    use crate::transport::{ImageTransport, InlineFile, TransportKind, TransportRequest};

    #[derive(Debug, Clone)]
    struct Call {
        model: String,
        prompt: String,
        attachments: usize,
    }

    enum Reply {
        Json(Value),
        Unavailable,
        NotFound,
    }

    struct FakeTransport {
        kind: TransportKind,
        probe_ok: bool,
        reply: Reply,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl FakeTransport {
        fn new(kind: TransportKind, reply: Reply) -> (Self, Arc<Mutex<Vec<Call>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    kind,
                    probe_ok: true,
                    reply,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl ImageTransport for FakeTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn probe(&self) -> Result<(), ClientError> {
            if self.probe_ok {
                return Ok(());
            }
            Err(ClientError::TransportUnavailable {
                transport: "fake",
                reason: "probe failed".to_string(),
            })
        }

        fn generate(&self, request: &TransportRequest<'_>) -> Result<Value, ClientError> {
            if let Ok(mut rows) = self.calls.lock() {
                rows.push(Call {
                    model: request.model.to_string(),
                    prompt: request.prompt.to_string(),
                    attachments: request.inline_files.len(),
                });
            }
            match &self.reply {
                Reply::Json(value) => Ok(value.clone()),
                Reply::Unavailable => Err(ClientError::TransportUnavailable {
                    transport: "fake",
                    reason: "declined".to_string(),
                }),
                Reply::NotFound => Err(ClientError::Http {
                    status: 404,
                    body: "{}".to_string(),
                }),
            }
        }
    }

    fn image_response(data: &str) -> Value {
        json!({"candidates": [{"content": {"parts": [
            {"inlineData": {"mimeType": "image/png", "data": data}}
        ]}}]})
    }

    fn empty_response() -> Value {
        json!({"candidates": [{"content": {"parts": [{"text": "I can only describe it."}]}}]})
    }

    fn calls(log: &Arc<Mutex<Vec<Call>>>) -> Vec<Call> {
        log.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    fn attachments() -> Vec<InlineFile> {
        vec![InlineFile::from_bytes("application/pdf", b"plan")]
    }

    #[test]
    fn primary_images_are_returned_without_fallback() -> anyhow::Result<()> {
        let (primary, primary_calls) =
            FakeTransport::new(TransportKind::Content, Reply::Json(image_response("IMG")));
        let (rest, rest_calls) = FakeTransport::new(TransportKind::Rest, Reply::NotFound);
        let (fallback, fallback_calls) =
            FakeTransport::new(TransportKind::Imagen, Reply::Json(image_response("FB")));
        let client = GeminiClient::with_transports(
            Some(Box::new(primary)),
            Box::new(rest),
            Some(Box::new(fallback)),
            Some("imagen-4.0-generate-001".to_string()),
        );

        let response = client.generate("gemini-x", "prompt", &attachments())?;
        assert_eq!(response.images_b64, vec!["IMG"]);
        assert_eq!(response.transport, TransportKind::Content);
        assert_eq!(calls(&primary_calls)[0].attachments, 1);
        assert!(calls(&rest_calls).is_empty());
        assert!(calls(&fallback_calls).is_empty());
        Ok(())
    }

    #[test]
    fn unavailable_primary_falls_back_to_rest_with_same_payload() -> anyhow::Result<()> {
        let (primary, _) = FakeTransport::new(TransportKind::Content, Reply::Unavailable);
        let (rest, rest_calls) =
            FakeTransport::new(TransportKind::Rest, Reply::Json(image_response("REST")));
        let client =
            GeminiClient::with_transports(Some(Box::new(primary)), Box::new(rest), None, None);

        let response = client.generate_image("gemini-x", "prompt", &attachments(), None)?;
        assert_eq!(response.images_b64, vec!["REST"]);
        assert_eq!(response.transport, TransportKind::Rest);
        let rest_calls = calls(&rest_calls);
        assert_eq!(rest_calls.len(), 1);
        assert_eq!(rest_calls[0].model, "gemini-x");
        assert_eq!(rest_calls[0].attachments, 1);
        Ok(())
    }

    #[test]
    fn failed_probe_selects_rest_at_construction() -> anyhow::Result<()> {
        let (mut primary, primary_calls) =
            FakeTransport::new(TransportKind::Content, Reply::Json(image_response("P")));
        primary.probe_ok = false;
        let (rest, _) = FakeTransport::new(TransportKind::Rest, Reply::Json(image_response("R")));
        let client =
            GeminiClient::with_transports(Some(Box::new(primary)), Box::new(rest), None, None);

        assert_eq!(client.active_transport(), TransportKind::Rest);
        assert_eq!(client.generate("m", "p", &[])?.images_b64, vec!["R"]);
        assert!(calls(&primary_calls).is_empty());
        Ok(())
    }

    #[test]
    fn empty_primary_retries_once_prompt_only_on_fallback_model() -> anyhow::Result<()> {
        let (primary, _) =
            FakeTransport::new(TransportKind::Content, Reply::Json(empty_response()));
        let (rest, rest_calls) = FakeTransport::new(TransportKind::Rest, Reply::NotFound);
        let (fallback, fallback_calls) = FakeTransport::new(
            TransportKind::Imagen,
            Reply::Json(json!({"predictions": [{"bytesBase64Encoded": "IMAGEN"}]})),
        );
        let client = GeminiClient::with_transports(
            Some(Box::new(primary)),
            Box::new(rest),
            Some(Box::new(fallback)),
            Some("imagen-4.0-generate-001".to_string()),
        );

        let response = client.generate("gemini-text", "the prompt", &attachments())?;
        assert_eq!(response.images_b64, vec!["IMAGEN"]);
        assert_eq!(response.model, "imagen-4.0-generate-001");
        assert_eq!(response.transport, TransportKind::Imagen);
        let fallback_calls = calls(&fallback_calls);
        assert_eq!(fallback_calls.len(), 1);
        assert_eq!(fallback_calls[0].attachments, 0);
        assert_eq!(fallback_calls[0].prompt, "the prompt");
        assert!(calls(&rest_calls).is_empty());
        Ok(())
    }

    #[test]
    fn empty_primary_without_fallback_model_is_returned_as_is() -> anyhow::Result<()> {
        let (primary, _) =
            FakeTransport::new(TransportKind::Content, Reply::Json(empty_response()));
        let (rest, _) = FakeTransport::new(TransportKind::Rest, Reply::NotFound);
        let (fallback, fallback_calls) =
            FakeTransport::new(TransportKind::Imagen, Reply::Json(image_response("FB")));
        let client = GeminiClient::with_transports(
            Some(Box::new(primary)),
            Box::new(rest),
            Some(Box::new(fallback)),
            None,
        );

        let response = client.generate("gemini-text", "p", &[])?;
        assert!(response.images_b64.is_empty());
        assert_eq!(response.raw, empty_response());
        assert!(calls(&fallback_calls).is_empty());
        Ok(())
    }

    #[test]
    fn empty_rest_response_never_uses_the_fallback_model() -> anyhow::Result<()> {
        let (rest, _) = FakeTransport::new(TransportKind::Rest, Reply::Json(empty_response()));
        let (fallback, fallback_calls) =
            FakeTransport::new(TransportKind::Imagen, Reply::Json(image_response("FB")));
        let client = GeminiClient::with_transports(
            None,
            Box::new(rest),
            Some(Box::new(fallback)),
            Some("imagen-4.0-generate-001".to_string()),
        );

        assert!(client.generate("m", "p", &[])?.images_b64.is_empty());
        assert!(calls(&fallback_calls).is_empty());
        Ok(())
    }

    #[test]
    fn primary_http_errors_are_not_retried() {
        let (primary, _) = FakeTransport::new(TransportKind::Content, Reply::NotFound);
        let (rest, rest_calls) =
            FakeTransport::new(TransportKind::Rest, Reply::Json(image_response("R")));
        let client =
            GeminiClient::with_transports(Some(Box::new(primary)), Box::new(rest), None, None);

        let err = client.generate("missing-model", "p", &[]).err();
        assert_eq!(err.and_then(|err| err.status()), Some(404));
        assert!(calls(&rest_calls).is_empty());
    }

    #[test]
    fn dryrun_client_needs_no_network() -> anyhow::Result<()> {
        let mut config = ClientConfig::new("");
        config.transport = TransportPreference::Dryrun;
        let client = GeminiClient::new(&config)?;
        assert_eq!(client.active_transport(), TransportKind::Dryrun);
        assert_eq!(client.generate("m", "p", &[])?.images_b64.len(), 1);
        assert!(client.list_models()?["models"].is_array());
        Ok(())
    }

    #[test]
    fn network_client_requires_a_key() {
        let err = GeminiClient::new(&ClientConfig::new("  ")).err();
        assert!(matches!(err, Some(ClientError::MissingApiKey)));
    }

    /// Serves one canned HTTP response on a loopback port and returns the
    /// base URL plus a handle yielding the request line.
    fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> anyhow::Result<(String, thread::JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}", listener.local_addr()?);
        let handle = thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return String::new();
            };
            let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
            let mut reader = BufReader::new(match stream.try_clone() {
                Ok(clone) => clone,
                Err(_) => return String::new(),
            });
            let mut request_line = String::new();
            let _ = reader.read_line(&mut request_line);
            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap_or(0) == 0 || header == "\r\n" {
                    break;
                }
                if let Some(value) = header.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
            let mut body_buf = vec![0u8; content_length];
            let _ = reader.read_exact(&mut body_buf);
            let response = format!(
                concat!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\n",
                    "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                ),
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
            request_line
        });
        Ok((base, handle))
    }

    /// Accepts one connection, reads the request head, then holds the socket
    /// open without answering for `stall`.
    fn serve_stalled(stall: Duration) -> anyhow::Result<(String, thread::JoinHandle<()>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}", listener.local_addr()?);
        let handle = thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(&stream);
            let mut line = String::new();
            while reader.read_line(&mut line).map(|read| read > 2).unwrap_or(false) {
                line.clear();
            }
            thread::sleep(stall);
        });
        Ok((base, handle))
    }

    fn rest_config(base: &str) -> ClientConfig {
        let mut config = ClientConfig::new("test-key");
        config.api_base = base.to_string();
        config.transport = TransportPreference::Rest;
        config.timeout = Duration::from_secs(5);
        config
    }

    #[test]
    fn rest_404_reports_model_remediation() -> anyhow::Result<()> {
        let (base, server) = serve_once("404 Not Found", r#"{"error": {"code": 404}}"#)?;
        let client = GeminiClient::new(&rest_config(&base))?;
        assert_eq!(client.active_transport(), TransportKind::Rest);

        let err = client
            .generate_image("no-such-model", "p", &[], None)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains(MODEL_NOT_FOUND_HINT));
        assert!(err.contains("choosing a model name that exists for your API key"));

        let request_line = server.join().map_err(|_| anyhow::anyhow!("server panicked"))?;
        assert!(
            request_line.starts_with("POST /models/no-such-model:generateContent?key=test-key")
        );
        Ok(())
    }

    #[test]
    fn stalled_server_surfaces_the_configured_timeout() -> anyhow::Result<()> {
        let (base, server) = serve_stalled(Duration::from_secs(3))?;
        let mut config = rest_config(&base);
        config.timeout = Duration::from_secs(1);
        let client = GeminiClient::new(&config)?;

        let err = client.generate_image("gemini-x", "p", &[], None).err();
        assert!(matches!(err, Some(ClientError::Timeout { seconds: 1, .. })));
        assert!(err.as_ref().is_some_and(ClientError::is_timeout));
        let message = err.map(|err| err.to_string()).unwrap_or_default();
        assert!(message.contains("timed out after 1s"));
        assert!(!message.contains("test-key"));

        server.join().map_err(|_| anyhow::anyhow!("server panicked"))?;
        Ok(())
    }

    #[test]
    fn rest_non_json_body_is_malformed() -> anyhow::Result<()> {
        let (base, server) = serve_once("200 OK", "<html>proxy error</html>")?;
        let client = GeminiClient::new(&rest_config(&base))?;
        let err = client.generate_image("m", "p", &[], None).err();
        assert!(matches!(err, Some(ClientError::MalformedResponse { .. })));
        server.join().map_err(|_| anyhow::anyhow!("server panicked"))?;
        Ok(())
    }

    #[test]
    fn list_models_returns_parsed_body() -> anyhow::Result<()> {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"models": [{"name": "models/gemini-x", "displayName": "Gemini X"}]}"#,
        )?;
        let client = GeminiClient::new(&rest_config(&base))?;
        let listing = client.list_models()?;
        assert_eq!(listing["models"][0]["displayName"], json!("Gemini X"));
        let request_line = server.join().map_err(|_| anyhow::anyhow!("server panicked"))?;
        assert!(request_line.starts_with("GET /models?key=test-key"));
        Ok(())
    }

    #[test]
    fn list_models_surfaces_http_errors() -> anyhow::Result<()> {
        let (base, server) = serve_once("403 Forbidden", r#"{"error": "API key not valid"}"#)?;
        let client = GeminiClient::new(&rest_config(&base))?;
        let err = client.list_models().err();
        assert_eq!(err.as_ref().and_then(ClientError::status), Some(403));
        assert!(err
            .map(|err| err.to_string().contains("API key not valid"))
            .unwrap_or(false));
        server.join().map_err(|_| anyhow::anyhow!("server panicked"))?;
        Ok(())
    }
}
