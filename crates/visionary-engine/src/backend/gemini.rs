use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::{HeaderName, RETRY_AFTER};
use serde_json::{json, Map, Value};

use super::{Backend, RawResponse};
use crate::config::StudioConfig;
use crate::error::{truncate_text, TransportError};
use crate::request::{BackendRequest, ContentPart, Tool};

const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-goog-api-key");

/// Gemini `generateContent` over HTTPS.
pub struct GeminiBackend {
    api_base: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            timeout,
            http: HttpClient::new(),
        }
    }

    pub fn from_config(config: &StudioConfig) -> Self {
        Self::new(config.backend.api_base.clone(), config.request_timeout())
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub(crate) fn build_payload(request: &BackendRequest) -> Value {
        let parts: Vec<Value> = request
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::InlineData { mime_type, data } => json!({
                    "inlineData": {
                        "mimeType": mime_type,
                        "data": data,
                    }
                }),
                ContentPart::Text(text) => json!({ "text": text }),
            })
            .collect();

        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            Value::Array(vec![json!({
                "role": "user",
                "parts": parts,
            })]),
        );

        let config = &request.config;
        let mut image_config = Map::new();
        image_config.insert(
            "aspectRatio".to_string(),
            Value::String(config.aspect_ratio.as_str().to_string()),
        );
        if let Some(size) = config.image_size {
            image_config.insert(
                "imageSize".to_string(),
                Value::String(size.as_str().to_string()),
            );
        }
        let mut generation_config = Map::new();
        generation_config.insert(
            "responseModalities".to_string(),
            Value::Array(vec![Value::String("IMAGE".to_string())]),
        );
        generation_config.insert("imageConfig".to_string(), Value::Object(image_config));
        if let Some(seed) = config.seed {
            generation_config.insert("seed".to_string(), Value::Number(seed.into()));
        }
        payload.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
        payload.insert(
            "safetySettings".to_string(),
            Value::Array(
                config
                    .safety_settings
                    .iter()
                    .map(|setting| {
                        json!({
                            "category": setting.category,
                            "threshold": setting.threshold,
                        })
                    })
                    .collect(),
            ),
        );
        if !config.tools.is_empty() {
            payload.insert(
                "tools".to_string(),
                Value::Array(
                    config
                        .tools
                        .iter()
                        .map(|tool| match tool {
                            Tool::GoogleSearch => json!({ "google_search": {} }),
                        })
                        .collect(),
                ),
            );
        }
        Value::Object(payload)
    }

    fn read_response(response: HttpResponse) -> Result<RawResponse, TransportError> {
        let status = response.status();
        let header_hint = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let body = response.text().map_err(|err| {
            TransportError::other(format!(
                "Gemini response body read failed: {}",
                err.without_url()
            ))
        })?;
        if !status.is_success() {
            let hint = header_hint.or_else(|| retry_delay_from_body(&body));
            return Err(TransportError::from_http_status(
                status.as_u16(),
                &body,
                hint,
            ));
        }
        serde_json::from_str::<RawResponse>(&body).map_err(|err| {
            TransportError::other(format!(
                "Gemini returned invalid JSON payload: {err}: {}",
                truncate_text(&body, 200)
            ))
        })
    }
}

impl Backend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(
        &self,
        request: &BackendRequest,
        credential: Option<&str>,
    ) -> Result<RawResponse, TransportError> {
        let Some(api_key) = credential else {
            return Err(TransportError::Unauthorized {
                status: 401,
                message: "GEMINI_API_KEY, GOOGLE_API_KEY or API_KEY not set".to_string(),
            });
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        tracing::debug!(
            endpoint = %endpoint,
            images = request.image_count(),
            "posting Gemini generateContent"
        );

        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .map_err(|err| {
                let err = err.without_url();
                TransportError::other(redact(
                    &format!("Gemini request to {} failed: {err}", request.model),
                    api_key,
                ))
            })?;
        Self::read_response(response)
    }
}

fn redact(message: &str, secret: &str) -> String {
    if secret.is_empty() {
        return message.to_string();
    }
    message.replace(secret, "[redacted]")
}

/// Reads `error.details[].retryDelay` (e.g. `"31s"`) from a Gemini error body.
fn retry_delay_from_body(body: &str) -> Option<u64> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("error")?
        .get("details")?
        .as_array()?
        .iter()
        .filter_map(|detail| detail.get("retryDelay").and_then(Value::as_str))
        .find_map(parse_delay_seconds)
}

fn parse_delay_seconds(raw: &str) -> Option<u64> {
    let seconds: f64 = raw.trim().strip_suffix('s')?.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(seconds.ceil() as u64)
}
