use std::time::Duration;

use anyhow::Context;
use chalk_contracts::suggestion::GenerationMode;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{Attachment, GenerationService, ServiceOutput, ServiceRequest};
use crate::config::ChalkConfig;
use crate::error::{classify_transport, GenerationError};
use crate::truncate_text;

pub const MISSING_KEY_MESSAGE: &str =
    "API key not configured. Please set GEMINI_API_KEY (or GOOGLE_GENERATIVE_AI_API_KEY)";

/// Direct `generateContent` calls against the Gemini API.
pub struct GeminiService {
    api_base: String,
    api_key: Option<String>,
    timeout_s: f64,
    http: HttpClient,
}

impl GeminiService {
    pub fn new(config: &ChalkConfig) -> Self {
        Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout_s: config.request_timeout_s,
            http: HttpClient::new(),
        }
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

    fn build_payload(request: &ServiceRequest) -> Value {
        let mut parts = Vec::new();
        if let Some(image) = request.image.as_ref() {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.data_base64,
                }
            }));
        }
        parts.push(json!({ "text": request.prompt }));

        let modalities = match request.mode {
            GenerationMode::Markup => json!(["TEXT"]),
            GenerationMode::Image => json!(["TEXT", "IMAGE"]),
        };
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": request.temperature,
                "responseModalities": modalities,
            }
        })
    }

    fn classify_status(code: u16, model: &str, body: &str) -> GenerationError {
        let message = error_message_from_body(body).unwrap_or_else(|| truncate_text(body, 512));
        let lowered = message.to_ascii_lowercase();
        match code {
            401 | 403 => GenerationError::Authentication(message),
            400 if lowered.contains("api key") => GenerationError::Authentication(message),
            404 => GenerationError::ModelNotFound(model.to_string()),
            _ => GenerationError::upstream(
                format!("Gemini request failed ({code})"),
                Some(message),
            ),
        }
    }

    fn parse_output(payload: &Value) -> ServiceOutput {
        let mut text = String::new();
        let mut attachments = Vec::new();
        let candidates = payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                if let Some(fragment) = part.get("text").and_then(Value::as_str) {
                    text.push_str(fragment);
                    continue;
                }
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let media_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                attachments.push(Attachment {
                    media_type,
                    encoded: inline
                        .get("data")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    bytes: None,
                });
            }
        }
        ServiceOutput {
            text: (!text.trim().is_empty()).then_some(text),
            attachments,
        }
    }
}

impl GenerationService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &ServiceRequest) -> Result<ServiceOutput, GenerationError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(GenerationError::Configuration(
                MISSING_KEY_MESSAGE.to_string(),
            ));
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs_f64(self.timeout_s))
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response
            .text()
            .context("Gemini response body read failed")
            .map_err(classify_transport)?;
        if !status.is_success() {
            return Err(Self::classify_status(status.as_u16(), &request.model, &body));
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            GenerationError::upstream("Gemini returned invalid JSON payload", Some(err.to_string()))
        })?;
        Ok(Self::parse_output(&parsed))
    }
}

fn error_message_from_body(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(|message| truncate_text(message.trim(), 512))
        .filter(|message| !message.is_empty())
}
