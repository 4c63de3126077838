use std::time::Duration;

use anyhow::Context;
use chalk_contracts::media::PNG_MIME;
use chalk_contracts::suggestion::GenerationMode;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use super::{Attachment, GenerationService, ServiceOutput, ServiceRequest};
use crate::error::{classify_transport, GenerationError};
use crate::relay::{MISSING_IMAGE_MESSAGE, MISSING_INTENT_MESSAGE};
use crate::truncate_text;

pub const RELAY_IMAGE_FILE_NAME: &str = "canvas.png";

/// Client for a server-side relay that holds the model credentials.
pub struct RelayService {
    url: String,
    timeout_s: f64,
    http: HttpClient,
}

impl RelayService {
    pub fn new(url: &str, timeout_s: f64) -> Self {
        Self {
            url: url.trim().to_string(),
            timeout_s,
            http: HttpClient::new(),
        }
    }

    fn build_form(request: &ServiceRequest) -> Result<MultipartForm, GenerationError> {
        let mut form = MultipartForm::new()
            .text("intent", request.intent.clone())
            .text("mode", request.mode.as_str().to_string())
            .text("model", request.model.clone())
            .text("temperature", request.temperature.to_string());
        if let Some(image) = request.image.as_ref() {
            let bytes = image
                .decode()
                .map_err(|err| GenerationError::Canvas(format!("{err:#}")))?;
            let part = MultipartPart::bytes(bytes)
                .file_name(RELAY_IMAGE_FILE_NAME)
                .mime_str(&image.mime_type)
                .map_err(|err| GenerationError::Canvas(err.to_string()))?;
            form = form.part("image", part);
        }
        Ok(form)
    }

    /// Maps a relay answer back into raw output or a classified error.
    fn interpret(status: u16, body: &str) -> Result<ServiceOutput, GenerationError> {
        let parsed: Value = serde_json::from_str(body).map_err(|err| {
            GenerationError::upstream(
                format!("Relay returned invalid JSON payload ({status})"),
                Some(format!("{err}: {}", truncate_text(body, 256))),
            )
        })?;
        let field = |key: &str| {
            parsed
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|value| !value.trim().is_empty())
        };

        if (200..300).contains(&status) {
            if let Some(document) = field("markup").or_else(|| field("svg")) {
                return Ok(ServiceOutput {
                    text: Some(document),
                    attachments: Vec::new(),
                });
            }
            if let Some(encoded) = field("image") {
                let media_type = field("mimeType").unwrap_or_else(|| PNG_MIME.to_string());
                return Ok(ServiceOutput {
                    text: None,
                    attachments: vec![Attachment {
                        media_type,
                        encoded: Some(encoded),
                        bytes: None,
                    }],
                });
            }
            return Ok(ServiceOutput::default());
        }

        let message = field("error").unwrap_or_else(|| format!("Relay request failed ({status})"));
        let details = field("details");
        let lowered = message.to_ascii_lowercase();
        Err(match status {
            400 if message == MISSING_INTENT_MESSAGE => GenerationError::MissingIntent,
            400 if message == MISSING_IMAGE_MESSAGE => GenerationError::NothingToExport,
            400 if lowered.starts_with("model ") && lowered.contains("not found") => {
                GenerationError::ModelNotFound(model_name(&message))
            }
            401 | 403 => GenerationError::Authentication(message),
            500 if lowered.contains("not configured") => GenerationError::Configuration(message),
            _ => GenerationError::upstream(message, details),
        })
    }
}

/// `Model <name> not found...` as written by the relay handler.
fn model_name(message: &str) -> String {
    message
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string()
}

impl GenerationService for RelayService {
    fn name(&self) -> &str {
        "relay"
    }

    fn generate(&self, request: &ServiceRequest) -> Result<ServiceOutput, GenerationError> {
        let form = Self::build_form(request)?;
        let response = self
            .http
            .post(&self.url)
            .timeout(Duration::from_secs_f64(self.timeout_s))
            .multipart(form)
            .send()
            .with_context(|| format!("Relay request failed ({})", self.url))
            .map_err(classify_transport)?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .context("Relay response body read failed")
            .map_err(classify_transport)?;
        let output = Self::interpret(status, &body)?;
        if request.mode == GenerationMode::Markup && output.text.is_none() {
            return Err(GenerationError::InvalidOutput(
                "relay answered without markup".to_string(),
            ));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::RelayService;
    use crate::error::GenerationError;
    use crate::relay::RelayResponse;

    #[test]
    fn legacy_svg_body_is_markup() {
        let output = RelayService::interpret(200, r#"{"svg":"<svg></svg>"}"#).expect("output");
        assert_eq!(output.text.as_deref(), Some("<svg></svg>"));
    }

    #[test]
    fn image_body_becomes_attachment() {
        let output =
            RelayService::interpret(200, r#"{"image":"data:image/png;base64,QUJD"}"#).expect("output");
        assert_eq!(output.attachments.len(), 1);
        assert_eq!(output.attachments[0].media_type, "image/png");
    }

    #[test]
    fn error_bodies_are_classified() {
        assert_eq!(
            RelayService::interpret(400, r#"{"error":"Missing intent description"}"#).unwrap_err(),
            GenerationError::MissingIntent
        );
        assert_eq!(
            RelayService::interpret(400, r#"{"error":"Missing image file"}"#).unwrap_err(),
            GenerationError::NothingToExport
        );
        assert!(matches!(
            RelayService::interpret(401, r#"{"error":"Invalid API key"}"#).unwrap_err(),
            GenerationError::Authentication(_)
        ));
        assert!(matches!(
            RelayService::interpret(500, r#"{"error":"API key not configured"}"#).unwrap_err(),
            GenerationError::Configuration(_)
        ));
        let err = RelayService::interpret(
            500,
            r#"{"error":"Failed to call Gemini API","details":"quota"}"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Failed to call Gemini API");
        assert_eq!(err.details(), Some("quota"));
    }

    #[test]
    fn relay_handler_bodies_keep_their_category() {
        let cases = [
            GenerationError::ModelNotFound("gemini-2.5-flash-image".to_string()),
            GenerationError::MissingIntent,
            GenerationError::NothingToExport,
            GenerationError::Authentication("API key not valid".to_string()),
            GenerationError::Configuration("API key not configured".to_string()),
        ];
        for original in cases {
            let response = RelayResponse::from_error(&original);
            let err = RelayService::interpret(response.status, &response.body.to_string())
                .unwrap_err();
            assert_eq!(err.category(), original.category(), "{original:?} -> {err:?}");
        }

        let response = RelayResponse::from_error(&GenerationError::ModelNotFound(
            "gemini-2.5-flash-image".to_string(),
        ));
        assert_eq!(
            RelayService::interpret(response.status, &response.body.to_string()).unwrap_err(),
            GenerationError::ModelNotFound("gemini-2.5-flash-image".to_string())
        );
    }

    #[test]
    fn unrecognized_bad_request_is_upstream() {
        let err = RelayService::interpret(400, r#"{"error":"image too large"}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Upstream { .. }));
    }

    #[test]
    fn non_json_body_is_upstream() {
        let err = RelayService::interpret(502, "<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, GenerationError::Upstream { .. }));
    }
}
