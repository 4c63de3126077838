use chalk_contracts::media::{EncodedImage, PNG_MIME};
use chalk_contracts::suggestion::SuggestionContent;
use serde_json::{json, Map, Value};

use crate::client::GenerationClient;
use crate::error::GenerationError;

pub const MISSING_IMAGE_MESSAGE: &str = "Missing image file";
pub const MISSING_INTENT_MESSAGE: &str = "Missing intent description";

/// Decoded relay request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelayRequest {
    pub intent: Option<String>,
    pub image: Option<EncodedImage>,
}

impl RelayRequest {
    pub fn new(intent: Option<String>, image: Option<EncodedImage>) -> Self {
        Self { intent, image }
    }

    /// Accepts `{intent, image}` or `{intent, canvasImage}` with the image as a
    /// data URL or bare base64.
    pub fn from_json(value: &Value) -> Self {
        let intent = value
            .get("intent")
            .and_then(Value::as_str)
            .map(str::to_string);
        let image = value
            .get("image")
            .or_else(|| value.get("canvasImage"))
            .and_then(Value::as_str)
            .and_then(|raw| EncodedImage::from_data_url_or_base64(raw, PNG_MIME));
        Self { intent, image }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayResponse {
    pub status: u16,
    pub body: Value,
}

impl RelayResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: &str, details: Option<&str>) -> Self {
        let mut body = Map::new();
        body.insert("error".to_string(), json!(message));
        if let Some(details) = details {
            body.insert("details".to_string(), json!(details));
        }
        Self {
            status,
            body: Value::Object(body),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn from_error(err: &GenerationError) -> Self {
        let status = err.relay_status();
        match err {
            GenerationError::Authentication(message) => Self::error(
                status,
                "Invalid API key. Please check GEMINI_API_KEY",
                Some(message),
            ),
            GenerationError::ModelNotFound(model) => Self::error(
                status,
                &format!("Model {model} not found. Try setting GEMINI_MODEL=gemini-1.5-flash"),
                None,
            ),
            GenerationError::MissingIntent => Self::error(status, MISSING_INTENT_MESSAGE, None),
            GenerationError::NothingToExport => Self::error(status, MISSING_IMAGE_MESSAGE, None),
            other => Self::error(status, &other.to_string(), other.details()),
        }
    }
}

/// Server side of the generation relay: validates input, calls the model via
/// `client` and answers with a status-coded JSON body.
pub fn handle(client: &GenerationClient, request: &RelayRequest) -> RelayResponse {
    let Some(image) = request.image.as_ref().filter(|image| !image.is_empty()) else {
        return RelayResponse::error(400, MISSING_IMAGE_MESSAGE, None);
    };
    let intent = request.intent.as_deref().map(str::trim).unwrap_or_default();
    if intent.is_empty() {
        return RelayResponse::error(400, MISSING_INTENT_MESSAGE, None);
    }

    match client.request_suggestion(intent, Some(image)) {
        Ok(SuggestionContent::Markup { document }) => RelayResponse::ok(json!({ "markup": document })),
        Ok(SuggestionContent::Image { image }) => RelayResponse::ok(json!({
            "image": image.data_url(),
            "mimeType": image.mime_type,
        })),
        Err(err) => RelayResponse::from_error(&err),
    }
}
