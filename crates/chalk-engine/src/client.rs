use std::sync::Arc;

use chalk_contracts::events::{EventPayload, EventWriter};
use chalk_contracts::media::EncodedImage;
use chalk_contracts::suggestion::{GenerationMode, SuggestionContent};
use serde_json::json;

use crate::error::GenerationError;
use crate::retry::RetryPolicy;
use crate::service::{GenerationService, ServiceRequest};
use crate::validate::{extract_image, validate_markup};

const REFINEMENT_RULES: &str = "You are a diagram refinement assistant. Your task is to take a rough, incomplete diagram sketch and refine it into a clean, complete, and accurate diagram based on the user's intent.

CRITICAL RULES:
1. The input diagram is INCOMPLETE or ROUGH - your job is to complete and refine it, not replace it
2. Use the intent text to understand what the diagram should represent
3. Do NOT introduce new concepts that aren't in the original sketch
4. Do NOT add decorative elements, colors, or styling beyond what's necessary
5. Preserve any text labels exactly as they appear
6. Make lines straight, shapes regular, and connections clear
7. Use black strokes on white background (or transparent)
8. Keep the overall structure and layout similar to the input";

const MARKUP_CONTRACT: &str = "Output ONLY valid SVG code - no markdown, no explanations, just a single <svg> element. The SVG should be minimal, clean, and suitable for educational diagrams.";

const IMAGE_CONTRACT: &str = "Output a single refined image of the whole diagram on a white background. Do not describe the image in text.";

/// Instruction text for one request: fixed rules, output contract, intent.
pub fn build_prompt(mode: GenerationMode, intent: &str) -> String {
    let contract = match mode {
        GenerationMode::Markup => MARKUP_CONTRACT,
        GenerationMode::Image => IMAGE_CONTRACT,
    };
    format!(
        "{REFINEMENT_RULES}\n\n{contract}\n\nUser Intent: \"{}\"\n\nAnalyze the input diagram and produce a refined, complete diagram that fulfills the intent while preserving the original structure.",
        intent.trim()
    )
}

/// Sends canvas snapshots to a generation service and returns validated
/// suggestion content.
#[derive(Clone)]
pub struct GenerationClient {
    service: Arc<dyn GenerationService>,
    mode: GenerationMode,
    model: String,
    policy: RetryPolicy,
    events: Option<EventWriter>,
}

impl GenerationClient {
    pub fn new(
        service: Arc<dyn GenerationService>,
        mode: GenerationMode,
        model: impl Into<String>,
        policy: RetryPolicy,
        events: Option<EventWriter>,
    ) -> Self {
        Self {
            service,
            mode,
            model: model.into(),
            policy,
            events,
        }
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    pub fn with_mode(mut self, mode: GenerationMode, model: impl Into<String>) -> Self {
        self.mode = mode;
        self.model = model.into();
        self
    }

    pub fn request_suggestion(
        &self,
        intent: &str,
        image: Option<&EncodedImage>,
    ) -> Result<SuggestionContent, GenerationError> {
        let intent = intent.trim();
        if intent.is_empty() {
            return Err(GenerationError::MissingIntent);
        }
        let image = image
            .filter(|image| !image.is_empty())
            .ok_or(GenerationError::NothingToExport)?;

        let mut request = ServiceRequest {
            model: self.model.clone(),
            mode: self.mode,
            prompt: build_prompt(self.mode, intent),
            intent: intent.to_string(),
            image: Some(image.clone()),
            temperature: self.policy.temperature_for(0),
        };

        match self.mode {
            GenerationMode::Image => {
                let output = self.service.generate(&request);
                self.log_attempt(0, request.temperature, output.as_ref().err());
                let image = extract_image(&output?)?;
                Ok(SuggestionContent::image(image))
            }
            GenerationMode::Markup => {
                let mut last = None;
                for (attempt, temperature) in self.policy.attempts() {
                    request.temperature = temperature;
                    let result = self.service.generate(&request).and_then(|output| {
                        validate_markup(output.text.as_deref().unwrap_or_default())
                    });
                    self.log_attempt(attempt, temperature, result.as_ref().err());
                    match result {
                        Ok(document) => return Ok(SuggestionContent::markup(document)),
                        Err(err) if err.is_retryable_output() => last = Some(err),
                        Err(err) => return Err(err),
                    }
                }
                let last = last.map(|err| err.to_string()).unwrap_or_default();
                Err(GenerationError::RetriesExhausted {
                    attempts: self.policy.max_attempts(),
                    last,
                })
            }
        }
    }

    fn log_attempt(&self, attempt: u32, temperature: f64, error: Option<&GenerationError>) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let mut payload = EventPayload::new();
        payload.insert("service".to_string(), json!(self.service.name()));
        payload.insert("model".to_string(), json!(self.model));
        payload.insert("mode".to_string(), json!(self.mode.as_str()));
        payload.insert("attempt".to_string(), json!(attempt + 1));
        payload.insert("temperature".to_string(), json!(temperature));
        payload.insert("ok".to_string(), json!(error.is_none()));
        if let Some(err) = error {
            payload.insert("error".to_string(), json!(err.to_string()));
        }
        let _ = events.emit("generation_attempt", payload);
    }
}
