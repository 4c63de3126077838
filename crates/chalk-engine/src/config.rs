use std::env;
use std::str::FromStr;
use std::time::Duration;

use chalk_contracts::events::EventWriter;
use chalk_contracts::history::DEFAULT_HISTORY_LIMIT;
use chalk_contracts::models::{ModelSelection, ModelSelector};
use chalk_contracts::suggestion::GenerationMode;
use chalk_contracts::voice::{DEFAULT_IDLE_POLL, DEFAULT_IDLE_THRESHOLD};
use serde_json::json;

use crate::client::GenerationClient;
use crate::error::GenerationError;
use crate::map_object;
use crate::retry::RetryPolicy;
use crate::service::default_service_registry;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MARKUP_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 60.0;
pub const DEFAULT_MAX_INTENT_CHARS: usize = 120;
const MAX_HISTORY_LIMIT: usize = 50;
const API_KEY_VARS: &[&str] = &[
    "GEMINI_API_KEY",
    "GOOGLE_GENERATIVE_AI_API_KEY",
    "GOOGLE_API_KEY",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ChalkConfig {
    /// `gemini`, `relay` or `dryrun`.
    pub service: String,
    pub mode: GenerationMode,
    pub api_key: Option<String>,
    pub api_base: String,
    pub markup_model: String,
    pub image_model: String,
    pub relay_url: Option<String>,
    pub request_timeout_s: f64,
    pub idle_threshold: Duration,
    pub idle_poll: Duration,
    pub history_limit: usize,
    pub max_intent_chars: usize,
    pub retry: RetryPolicy,
}

impl Default for ChalkConfig {
    fn default() -> Self {
        Self {
            service: "gemini".to_string(),
            mode: GenerationMode::Markup,
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            markup_model: DEFAULT_MARKUP_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            relay_url: None,
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            idle_poll: DEFAULT_IDLE_POLL,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_intent_chars: DEFAULT_MAX_INTENT_CHARS,
            retry: RetryPolicy::default(),
        }
    }
}

impl ChalkConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        config.api_key = API_KEY_VARS.iter().find_map(|key| get(*key));
        if let Some(base) = get("GEMINI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("GEMINI_MODEL") {
            config.markup_model = model;
        }
        if let Some(model) = get("CHALKAI_IMAGE_MODEL") {
            config.image_model = model;
        }
        if let Some(url) = get("CHALKAI_RELAY_URL") {
            config.relay_url = Some(url);
            config.service = "relay".to_string();
        }
        if let Some(mode) = get("CHALKAI_MODE").and_then(|raw| GenerationMode::from_str(&raw).ok()) {
            config.mode = mode;
        }
        if let Some(timeout) = get("CHALKAI_REQUEST_TIMEOUT_S").and_then(|raw| raw.parse().ok()) {
            config.request_timeout_s = f64::clamp(timeout, 5.0, 300.0);
        }
        if let Some(ms) = get("CHALKAI_IDLE_THRESHOLD_MS").and_then(|raw| raw.parse::<u64>().ok()) {
            config.idle_threshold = Duration::from_millis(ms);
        }
        if let Some(ms) = get("CHALKAI_IDLE_POLL_MS").and_then(|raw| raw.parse::<u64>().ok()) {
            config.idle_poll = Duration::from_millis(ms.max(10));
        }
        if let Some(limit) = get("CHALKAI_HISTORY_LIMIT").and_then(|raw| raw.parse::<usize>().ok()) {
            config.history_limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        }
        if let Some(chars) = get("CHALKAI_MAX_INTENT_CHARS").and_then(|raw| raw.parse::<usize>().ok()) {
            config.max_intent_chars = chars.max(1);
        }
        config
    }

    pub fn requested_model(&self) -> &str {
        match self.mode {
            GenerationMode::Markup => &self.markup_model,
            GenerationMode::Image => &self.image_model,
        }
    }

    pub fn select_model(&self) -> Result<ModelSelection, GenerationError> {
        ModelSelector::default()
            .select(
                Some(self.requested_model()),
                &self.service,
                self.mode.capability(),
            )
            .map_err(GenerationError::Configuration)
    }

    /// Wires the configured service, model and retry policy into a client.
    pub fn build_client(
        &self,
        events: Option<EventWriter>,
    ) -> Result<GenerationClient, GenerationError> {
        let registry = default_service_registry(self);
        let service = registry.get(&self.service).ok_or_else(|| {
            GenerationError::Configuration(format!(
                "Unknown generation service '{}' (available: {})",
                self.service,
                registry.names().join(", ")
            ))
        })?;
        let selection = self.select_model()?;
        if let (Some(events), Some(reason)) = (events.as_ref(), selection.fallback_reason.as_ref())
        {
            let _ = events.emit(
                "model_fallback",
                map_object(json!({
                    "requested": selection.requested,
                    "model": selection.model.name,
                    "reason": reason,
                })),
            );
        }
        Ok(GenerationClient::new(
            service,
            self.mode,
            selection.model.name,
            self.retry.clone(),
            events,
        ))
    }
}
