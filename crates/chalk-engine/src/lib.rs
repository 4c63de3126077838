pub mod client;
pub mod config;
pub mod error;
pub mod relay;
pub mod retry;
pub mod service;
pub mod session;
pub mod validate;

use serde_json::{Map, Value};

pub use client::{build_prompt, GenerationClient};
pub use config::ChalkConfig;
pub use error::{ErrorCategory, GenerationError};
pub use relay::{RelayRequest, RelayResponse};
pub use retry::RetryPolicy;
pub use service::{GenerationService, ServiceOutput, ServiceRegistry, ServiceRequest};
pub use session::{
    current_context, export_snapshot, Effect, GenerationTicket, MergeReport, Phase, Session,
    SessionEvent, SessionOptions, SubmitSource,
};
pub use validate::{extract_image, validate_markup};

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
