mod dryrun;
mod gemini;
mod relay;

use std::collections::BTreeMap;
use std::sync::Arc;

use chalk_contracts::media::EncodedImage;
use chalk_contracts::suggestion::GenerationMode;

use crate::config::ChalkConfig;
use crate::error::GenerationError;

pub use dryrun::DryrunService;
pub use gemini::GeminiService;
pub use relay::RelayService;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    pub model: String,
    pub mode: GenerationMode,
    /// Full instruction text sent to a hosted model.
    pub prompt: String,
    /// The user's intent on its own, for services that build their own prompt.
    pub intent: String,
    pub image: Option<EncodedImage>,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attachment {
    pub media_type: String,
    pub encoded: Option<String>,
    pub bytes: Option<Vec<u8>>,
}

/// Raw, unvalidated service output.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceOutput {
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
}

pub trait GenerationService: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ServiceRequest) -> Result<ServiceOutput, GenerationError>;
}

#[derive(Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<dyn GenerationService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: GenerationService + 'static>(&mut self, service: S) {
        self.services
            .insert(service.name().to_string(), Arc::new(service));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationService>> {
        self.services.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}

pub fn default_service_registry(config: &ChalkConfig) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry.register(DryrunService);
    registry.register(GeminiService::new(config));
    if let Some(url) = config.relay_url.as_deref() {
        registry.register(RelayService::new(url, config.request_timeout_s));
    }
    registry
}
