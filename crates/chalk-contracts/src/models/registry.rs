use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub service: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim().trim_start_matches("models/"))
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// Models serving `capability` through `service`, in registry order.
    pub fn candidates(&self, service: &str, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.service == service && model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, service: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.service == service && model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, service: &str, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                service: service.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert("dryrun-markup-1", "dryrun", &["markup"]);
    insert("dryrun-image-1", "dryrun", &["image"]);
    insert("gemini-1.5-flash", "gemini", &["markup"]);
    insert("gemini-1.5-pro", "gemini", &["markup"]);
    insert("gemini-2.0-flash", "gemini", &["markup"]);
    insert("gemini-2.5-flash", "gemini", &["markup"]);
    insert("gemini-2.5-pro", "gemini", &["markup"]);
    insert("gemini-2.5-flash-image", "gemini", &["image"]);
    insert("gemini-2.0-flash-preview-image-generation", "gemini", &["image"]);
    insert("relay-default", "relay", &["markup", "image"]);

    map
}
