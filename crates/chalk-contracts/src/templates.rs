use indexmap::IndexMap;

pub const QUICK_ENHANCE: &str = "enhance";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub key: String,
    pub label: String,
    pub instruction: String,
}

/// Fixed instructions offered as one-click shortcuts, in display order.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: IndexMap<String, PromptTemplate>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TemplateRegistry {
    pub fn new(templates: Option<IndexMap<String, PromptTemplate>>) -> Self {
        Self {
            templates: templates.unwrap_or_else(default_templates),
        }
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.templates.get(key.trim().to_ascii_lowercase().as_str())
    }

    pub fn quick_enhance(&self) -> Option<&PromptTemplate> {
        self.get(QUICK_ENHANCE)
    }

    pub fn list(&self) -> impl Iterator<Item = &PromptTemplate> {
        self.templates.values()
    }
}

fn default_templates() -> IndexMap<String, PromptTemplate> {
    let mut map = IndexMap::new();
    let mut insert = |key: &str, label: &str, instruction: &str| {
        map.insert(
            key.to_string(),
            PromptTemplate {
                key: key.to_string(),
                label: label.to_string(),
                instruction: instruction.to_string(),
            },
        );
    };

    insert(
        QUICK_ENHANCE,
        "Quick enhance",
        "Clean up this sketch: straighten lines, regularize shapes and tidy the layout",
    );
    insert(
        "flowchart",
        "Flowchart",
        "Turn this sketch into a clean flowchart with clear arrows between steps",
    );
    insert(
        "labels",
        "Label boxes",
        "Add a neat label box for every unlabeled shape, keeping existing text",
    );
    insert(
        "align",
        "Align",
        "Align and evenly space the shapes without changing what they are",
    );
    insert(
        "tidy",
        "Tidy connectors",
        "Make every connector a straight line that meets its shapes cleanly",
    );

    map
}
