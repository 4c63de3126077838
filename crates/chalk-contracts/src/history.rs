use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::events::now_utc_iso;
use crate::suggestion::SuggestionContent;

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Immutable record of a past generation. Fields are private so an entry can
/// only be read once it has been appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    entry_id: String,
    intent: String,
    content: SuggestionContent,
    created_at: String,
}

impl HistoryEntry {
    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn content(&self) -> &SuggestionContent {
        &self.content
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }
}

/// Most-recent-first, capped list of generations for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryLog {
    history_id: String,
    limit: usize,
    entries: VecDeque<HistoryEntry>,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryLog {
    pub fn new(limit: usize) -> Self {
        Self {
            history_id: Uuid::new_v4().to_string(),
            limit: limit.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepends a new entry and evicts the oldest past the limit.
    pub fn push(&mut self, intent: &str, content: SuggestionContent) -> &HistoryEntry {
        self.entries.push_front(HistoryEntry {
            entry_id: Uuid::new_v4().to_string(),
            intent: intent.to_string(),
            content,
            created_at: now_utc_iso(),
        });
        self.entries.truncate(self.limit);
        &self.entries[0]
    }

    /// Index 0 is the newest entry.
    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn to_json(&self) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "history_id".to_string(),
            Value::String(self.history_id.clone()),
        );
        payload.insert("limit".to_string(), Value::Number(self.limit.into()));
        payload.insert(
            "entries".to_string(),
            Value::Array(
                self.entries
                    .iter()
                    .map(|entry| serde_json::to_value(entry).unwrap_or(Value::Null))
                    .collect(),
            ),
        );
        Value::Object(payload)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.to_json())?)?;
        Ok(())
    }
}
