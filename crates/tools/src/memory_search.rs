//! Search past conversations from inside a turn.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;

use fidus_memory::ConversationStore;

use crate::Tool;

/// Cap on hits returned to the model.
const MAX_RESULTS: usize = 5;

pub struct MemorySearchTool {
    store: Arc<ConversationStore>,
}

impl MemorySearchTool {
    pub fn new(store: Arc<ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "search_memory"
    }

    fn description(&self) -> &str {
        "Search past conversations for relevant information. Use when the user refers to \
         something discussed previously or when context from past conversations would be helpful."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to find in past conversations.",
                },
            },
            "required": ["query"],
        })
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            bail!("missing required argument: query");
        };
        let mut results = self.store.search(query)?;
        if results.is_empty() {
            return Ok(json!({
                "results": [],
                "message": "No matching conversations found.",
            })
            .to_string());
        }
        results.truncate(MAX_RESULTS);
        Ok(json!({ "results": results }).to_string())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fidus_llm::Message;

    fn seeded_store(dir: &tempfile::TempDir) -> Arc<ConversationStore> {
        let store = ConversationStore::new(dir.path());
        let mut conversation = store.create("m").unwrap();
        conversation
            .messages
            .push(Message::user("Remind me about the picnic plan"));
        conversation
            .messages
            .push(Message::assistant("The picnic is Saturday at noon."));
        store.save(&conversation).unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn hits_come_back_as_results_array() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = MemorySearchTool::new(seeded_store(&dir));
        let output = tool.execute(&json!({"query": "picnic"})).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        let results = parsed["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0]["snippet"].as_str().unwrap().contains("picnic"));
    }

    #[tokio::test]
    async fn misses_include_explanatory_message() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = MemorySearchTool::new(seeded_store(&dir));
        let output = tool.execute(&json!({"query": "volcano"})).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert!(parsed["results"].as_array().unwrap().is_empty());
        assert_eq!(parsed["message"], "No matching conversations found.");
    }

    #[tokio::test]
    async fn results_are_capped_at_five() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        for _ in 0..7 {
            let mut conversation = store.create("m").unwrap();
            conversation
                .messages
                .push(Message::user("common needle phrase"));
            store.save(&conversation).unwrap();
        }
        let tool = MemorySearchTool::new(Arc::new(store));
        let output = tool.execute(&json!({"query": "needle"})).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["results"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn missing_query_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = MemorySearchTool::new(seeded_store(&dir));
        assert!(tool.execute(&json!({})).await.is_err());
    }
}
