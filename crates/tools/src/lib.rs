//! Local tools the model can invoke mid-generation.
//!
//! A [`ToolRegistry`] is built once at startup and handed to the agent loop
//! by reference; registration order is the order schemas are advertised to
//! the model.  Invocation never fails out of the loop: unknown tools and
//! executor errors both come back as structured error text the model can
//! react to.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use fidus_llm::ToolDefinition;

mod datetime;
mod memory_search;

pub use datetime::DatetimeTool;
pub use memory_search::MemorySearchTool;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema for the tool's arguments.
    fn parameters(&self) -> serde_json::Value;
    async fn execute(&self, args: &serde_json::Value) -> Result<String>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for the tool's name.  Re-registering
    /// keeps the original position; last writer wins.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(slot) => *slot = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Schemas in registration order, for the `tools` request field.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| {
                ToolDefinition::function(tool.name(), tool.description(), tool.parameters())
            })
            .collect()
    }

    /// Invoke a tool by name.  All failures are absorbed and returned as
    /// structured error text for the model; nothing escapes to the caller.
    pub async fn invoke(&self, name: &str, args: &serde_json::Value) -> String {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            warn!(tool = %name, "model requested unregistered tool");
            return json!({"error": format!("Unknown tool: {name}")}).to_string();
        };
        match tool.execute(args).await {
            Ok(output) => output,
            Err(err) => {
                warn!(tool = %name, %err, "tool execution failed");
                json!({"error": format!("Tool execution failed: {err}")}).to_string()
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct EchoTool {
        label: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, args: &serde_json::Value) -> Result<String> {
            Ok(format!("{}:{args}", self.label))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: &serde_json::Value) -> Result<String> {
            bail!("disk on fire")
        }
    }

    #[test]
    fn definitions_follow_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        registry.register(Arc::new(EchoTool { label: "a" }));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].function.name, "broken");
        assert_eq!(defs[1].function.name, "echo");
    }

    #[test]
    fn reregistering_overwrites_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { label: "first" }));
        registry.register(Arc::new(FailingTool));
        registry.register(Arc::new(EchoTool { label: "second" }));
        assert_eq!(registry.len(), 2);
        let defs = registry.definitions();
        assert_eq!(defs[0].function.name, "echo");
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_payload() {
        let registry = ToolRegistry::new();
        let output = registry.invoke("nope", &json!({})).await;
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["error"], "Unknown tool: nope");
    }

    #[tokio::test]
    async fn failing_executor_returns_error_payload() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        let output = registry.invoke("broken", &json!({})).await;
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["error"], "Tool execution failed: disk on fire");
    }

    #[tokio::test]
    async fn successful_execution_passes_args_through() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { label: "x" }));
        let output = registry.invoke("echo", &json!({"k": 1})).await;
        assert_eq!(output, "x:{\"k\":1}");
    }
}
