//! OpenRouter chat-completion client.
//!
//! Wire types for the chat completions API (messages, tool calls, tool
//! schemas), the [`ChatClient`] trait the agent loop is written against,
//! and the concrete [`OpenRouterClient`] over reqwest.  Streaming responses
//! are decoded in [`stream`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

pub mod stream;

pub use stream::{FragmentStream, SseDecoder, StreamFragment, ToolCallDelta};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

// ── wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry in the conversation log, in the shape the completions API
/// expects.  `content` is serialized as `null` when absent because an
/// assistant message that only carries tool calls has no text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// A tool-result message answering the call with the given id.
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// A model-issued request to invoke a named tool.  `arguments` is the raw
/// string accumulated from the stream and may not parse as JSON if the
/// stream was cut early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Schema advertised to the model for one callable tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

impl ToolDefinition {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ── errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    /// No credential configured.  Fatal; surfaced before any request is made.
    #[error("OPENROUTER_API_KEY is not set")]
    MissingApiKey,

    /// Non-success HTTP status from the upstream endpoint.
    #[error("OpenRouter API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Connection-level failure from reqwest.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The non-streaming endpoint returned a body without any choices.
    #[error("completion response contained no choices")]
    EmptyResponse,
}

// ── client trait ─────────────────────────────────────────────────────────────

/// The seam the agent loop talks through.  One implementation speaks to
/// OpenRouter; tests substitute scripted fakes.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Single blocking completion (`stream=false`).
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, LlmError>;

    /// Open a streaming completion (`stream=true`) and expose it as a lazy
    /// sequence of fragments.  The sequence is finite and not restartable;
    /// dropping it closes the underlying connection.
    async fn complete_streaming(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<FragmentStream, LlmError>;
}

// ── OpenRouter implementation ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
            base_url: OPENROUTER_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn payload(&self, messages: &[Message], tools: &[ToolDefinition], stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    /// POST the payload and fail on any non-success status, carrying the
    /// upstream status code and body text.  No retries at this layer.
    async fn post(&self, payload: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://fidus.local")
            .header("X-Title", "Fidus")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: Message,
}

#[async_trait]
impl ChatClient for OpenRouterClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, LlmError> {
        let payload = self.payload(messages, tools, false);
        let response = self.post(&payload).await?;
        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(LlmError::EmptyResponse)
    }

    async fn complete_streaming(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<FragmentStream, LlmError> {
        let payload = self.payload(messages, tools, true);
        let response = self.post(&payload).await?;
        Ok(stream::into_fragment_stream(response))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_config_error() {
        let result = OpenRouterClient::new("", "anthropic/claude-sonnet-4");
        assert!(matches!(result, Err(LlmError::MissingApiKey)));

        let result = OpenRouterClient::new("   ", "anthropic/claude-sonnet-4");
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }

    #[test]
    fn payload_omits_tools_when_none_registered() {
        let client = OpenRouterClient::new("sk-or-test", "openai/gpt-4o-mini").unwrap();
        let body = client.payload(&[Message::user("hi")], &[], true);
        assert_eq!(body["model"], "openai/gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn payload_advertises_tools_with_auto_choice() {
        let client = OpenRouterClient::new("sk-or-test", "openai/gpt-4o-mini").unwrap();
        let tools = vec![ToolDefinition::function(
            "get_datetime",
            "Get the current date and time",
            json!({"type": "object", "properties": {}}),
        )];
        let body = client.payload(&[Message::user("hi")], &tools, false);
        assert_eq!(body["stream"], false);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "get_datetime");
    }

    #[test]
    fn assistant_tool_call_message_serializes_null_content() {
        let msg = Message {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(vec![ToolCall::function("call_1", "get_datetime", "{}")]),
            tool_call_id: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert!(value["content"].is_null());
        assert_eq!(value["tool_calls"][0]["id"], "call_1");
        assert_eq!(value["tool_calls"][0]["type"], "function");
    }

    #[test]
    fn plain_message_omits_tool_fields() {
        let value = serde_json::to_value(Message::user("hello")).unwrap();
        assert!(value.get("tool_calls").is_none());
        assert!(value.get("tool_call_id").is_none());
    }

    #[test]
    fn tool_message_carries_call_id() {
        let value = serde_json::to_value(Message::tool("result", "call_9")).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_9");
    }

    #[test]
    fn response_message_deserializes_without_optional_fields() {
        let msg: Message =
            serde_json::from_str(r#"{"role":"assistant","content":"hi"}"#).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content.as_deref(), Some("hi"));
        assert!(msg.tool_calls.is_none());
    }
}
