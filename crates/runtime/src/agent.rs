use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};

use fidus_llm::{ChatClient, LlmError, Message, Role, ToolCall};
use fidus_memory::{Conversation, ConversationStore, DEFAULT_TITLE};
use fidus_tools::ToolRegistry;

/// Hard ceiling on model rounds per user message.  Bounds cost and breaks
/// tool-call cycles; when exhausted the loop simply stops with whatever the
/// last round produced.
pub const MAX_TOOL_ROUNDS: usize = 10;

const TITLE_PROMPT: &str = "Generate a short title (3-6 words) for this conversation. \
    Return only the title text, nothing else. No quotes.";

/// One item of the caller-facing output sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnToken {
    /// An incremental piece of assistant text, forwarded as it arrives.
    Text(String),
    /// Marks the end of a tool round; the next text belongs to a new
    /// model response.
    RoundBoundary,
}

/// Per-slot accumulator for a tool call assembled from streaming deltas.
/// Id and name are overwritten when present; argument fragments concatenate.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_call(self) -> ToolCall {
        ToolCall::function(self.id, self.name, self.arguments)
    }
}

pub struct Agent {
    client: Arc<dyn ChatClient>,
    registry: Arc<ToolRegistry>,
    store: Arc<ConversationStore>,
    system_prompt: String,
}

impl Agent {
    pub fn new(
        client: Arc<dyn ChatClient>,
        registry: Arc<ToolRegistry>,
        store: Arc<ConversationStore>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client,
            registry,
            store,
            system_prompt: system_prompt.into(),
        }
    }

    /// Run one full turn: append the user message, stream model rounds until
    /// a text-only response (or the round ceiling), then persist.
    ///
    /// Text deltas and round boundaries are forwarded through `tokens` as
    /// they happen.  If the receiver is dropped the turn is abandoned: the
    /// network stream closes and nothing is saved.  Callers must not run two
    /// turns against the same conversation id concurrently; the store has no
    /// locking and interleaved writes would corrupt the file.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        user_text: &str,
        tokens: mpsc::Sender<TurnToken>,
    ) -> Result<()> {
        conversation.messages.push(Message::user(user_text));
        let tools = self.registry.definitions();

        for round in 0..MAX_TOOL_ROUNDS {
            debug!(round, messages = conversation.messages.len(), "model round");

            // Full-history replay behind a single fresh system message.
            let mut outbound = Vec::with_capacity(conversation.messages.len() + 1);
            outbound.push(Message::system(&self.system_prompt));
            outbound.extend(conversation.messages.iter().cloned());

            let mut stream = self.client.complete_streaming(&outbound, &tools).await?;
            let mut content = String::new();
            let mut pending: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();

            while let Some(fragment) = stream.next().await {
                let fragment = fragment?;
                if let Some(delta) = fragment.content {
                    content.push_str(&delta);
                    if tokens.send(TurnToken::Text(delta)).await.is_err() {
                        return Ok(());
                    }
                }
                for tc in fragment.tool_calls {
                    let acc = pending.entry(tc.index).or_default();
                    if let Some(id) = tc.id {
                        acc.id = id;
                    }
                    if let Some(function) = tc.function {
                        if let Some(name) = function.name {
                            acc.name = name;
                        }
                        if let Some(args) = function.arguments {
                            acc.arguments.push_str(&args);
                        }
                    }
                }
            }
            drop(stream);

            let calls: Vec<ToolCall> = pending
                .into_values()
                .map(ToolCallAccumulator::into_call)
                .collect();

            conversation.messages.push(Message {
                role: Role::Assistant,
                content: (!content.is_empty()).then_some(content),
                tool_calls: (!calls.is_empty()).then(|| calls.clone()),
                tool_call_id: None,
            });

            // Nothing advertised means nothing executable, even if the
            // model hallucinates a call anyway.
            if calls.is_empty() || tools.is_empty() {
                break;
            }

            for call in &calls {
                // Unparseable argument strings degrade to an empty object.
                let args: serde_json::Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({}));
                info!(tool = %call.function.name, id = %call.id, "executing tool call");
                let result = self.registry.invoke(&call.function.name, &args).await;
                conversation
                    .messages
                    .push(Message::tool(result, &call.id));
            }

            if tokens.send(TurnToken::RoundBoundary).await.is_err() {
                return Ok(());
            }
        }

        self.maybe_generate_title(conversation).await;

        conversation.updated = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.store.save(conversation)?;
        Ok(())
    }

    /// Best-effort auto-title: fires only on the first exchange (exactly one
    /// user message, title still the default) and never fails the turn.
    async fn maybe_generate_title(&self, conversation: &mut Conversation) {
        if conversation.title != DEFAULT_TITLE {
            return;
        }
        let user_messages = conversation
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .count();
        if user_messages != 1 {
            return;
        }

        match self.generate_title(&conversation.messages).await {
            Ok(title) if !title.is_empty() => {
                info!(%title, "auto-generated conversation title");
                conversation.title = title;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(%err, "title generation failed, keeping default");
            }
        }
    }

    async fn generate_title(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut prompt = vec![Message::system(TITLE_PROMPT)];
        prompt.extend(
            messages
                .iter()
                .filter(|m| {
                    m.role == Role::User || (m.role == Role::Assistant && m.content.is_some())
                })
                .take(4)
                .map(|m| Message {
                    role: m.role,
                    content: m.content.clone(),
                    tool_calls: None,
                    tool_call_id: None,
                }),
        );
        let reply = self.client.complete(&prompt, &[]).await?;
        Ok(reply.content.unwrap_or_default().trim().to_string())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
