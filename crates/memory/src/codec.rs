//! The conversation file grammar: frontmatter header, `## <Role>` section
//! markers, and fenced sub-blocks for tool calls and tool results.
//!
//! `parse(serialize(c))` reproduces `c` exactly, with two deliberate
//! exceptions: system messages are never written (the system instruction is
//! re-applied fresh each run) and tool-call argument strings that fail to
//! parse as JSON are encoded as `{}`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use fidus_llm::{Message, Role, ToolCall};

use crate::Conversation;

/// Model recorded for files whose header predates the `model` key.
const FALLBACK_MODEL: &str = "anthropic/claude-sonnet-4";

static FRONTMATTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A---\n(.*?)\n---").expect("valid regex"));
static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^## ").expect("valid regex"));
static TOOL_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```tool-call\n(.*?)```").expect("valid regex"));
static TOOL_RESULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```tool-result\n(.*?)```").expect("valid regex"));
static TOOL_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Tool \(([^)]+)\)").expect("valid regex"));

// ── encoding ─────────────────────────────────────────────────────────────────

pub fn serialize(conversation: &Conversation) -> String {
    let mut lines: Vec<String> = vec![
        "---".to_string(),
        format!("id: {}", conversation.id),
        format!("title: \"{}\"", conversation.title.replace('"', "\\\"")),
        format!("created: {}", conversation.created),
        format!("updated: {}", conversation.updated),
        format!("model: {}", conversation.model),
        "---".to_string(),
        String::new(),
    ];

    for message in &conversation.messages {
        match message.role {
            Role::System => continue,
            Role::Tool => {
                let call_id = message.tool_call_id.as_deref().unwrap_or("unknown");
                lines.push(format!("## Tool ({call_id})"));
                lines.push(String::new());
                lines.push("```tool-result".to_string());
                lines.push(message.content.clone().unwrap_or_default());
                lines.push("```".to_string());
                lines.push(String::new());
            }
            Role::User | Role::Assistant => {
                let role_name = if message.role == Role::User {
                    "User"
                } else {
                    "Assistant"
                };
                lines.push(format!("## {role_name}"));
                lines.push(String::new());

                if let Some(content) = message.content.as_deref().filter(|c| !c.is_empty()) {
                    lines.push(content.to_string());
                    lines.push(String::new());
                }

                for call in message.tool_calls.iter().flatten() {
                    // Arguments are written as the parsed object for
                    // readability; malformed strings degrade to `{}`.
                    let arguments: serde_json::Value =
                        serde_json::from_str(&call.function.arguments)
                            .unwrap_or_else(|_| json!({}));
                    lines.push("```tool-call".to_string());
                    lines.push(
                        json!({
                            "id": call.id,
                            "name": call.function.name,
                            "arguments": arguments,
                        })
                        .to_string(),
                    );
                    lines.push("```".to_string());
                    lines.push(String::new());
                }
            }
        }
    }

    lines.join("\n")
}

// ── decoding ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EncodedToolCall {
    id: String,
    name: String,
    arguments: serde_json::Value,
}

/// Parse a serialized conversation.  Never fails: missing header fields fall
/// back to defaults and malformed tool-call blocks are skipped.
pub fn parse(content: &str) -> Conversation {
    let meta = parse_frontmatter(content);

    let body = FRONTMATTER_RE
        .find(content)
        .map(|m| content[m.end()..].trim())
        .unwrap_or("");

    let mut messages = Vec::new();
    for section in SECTION_RE.split(body) {
        if section.trim().is_empty() {
            continue;
        }
        let (header, section_body) = match section.find('\n') {
            Some(idx) => (section[..idx].trim(), section[idx + 1..].trim()),
            None => (section.trim(), ""),
        };

        if header == "User" {
            messages.push(Message::user(section_body));
        } else if header == "Assistant" {
            messages.push(parse_assistant_section(section_body));
        } else if header.starts_with("Tool (") {
            let call_id = TOOL_HEADER_RE
                .captures(header)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
                .unwrap_or("unknown");
            let result = TOOL_RESULT_RE
                .captures(section_body)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim())
                .unwrap_or(section_body);
            messages.push(Message::tool(result, call_id));
        }
    }

    Conversation {
        id: meta.get("id").cloned().unwrap_or_else(|| "unknown".to_string()),
        title: meta
            .get("title")
            .cloned()
            .unwrap_or_else(|| "Untitled".to_string()),
        created: meta.get("created").cloned().unwrap_or_default(),
        updated: meta.get("updated").cloned().unwrap_or_default(),
        model: meta
            .get("model")
            .cloned()
            .unwrap_or_else(|| FALLBACK_MODEL.to_string()),
        messages,
    }
}

fn parse_assistant_section(section_body: &str) -> Message {
    let mut tool_calls = Vec::new();
    let mut text = section_body.to_string();

    for caps in TOOL_CALL_RE.captures_iter(section_body) {
        let block = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        match serde_json::from_str::<EncodedToolCall>(caps[1].trim()) {
            Ok(encoded) => {
                // Arguments go back to their string-encoded wire form.
                let arguments = encoded.arguments.to_string();
                tool_calls.push(ToolCall::function(encoded.id, encoded.name, arguments));
            }
            Err(err) => {
                debug!(%err, "skipping malformed tool-call block");
            }
        }
        text = text.replace(block, "").trim().to_string();
    }

    Message {
        role: Role::Assistant,
        content: (!text.is_empty()).then_some(text),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }
}

/// Extract the `key: value` pairs between the leading `---` delimiters.
/// Quoted values are unquoted and internal `\"` escapes restored.
pub fn parse_frontmatter(content: &str) -> HashMap<String, String> {
    let mut meta = HashMap::new();
    let Some(caps) = FRONTMATTER_RE.captures(content) else {
        return meta;
    };

    for line in caps[1].lines() {
        let Some(colon) = line.find(':') else { continue };
        let key = line[..colon].trim();
        let mut value = line[colon + 1..].trim().to_string();
        if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
            value = value[1..value.len() - 1].replace("\\\"", "\"");
        }
        meta.insert(key.to_string(), value);
    }
    meta
}

// ── Tests ────────────────────────────────────────────────────────────────────
