//! Durable conversation storage.
//!
//! Conversations are persisted one file each as human-readable markdown:
//! a frontmatter header (id, title, timestamps, model) followed by one
//! section per message.  [`codec`] owns the grammar; [`ConversationStore`]
//! owns file addressing, listing, and search.

use serde::Serialize;
use thiserror::Error;

use fidus_llm::Message;

pub mod codec;
mod store;

pub use store::ConversationStore;

/// Title assigned to a conversation that has never been auto-titled.
pub const DEFAULT_TITLE: &str = "New Conversation";

/// An ordered message log plus its metadata.  The id is immutable once
/// created; `updated` is refreshed on every successful turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created: String,
    pub updated: String,
    pub model: String,
    pub messages: Vec<Message>,
}

/// Metadata-only view used for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created: String,
    pub updated: String,
}

/// One search hit: the matching conversation and a snippet of context
/// around the first occurrence of the query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub snippet: String,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
