//! File addressing for the conversation store.
//!
//! One file per conversation, named `<created-date>_<id>.md`.  The date
//! prefix is advisory only; lookups scan for the `_<id>.md` suffix so a
//! conversation whose `created` date no longer matches its filename is
//! still found.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::codec;
use crate::{Conversation, ConversationSummary, MemoryError, SearchResult, DEFAULT_TITLE};

/// Characters of context kept on each side of a search hit.
const SNIPPET_CONTEXT: usize = 80;

#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh conversation with a low-collision id and write it
    /// out immediately.
    pub fn create(&self, model: &str) -> Result<Conversation, MemoryError> {
        let id = Uuid::new_v4().simple().to_string()[..12].to_string();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let conversation = Conversation {
            id,
            title: DEFAULT_TITLE.to_string(),
            created: now.clone(),
            updated: now,
            model: model.to_string(),
            messages: Vec::new(),
        };
        self.save(&conversation)?;
        Ok(conversation)
    }

    pub fn save(&self, conversation: &Conversation) -> Result<(), MemoryError> {
        fs::create_dir_all(&self.dir)?;

        // A conversation that spans days keeps its original file.
        let path = self.find_file(&conversation.id).unwrap_or_else(|| {
            let date = conversation.created.chars().take(10).collect::<String>();
            self.dir.join(format!("{date}_{}.md", conversation.id))
        });

        debug!(id = %conversation.id, path = %path.display(), "saving conversation");
        fs::write(path, codec::serialize(conversation))?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Conversation, MemoryError> {
        let path = self
            .find_file(id)
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        let content = fs::read_to_string(path)?;
        Ok(codec::parse(&content))
    }

    /// All conversations, most recently updated first.
    pub fn list(&self) -> Result<Vec<ConversationSummary>, MemoryError> {
        let mut summaries = Vec::new();
        for path in self.conversation_files()? {
            let content = fs::read_to_string(&path)?;
            let meta = codec::parse_frontmatter(&content);
            let Some(id) = meta.get("id") else { continue };
            summaries.push(ConversationSummary {
                id: id.clone(),
                title: meta
                    .get("title")
                    .cloned()
                    .unwrap_or_else(|| "Untitled".to_string()),
                created: meta.get("created").cloned().unwrap_or_default(),
                updated: meta.get("updated").cloned().unwrap_or_default(),
            });
        }
        summaries.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(summaries)
    }

    /// Case-insensitive substring search over the raw serialized files.
    /// Each hit carries a snippet of up to [`SNIPPET_CONTEXT`] characters of
    /// context per side, with `...` affixed only where text was cut.
    pub fn search(&self, query: &str) -> Result<Vec<SearchResult>, MemoryError> {
        let query_lower = query.to_lowercase();
        let mut results = Vec::new();

        for path in self.conversation_files()? {
            let content = fs::read_to_string(&path)?;
            let content_lower = content.to_lowercase();
            let Some(idx) = content_lower.find(&query_lower) else {
                continue;
            };

            let meta = codec::parse_frontmatter(&content);
            let fallback_id = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            results.push(SearchResult {
                id: meta.get("id").cloned().unwrap_or(fallback_id),
                title: meta
                    .get("title")
                    .cloned()
                    .unwrap_or_else(|| "Untitled".to_string()),
                snippet: snippet_around(&content, idx, query.len()),
            });
        }
        Ok(results)
    }

    /// Remove a conversation's file.  Errors if the id is unknown.
    pub fn delete(&self, id: &str) -> Result<(), MemoryError> {
        let path = self
            .find_file(id)
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        debug!(id, path = %path.display(), "deleting conversation");
        fs::remove_file(path)?;
        Ok(())
    }

    fn find_file(&self, id: &str) -> Option<PathBuf> {
        let suffix = format!("_{id}.md");
        let entries = fs::read_dir(&self.dir).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().contains(&suffix))
                    .unwrap_or(false)
            })
    }

    fn conversation_files(&self) -> Result<Vec<PathBuf>, MemoryError> {
        fs::create_dir_all(&self.dir)?;
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .collect();
        files.sort();
        Ok(files)
    }
}

/// Cut up to `SNIPPET_CONTEXT` characters of context on each side of the
/// match at byte offset `idx`, flattening newlines so the snippet stays on
/// one line.
fn snippet_around(content: &str, idx: usize, query_len: usize) -> String {
    let mut start = idx.saturating_sub(SNIPPET_CONTEXT);
    while start > 0 && !content.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (idx + query_len + SNIPPET_CONTEXT).min(content.len());
    while end < content.len() && !content.is_char_boundary(end) {
        end += 1;
    }

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(&content[start..end].replace('\n', " "));
    if end < content.len() {
        snippet.push_str("...");
    }
    snippet
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fidus_llm::Message;

    fn store() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn create_allocates_id_and_writes_file() {
        let (_dir, store) = store();
        let conversation = store.create("anthropic/claude-sonnet-4").unwrap();
        assert_eq!(conversation.id.len(), 12);
        assert_eq!(conversation.title, DEFAULT_TITLE);
        assert_eq!(conversation.created, conversation.updated);

        let loaded = store.load(&conversation.id).unwrap();
        assert_eq!(loaded, conversation);
    }

    #[test]
    fn save_then_load_roundtrips_messages() {
        let (_dir, store) = store();
        let mut conversation = store.create("openai/gpt-4o-mini").unwrap();
        conversation.messages.push(Message::user("hello"));
        conversation.messages.push(Message::assistant("hi there"));
        store.save(&conversation).unwrap();

        let loaded = store.load(&conversation.id).unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[1].content.as_deref(), Some("hi there"));
    }

    #[test]
    fn load_unknown_id_is_not_found() {
        let (_dir, store) = store();
        let err = store.load("doesnotexist").unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(id) if id == "doesnotexist"));
    }

    #[test]
    fn lookup_tolerates_stale_date_prefix() {
        let (dir, store) = store();
        let mut conversation = store.create("m").unwrap();

        // Rename the file to a different date prefix; the id suffix is
        // what lookups go by.
        let old = fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let renamed = dir.path().join(format!("1999-01-01_{}.md", conversation.id));
        fs::rename(&old, &renamed).unwrap();

        let loaded = store.load(&conversation.id).unwrap();
        assert_eq!(loaded.id, conversation.id);

        // Saving again reuses the renamed file instead of creating a second.
        conversation.messages.push(Message::user("still here"));
        store.save(&conversation).unwrap();
        let count = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 1);
    }

    #[test]
    fn list_sorts_by_updated_descending() {
        let (_dir, store) = store();
        let mut a = store.create("m").unwrap();
        let mut b = store.create("m").unwrap();
        a.updated = "2026-01-01T00:00:00.000Z".to_string();
        b.updated = "2026-06-01T00:00:00.000Z".to_string();
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }

    #[test]
    fn search_finds_case_insensitive_hits_with_context() {
        let (_dir, store) = store();
        let mut conversation = store.create("m").unwrap();
        conversation
            .messages
            .push(Message::user("Tell me about France."));
        conversation.messages.push(Message::assistant(
            "Certainly. Among many other things, the capital of France is Paris, \
             which sits on the Seine and has been the seat of government for centuries.",
        ));
        store.save(&conversation).unwrap();

        let results = store.search("paris").unwrap();
        assert_eq!(results.len(), 1);
        let snippet = &results[0].snippet;
        assert!(snippet.contains("Paris"));
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(!snippet.contains('\n'));

        // At most 80 chars of context per side, plus the ellipses.
        let core = snippet.trim_start_matches("...").trim_end_matches("...");
        let hit = core.find("Paris").unwrap();
        assert!(hit <= 80);
        assert!(core.len() - (hit + "Paris".len()) <= 80);
    }

    #[test]
    fn search_at_file_start_has_no_leading_ellipsis() {
        let (_dir, store) = store();
        let conversation = store.create("m").unwrap();
        // "---" opens every file, so a query matching the very first bytes
        // yields an untruncated left edge.
        let results = store.search("---").unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].snippet.starts_with("......"));
        assert!(!results[0].snippet.starts_with("... "));
        assert_eq!(results[0].id, conversation.id);
    }

    #[test]
    fn delete_removes_the_file() {
        let (dir, store) = store();
        let conversation = store.create("m").unwrap();
        store.delete(&conversation.id).unwrap();

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(matches!(
            store.load(&conversation.id),
            Err(MemoryError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&conversation.id),
            Err(MemoryError::NotFound(_))
        ));
    }

    #[test]
    fn search_misses_return_empty() {
        let (_dir, store) = store();
        store.create("m").unwrap();
        assert!(store.search("zanzibar").unwrap().is_empty());
    }
}
