use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Fidus, a helpful and knowledgeable AI assistant. You are named after the Latin word for faithful.

You have access to tools that you can use to help answer questions. Use them when appropriate.

Be concise but thorough. Use markdown formatting in your responses when it helps readability.";

/// Flat settings file stored as TOML.  Every field has a default so a
/// missing or partial file always loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Model identifier passed to the completion endpoint.
    pub model: String,
    /// OpenRouter credential.  Usually left empty in the file and supplied
    /// via the `OPENROUTER_API_KEY` environment variable instead.
    pub api_key: String,
    /// Instruction text prepended to every round as the system message.
    pub system_prompt: String,
    /// Root directory for persisted state (conversations live under
    /// `<data_dir>/conversations`).
    pub data_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            data_dir: "data".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when the file is
    /// missing, then apply environment overrides (`OPENROUTER_API_KEY`,
    /// `FIDUS_MODEL`).
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("parse settings file {}", path.display()))?,
            Err(_) => Self::default(),
        };

        if let Ok(key) = env::var("OPENROUTER_API_KEY") {
            if !key.trim().is_empty() {
                settings.api_key = key;
            }
        }
        if let Ok(model) = env::var("FIDUS_MODEL") {
            if !model.trim().is_empty() {
                settings.model = model;
            }
        }
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).context("serialize settings")?;
        fs::write(path, content)
            .with_context(|| format!("write settings file {}", path.display()))?;
        Ok(())
    }

    pub fn conversations_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("conversations")
    }
}

/// Redact an API key for display: first 6 and last 4 characters survive.
/// Counts characters, not bytes, so a hand-edited key with multi-byte
/// characters cannot land a slice off a char boundary.
pub fn mask_api_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 8 {
        return "****".to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

// ── Tests ────────────────────────────────────────────────────────────────────
