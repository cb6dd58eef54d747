//! Saved-conversation persistence.
//!
//! Sessions are stored as individual JSON files under `<root_dir>/sessions/`
//! so they are easy to inspect, edit, and back up. By default, `<root_dir>`
//! is `~/.config/parley`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chat::message::{ChatMessage, Conversation};
use crate::error::{ParleyError, Result};

/// A persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSession {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_conversation_id: Option<String>,
}

impl SavedSession {
    /// Snapshot a conversation for saving. The title is the first user
    /// message, truncated.
    #[must_use]
    pub fn from_conversation(conversation: &Conversation) -> Self {
        let title = conversation
            .messages()
            .iter()
            .find(|m| m.role == crate::chat::message::Role::User)
            .map_or_else(|| "untitled".to_owned(), |m| truncate_title(&m.content));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            created_at: Utc::now(),
            messages: conversation.messages().to_vec(),
            server_conversation_id: conversation.server_conversation_id().map(str::to_owned),
        }
    }
}

fn truncate_title(text: &str) -> String {
    const MAX: usize = 60;
    let text = text.trim();
    if text.chars().count() <= MAX {
        text.to_owned()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{}…", cut.trim_end())
    }
}

/// File-backed session store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    #[must_use]
    pub fn new(root_dir: &Path) -> Self {
        Self {
            root: root_dir.join("sessions"),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Write one session to disk, creating the store directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or the file
    /// cannot be written.
    pub fn save(&self, session: &SavedSession) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let data = serde_json::to_string_pretty(session)
            .map_err(|e| ParleyError::Config(format!("failed to serialize session: {e}")))?;
        std::fs::write(self.session_path(&session.id), data)?;
        Ok(())
    }

    /// Load one session by id.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or not valid session JSON.
    pub fn load(&self, id: &str) -> Result<SavedSession> {
        let body = std::fs::read_to_string(self.session_path(id))?;
        serde_json::from_str(&body)
            .map_err(|e| ParleyError::Config(format!("invalid session file {id}: {e}")))
    }

    /// List all saved sessions, newest first. Unreadable files are skipped
    /// with a warning rather than failing the whole listing.
    #[must_use]
    pub fn list(&self) -> Vec<SavedSession> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut sessions: Vec<SavedSession> = entries
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|e| match std::fs::read_to_string(e.path()) {
                Ok(body) => match serde_json::from_str(&body) {
                    Ok(session) => Some(session),
                    Err(err) => {
                        warn!("skipping unreadable session {:?}: {err}", e.path());
                        None
                    }
                },
                Err(err) => {
                    warn!("skipping unreadable session {:?}: {err}", e.path());
                    None
                }
            })
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// Remove one session by id.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be removed.
    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.session_path(id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
