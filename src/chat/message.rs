//! Conversation transcript types.
//!
//! A [`Conversation`] is an append-only sequence of [`ChatMessage`]s plus a
//! single mutable slot for the assistant reply currently being streamed.
//! Keeping the in-flight reply out of the message list makes the
//! overwrite-at-completion rule structural: streamed fragments accumulate in
//! the pending slot, and only [`Conversation::commit_assistant`] turns them
//! into a real transcript entry, using the authoritative final text.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
}

impl Role {
    /// The wire name of this role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation transcript.
///
/// Immutable once appended to a [`Conversation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Client-assigned identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Who authored the message.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Create a message with a fresh id.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            role,
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// The in-flight assistant reply, grown token by token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PendingAssistant {
    content: String,
}

/// An ordered conversation transcript with an optional pending assistant
/// reply and a server-assigned conversation identifier.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    pending: Option<PendingAssistant>,
    server_conversation_id: Option<String>,
}

impl Conversation {
    /// Create an empty conversation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed messages, in turn order. The pending reply is not
    /// included.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The server-assigned conversation identifier, if one has been seen.
    #[must_use]
    pub fn server_conversation_id(&self) -> Option<&str> {
        self.server_conversation_id.as_deref()
    }

    /// Record a server-assigned conversation id. A later non-empty value
    /// always overwrites an earlier one; empty values are ignored.
    pub fn set_server_conversation_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !id.is_empty() {
            self.server_conversation_id = Some(id);
        }
    }

    /// Append a committed message.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Open the pending assistant slot, discarding any previous pending
    /// content.
    pub fn begin_assistant(&mut self) {
        self.pending = Some(PendingAssistant::default());
    }

    /// Append a streamed fragment to the pending reply. Opens the slot if
    /// it is not open yet.
    pub fn append_pending(&mut self, token: &str) {
        self.pending
            .get_or_insert_with(PendingAssistant::default)
            .content
            .push_str(token);
    }

    /// The text accumulated in the pending slot, if any.
    #[must_use]
    pub fn pending_text(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.content.as_str())
    }

    /// Replace the pending reply wholesale with the authoritative final
    /// text and commit it as a transcript entry.
    ///
    /// The committed content is `final_text`, never the token accumulation,
    /// so a final payload that differs from the token sum cannot duplicate
    /// or corrupt the transcript.
    pub fn commit_assistant(&mut self, final_text: impl Into<String>) {
        self.pending = None;
        self.messages.push(ChatMessage::assistant(final_text));
    }

    /// Discard the pending reply without committing anything.
    pub fn abort_pending(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn role_wire_names() {
        assert_eq!(Role::System.as_str(), "system");
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn role_serde_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn constructors_assign_ids() {
        let msg = ChatMessage::user("hello");
        assert!(msg.id.is_some());
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn message_serde_round_trip() {
        let msg = ChatMessage::system("be brief");
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn message_without_id_deserializes() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"hi"}"#).unwrap();
        assert!(msg.id.is_none());
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn push_preserves_insertion_order() {
        let mut conv = Conversation::new();
        conv.push(ChatMessage::user("one"));
        conv.push(ChatMessage::assistant("two"));
        conv.push(ChatMessage::user("three"));

        let contents: Vec<&str> = conv.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
    }

    #[test]
    fn pending_accumulates_tokens() {
        let mut conv = Conversation::new();
        conv.begin_assistant();
        conv.append_pending("Hel");
        conv.append_pending("lo");
        assert_eq!(conv.pending_text(), Some("Hello"));
        assert!(conv.messages().is_empty());
    }

    #[test]
    fn commit_replaces_rather_than_appends() {
        let mut conv = Conversation::new();
        conv.begin_assistant();
        conv.append_pending("partial tok");
        conv.commit_assistant("official final text");

        assert!(conv.pending_text().is_none());
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.messages()[0].content, "official final text");
    }

    #[test]
    fn append_without_begin_opens_slot() {
        let mut conv = Conversation::new();
        conv.append_pending("hi");
        assert_eq!(conv.pending_text(), Some("hi"));
    }

    #[test]
    fn begin_discards_stale_pending() {
        let mut conv = Conversation::new();
        conv.append_pending("stale");
        conv.begin_assistant();
        assert_eq!(conv.pending_text(), Some(""));
    }

    #[test]
    fn abort_pending_commits_nothing() {
        let mut conv = Conversation::new();
        conv.append_pending("doomed");
        conv.abort_pending();
        assert!(conv.pending_text().is_none());
        assert!(conv.messages().is_empty());
    }

    #[test]
    fn conversation_id_last_write_wins() {
        let mut conv = Conversation::new();
        assert!(conv.server_conversation_id().is_none());

        conv.set_server_conversation_id("conv-1");
        conv.set_server_conversation_id("conv-2");
        assert_eq!(conv.server_conversation_id(), Some("conv-2"));
    }

    #[test]
    fn empty_conversation_id_is_ignored() {
        let mut conv = Conversation::new();
        conv.set_server_conversation_id("conv-1");
        conv.set_server_conversation_id("");
        assert_eq!(conv.server_conversation_id(), Some("conv-1"));
    }
}
