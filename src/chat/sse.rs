//! Event-stream parser for chat-completions responses.
//!
//! Reconstructs assistant text from `data: <json>`-framed event streams.
//! The same parser handles both true incremental streams (bytes fed in as
//! they arrive) and stream-shaped bodies that were read in one piece: feed
//! the whole buffer through [`StreamParser::push`] and the tokens come out
//! in document order either way.
//!
//! # Framing
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"content":"lo"}}],"conversation_id":"c-1"}
//!
//! data: [DONE]
//! ```
//!
//! Events are delimited by a blank line. Payload lines that are not valid
//! JSON are framing noise from upstream gateways and are skipped silently.
//! `[DONE]` (bare or JSON-quoted) halts parsing; anything after it is
//! discarded. A stream that ends without `[DONE]` is also a success.

use tracing::trace;

/// Marker value identifying an embedded control message rather than
/// conversational text.
const CONTROL_EVENT_TYPE: &str = "data-operation";

/// Incremental parser for chat-completions event streams.
///
/// Feed chunks via [`push`](Self::push), then call
/// [`finish`](Self::finish) when the transport ends. Accumulated text and
/// the last-seen conversation id are available afterwards.
#[derive(Debug, Default)]
pub struct StreamParser {
    /// Unconsumed transport bytes (partial event tail).
    buffer: String,
    /// All forwarded tokens, concatenated.
    text: String,
    /// Last conversation id observed in any chunk.
    conversation_id: Option<String>,
    /// Set once `[DONE]` has been seen; later input is discarded.
    done: bool,
}

impl StreamParser {
    /// Create a new parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of transport text into the parser.
    ///
    /// Returns the tokens extracted from this chunk, in document order.
    /// Each returned token has already been appended to the accumulated
    /// text.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        if self.done {
            return tokens;
        }

        self.buffer.push_str(chunk);

        // Extract complete events (blank-line delimited); keep the partial
        // tail for the next chunk.
        while let Some(pos) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..pos + 2).collect();
            self.process_event(&event, &mut tokens);
            if self.done {
                self.buffer.clear();
                break;
            }
        }

        tokens
    }

    /// Signal end of transport, flushing any buffered partial event.
    ///
    /// A missing `[DONE]` marker is not an error; whatever has accumulated
    /// is the result.
    pub fn finish(&mut self) -> Vec<String> {
        let mut tokens = Vec::new();
        if self.done || self.buffer.is_empty() {
            return tokens;
        }
        let tail = std::mem::take(&mut self.buffer);
        self.process_event(&tail, &mut tokens);
        tokens
    }

    /// Whether the `[DONE]` marker has been seen.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The accumulated assistant text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The last conversation id observed, if any.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Consume the parser, returning the accumulated text and conversation
    /// id.
    #[must_use]
    pub fn into_parts(self) -> (String, Option<String>) {
        (self.text, self.conversation_id)
    }

    /// Process one blank-line-delimited event.
    fn process_event(&mut self, event: &str, tokens: &mut Vec<String>) {
        for line in event.lines() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let payload = strip_data_prefix(line);
            if payload.is_empty() {
                continue;
            }

            if is_done_marker(payload) {
                self.done = true;
                return;
            }

            // Non-JSON lines are transport framing noise, never an error.
            let Ok(chunk) = serde_json::from_str::<serde_json::Value>(payload) else {
                trace!("skipping unparseable stream line");
                continue;
            };

            if let Some(id) = chunk.get("conversation_id").and_then(|v| v.as_str())
                && !id.is_empty()
            {
                self.conversation_id = Some(id.to_owned());
            }

            let Some(token) = extract_token(&chunk) else {
                continue;
            };
            if token.is_empty() || is_control_payload(token) {
                continue;
            }

            self.text.push_str(token);
            tokens.push(token.to_owned());
        }
    }
}

/// Strip a leading `data:` prefix and its optional following space.
fn strip_data_prefix(line: &str) -> &str {
    match line.strip_prefix("data:") {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => line,
    }
}

/// Whether a payload is the stream termination marker, bare or JSON-quoted.
fn is_done_marker(payload: &str) -> bool {
    let trimmed = payload.trim();
    trimmed == "[DONE]" || trimmed == "\"[DONE]\""
}

/// Extract the token text from a parsed chunk.
///
/// Prefers `choices[0].delta.content`; falls back to
/// `choices[0].message.content` for servers that emit full-message chunks
/// instead of deltas.
fn extract_token(chunk: &serde_json::Value) -> Option<&str> {
    let choice = chunk.get("choices")?.get(0)?;
    choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .or_else(|| {
            choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
        })
}

/// Whether a token is an embedded control message to be discarded.
///
/// Only a token whose trimmed text parses as JSON carrying
/// `type == "data-operation"` qualifies. A token that merely looks
/// JSON-shaped but fails to parse, or parses without the marker, is
/// ordinary text.
fn is_control_payload(token: &str) -> bool {
    let trimmed = token.trim();
    if !trimmed.starts_with('{') {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|v| {
            v.get("type")
                .and_then(|t| t.as_str())
                .map(|t| t == CONTROL_EVENT_TYPE)
        })
        .unwrap_or(false)
}
