//! Chat-completions client tolerant of heterogeneous transports.
//!
//! Servers behind different gateways answer the same request three ways: a
//! buffered JSON body, a true incremental event stream, or a stream-shaped
//! body that arrives all at once. [`ChatClient::chat`] classifies the
//! response and funnels the last two through the shared
//! [`StreamParser`](super::sse::StreamParser) so the caller sees the same
//! token callbacks regardless.

use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::chat::message::ChatMessage;
use crate::chat::sse::StreamParser;
use crate::config::ChatConfig;
use crate::error::{ParleyError, Result};

/// Callback receiving incremental token fragments in arrival order.
pub type TokenSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// The final outcome of a chat exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    /// The complete assistant text.
    pub content: String,
    /// The running server conversation id after this exchange.
    pub conversation_id: Option<String>,
}

/// Result of an emergency-stop request. Never an error: all failures are
/// folded into `success: false`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KillSwitchReport {
    /// Whether the server acknowledged the stop.
    pub success: bool,
    /// Optional server-supplied status message.
    pub message: Option<String>,
    /// Failure description when `success` is false.
    pub error: Option<String>,
    /// Number of processes the server reported killing.
    pub processes_killed: Option<u64>,
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    /// Read event-stream responses as one buffered body. The parser still
    /// delivers tokens in document order, simulating incrementality.
    buffered_stream: bool,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("buffered_stream", &self.buffered_stream)
            .finish()
    }
}

impl ChatClient {
    /// Create a client from chat configuration.
    ///
    /// # Errors
    ///
    /// Returns a config error if the base URL is empty after trimming.
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let base_url = config.endpoint_base();
        if base_url.is_empty() {
            return Err(ParleyError::Config("chat base_url is empty".to_owned()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            buffered_stream: config.buffered_stream,
        })
    }

    /// Send a conversation and collect the assistant reply.
    ///
    /// `on_token`, when present, is called zero or more times before this
    /// resolves, once per non-empty text fragment, in arrival order. Each
    /// fragment is a strict append to the accumulated text. Buffered JSON
    /// responses produce zero callbacks.
    ///
    /// `conversation_id` is included in the request only when known; the
    /// returned id reflects the last value the server sent, falling back to
    /// the one passed in.
    ///
    /// # Errors
    ///
    /// Returns a transport error for network failures or non-2xx statuses.
    /// Malformed individual stream lines are never fatal.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        conversation_id: Option<&str>,
        mut on_token: Option<TokenSink<'_>>,
    ) -> Result<ChatReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_request_body(&self.model, messages, conversation_id);

        debug!("chat request: {} messages to {url}", messages.len());

        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| ParleyError::Request(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParleyError::Transport {
                status: status.as_u16(),
                body,
            });
        }

        let running_id = conversation_id.map(str::to_owned);

        if !is_event_stream(&response) {
            // Complete, non-incremental result. Zero token callbacks.
            let text = response
                .text()
                .await
                .map_err(|e| ParleyError::Request(format!("failed to read response: {e}")))?;
            return Ok(parse_buffered_body(&text, running_id));
        }

        let mut parser = StreamParser::new();

        if self.buffered_stream {
            // Stream-shaped body without incremental reads: run the same
            // parsing algorithm over the whole buffer at once.
            let text = response
                .text()
                .await
                .map_err(|e| ParleyError::Request(format!("failed to read response: {e}")))?;
            forward(&mut on_token, parser.push(&text));
            forward(&mut on_token, parser.finish());
        } else {
            let mut decoder = Utf8ChunkDecoder::default();
            let mut byte_stream = response.bytes_stream();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk
                    .map_err(|e| ParleyError::Request(format!("stream read error: {e}")))?;
                forward(&mut on_token, parser.push(&decoder.decode(&chunk)));
                if parser.is_done() {
                    break;
                }
            }
            forward(&mut on_token, parser.push(&decoder.flush()));
            forward(&mut on_token, parser.finish());
        }

        let (content, streamed_id) = parser.into_parts();
        Ok(ChatReply {
            content,
            conversation_id: streamed_id.or(running_id),
        })
    }

    /// Probe the server: true iff the model-listing endpoint answers 2xx.
    /// Never errors.
    pub async fn health(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        let mut request = self.http.get(&url);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("health check failed: {e}");
                false
            }
        }
    }

    /// Ask the server to stop all in-flight work. Never errors; every
    /// failure is folded into the report.
    ///
    /// The request carries an empty JSON object body: some servers reject a
    /// body-less POST when a JSON content-type is declared.
    pub async fn kill_switch(&self) -> KillSwitchReport {
        let url = format!("{}/emergency-stop", self.base_url);
        info!("sending emergency stop to {url}");

        let mut request = self.http.post(&url).json(&serde_json::json!({}));
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return KillSwitchReport::failure(format!("request failed: {e}")),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return KillSwitchReport::failure(format!("HTTP {}: {body}", status.as_u16()));
        }

        match serde_json::from_str::<KillSwitchReport>(&body) {
            Ok(report) => report,
            Err(e) => {
                warn!("emergency stop answered 2xx with undecodable body: {e}");
                KillSwitchReport::failure(format!("undecodable response: {e}"))
            }
        }
    }
}

impl KillSwitchReport {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Build the chat-completions request body. The conversation id is included
/// only when a prior value is known.
fn build_request_body(
    model: &str,
    messages: &[ChatMessage],
    conversation_id: Option<&str>,
) -> serde_json::Value {
    let wire_messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": wire_messages,
        "stream": true,
    });
    if let Some(id) = conversation_id
        && !id.is_empty()
        && let Some(obj) = body.as_object_mut()
    {
        obj.insert("conversation_id".into(), serde_json::json!(id));
    }
    body
}

/// Incremental UTF-8 decoder for transport chunks.
///
/// Chunk boundaries fall anywhere, including inside a multi-byte character;
/// the partial codepoint tail is held back until its remaining bytes arrive
/// so non-ASCII text is never mangled into replacement characters.
#[derive(Debug, Default)]
struct Utf8ChunkDecoder {
    /// Bytes of an incomplete trailing codepoint from the previous chunk.
    carry: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Decode one chunk, returning all complete characters seen so far.
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.carry.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(text) => {
                    out.push_str(text);
                    self.carry.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.carry[..valid]));
                    match e.error_len() {
                        // Incomplete trailing codepoint: wait for more bytes.
                        None => {
                            self.carry.drain(..valid);
                            break;
                        }
                        // Invalid bytes mid-chunk: replace and continue.
                        Some(len) => {
                            out.push('\u{FFFD}');
                            self.carry.drain(..valid + len);
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling partial codepoint at end of transport, if any.
    fn flush(&mut self) -> String {
        if self.carry.is_empty() {
            return String::new();
        }
        let tail = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        tail
    }
}

/// Whether the response declares an event-stream content type.
fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"))
}

/// Interpret a buffered (non-stream) body.
///
/// JSON bodies yield `choices[0].message.content`; anything that fails to
/// parse is returned verbatim as raw text.
fn parse_buffered_body(text: &str, running_id: Option<String>) -> ChatReply {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(text) else {
        return ChatReply {
            content: text.to_owned(),
            conversation_id: running_id,
        };
    };

    let content = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map_or_else(|| text.to_owned(), str::to_owned);

    let conversation_id = parsed
        .get("conversation_id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .or(running_id);

    ChatReply {
        content,
        conversation_id,
    }
}

/// Forward extracted tokens to the caller's sink, if one was provided.
fn forward(on_token: &mut Option<TokenSink<'_>>, tokens: Vec<String>) {
    if let Some(sink) = on_token.as_mut() {
        for token in &tokens {
            sink(token);
        }
    }
}
