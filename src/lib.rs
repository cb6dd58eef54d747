//! Parley: voice-first chat client core.
//!
//! This crate provides the two halves of a voice chat client:
//! Voice capture → transcript → streaming chat completion → tokens
//!
//! # Architecture
//!
//! - **Chat**: [`ChatClient`] speaks an OpenAI-style chat-completions
//!   endpoint and tolerates heterogeneous transports: buffered JSON,
//!   buffered event-stream bodies, and true incremental streams all go
//!   through one parser ([`chat::StreamParser`]).
//! - **Capture**: [`VoiceCaptureSession`] turns a press-and-hold or
//!   hands-free gesture plus a recognition engine into exactly one
//!   committed outcome per capture (send, draft, or nothing).
//! - **Store**: [`SessionStore`] persists conversations as JSON files.
//!
//! Recognition engines are external processes or services; see
//! [`capture::NativeEngineFactory`] and [`capture::HostedEngineFactory`].

pub mod capture;
pub mod chat;
pub mod config;
pub mod error;
pub mod store;

pub use capture::{
    CaptureMode, CaptureState, RecognizerSelector, SessionEvent, VoiceCaptureSession,
};
pub use chat::{ChatClient, ChatMessage, ChatReply, Conversation, KillSwitchReport, Role};
pub use config::{AppConfig, ChatConfig, VoiceConfig};
pub use error::{ParleyError, Result};
pub use store::{SavedSession, SessionStore};
