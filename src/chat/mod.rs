//! Chat-completions client: transcript types, the transport-tolerant
//! streaming client, and the shared event-stream parser.

pub mod client;
pub mod message;
pub mod sse;

pub use client::{ChatClient, ChatReply, KillSwitchReport};
pub use message::{ChatMessage, Conversation, Role};
pub use sse::StreamParser;
