//! Hosted recognition provider.
//!
//! Connects to a live-transcription WebSocket service (configured via
//! `voice.hosted_url`) and adapts its JSON frames to [`RecognizerEvent`]s.
//! The service captures audio on its own side of the connection (browser or
//! companion device); this provider only speaks the control protocol.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::recognizer::{
    PermissionState, RecognizerEvent, RecognizerFactory, SpeechRecognizer, StartOptions,
};
use crate::error::{ParleyError, Result};

// ---------------------------------------------------------------------------
// Protocol frames
// ---------------------------------------------------------------------------

/// Frames sent to the service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Start {
        language: String,
        interim_results: bool,
        continuous: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Stop,
}

/// Frames received from the service.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Result {
        #[serde(default)]
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    Level {
        #[serde(default)]
        value: f32,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    End {},
}

// ---------------------------------------------------------------------------
// Factory and recognizer
// ---------------------------------------------------------------------------

/// Factory for the hosted provider.
pub struct HostedEngineFactory {
    url: Option<String>,
    token: Option<String>,
}

impl HostedEngineFactory {
    /// Create a factory for the given service URL and auth token.
    #[must_use]
    pub fn new(url: Option<String>, token: Option<String>) -> Self {
        Self { url, token }
    }
}

impl RecognizerFactory for HostedEngineFactory {
    fn name(&self) -> &str {
        "hosted"
    }

    fn probe(&self) -> bool {
        self.url
            .as_deref()
            .and_then(|raw| url::Url::parse(raw).ok())
            .is_some_and(|u| matches!(u.scheme(), "ws" | "wss"))
    }

    fn create(&self) -> Box<dyn SpeechRecognizer> {
        Box::new(HostedRecognizer {
            url: self.url.clone().unwrap_or_default(),
            token: self.token.clone(),
            commands: None,
        })
    }
}

/// Recognizer backed by a hosted live-transcription WebSocket.
pub struct HostedRecognizer {
    url: String,
    token: Option<String>,
    /// Channel to the connection task for outbound frames.
    commands: Option<mpsc::UnboundedSender<ClientFrame>>,
}

#[async_trait]
impl SpeechRecognizer for HostedRecognizer {
    fn name(&self) -> &str {
        "hosted"
    }

    async fn request_permission(&mut self) -> Result<PermissionState> {
        // The hosted service prompts for microphone permission on its own
        // side; a refusal comes back as an error frame.
        Ok(PermissionState::Granted)
    }

    async fn start(&mut self, options: StartOptions) -> Result<mpsc::Receiver<RecognizerEvent>> {
        let (ws, _) = connect_async(&self.url)
            .await
            .map_err(|e| ParleyError::Capture(format!("hosted connect failed: {e}")))?;
        debug!("hosted recognizer connected: {}", self.url);

        let (mut sink, mut stream) = ws.split();

        let start = ClientFrame::Start {
            language: options.language,
            interim_results: options.interim_results,
            continuous: options.continuous,
            token: self.token.clone(),
        };
        let frame = serde_json::to_string(&start)
            .map_err(|e| ParleyError::Capture(format!("bad start frame: {e}")))?;
        sink.send(Message::Text(frame.into()))
            .await
            .map_err(|e| ParleyError::Capture(format!("hosted start failed: {e}")))?;

        let (tx, rx) = mpsc::channel(64);
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        self.commands = Some(cmd_tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = cmd_rx.recv() => {
                        let Some(command) = command else { break };
                        let Ok(frame) = serde_json::to_string(&command) else { continue };
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    message = stream.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                let Some(event) = parse_server_frame(&text) else {
                                    continue;
                                };
                                let ended = event == RecognizerEvent::End;
                                if tx.send(event).await.is_err() || ended {
                                    return;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("hosted recognizer socket error: {e}");
                                let _ = tx.send(RecognizerEvent::Error(e.to_string())).await;
                                break;
                            }
                        }
                    }
                }
            }
            let _ = tx.send(RecognizerEvent::End).await;
        });

        Ok(rx)
    }

    async fn stop(&mut self) {
        if let Some(commands) = self.commands.take()
            && commands.send(ClientFrame::Stop).is_err()
        {
            debug!("hosted recognizer already disconnected");
        }
    }
}

/// Parse one service frame. `None` for frames we do not understand.
fn parse_server_frame(text: &str) -> Option<RecognizerEvent> {
    let frame: ServerFrame = serde_json::from_str(text).ok()?;
    Some(match frame {
        ServerFrame::Result { text, is_final } => RecognizerEvent::Result { text, is_final },
        ServerFrame::Level { value } => RecognizerEvent::Level(value),
        ServerFrame::Error { message } => RecognizerEvent::Error(message),
        ServerFrame::End {} => RecognizerEvent::End,
    })
}
