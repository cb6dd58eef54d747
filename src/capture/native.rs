//! On-device recognition provider.
//!
//! Drives an external speech-recognition engine binary (configured via
//! `voice.engine_command`) and adapts its stdout to [`RecognizerEvent`]s.
//! The engine owns microphone access and OS permission prompts; this
//! provider only supervises the process.
//!
//! # Line protocol
//!
//! The engine writes one JSON object per stdout line:
//!
//! ```text
//! {"text": "hello wor", "final": false}
//! {"text": "hello world", "final": true}
//! {"level": 0.42}
//! {"error": "microphone busy"}
//! ```
//!
//! Lines that are not valid JSON are engine chatter and are ignored.
//! Process exit maps to [`RecognizerEvent::End`].

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::recognizer::{
    PermissionState, RecognizerEvent, RecognizerFactory, SpeechRecognizer, StartOptions,
};
use crate::error::{ParleyError, Result};

/// Factory for the on-device engine provider.
pub struct NativeEngineFactory {
    command: Option<String>,
}

impl NativeEngineFactory {
    /// Create a factory for the given engine command, if configured.
    #[must_use]
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

impl RecognizerFactory for NativeEngineFactory {
    fn name(&self) -> &str {
        "native"
    }

    fn probe(&self) -> bool {
        self.command
            .as_deref()
            .filter(|cmd| !cmd.trim().is_empty())
            .is_some_and(|cmd| which::which(cmd).is_ok())
    }

    fn create(&self) -> Box<dyn SpeechRecognizer> {
        Box::new(NativeRecognizer {
            command: self.command.clone().unwrap_or_default(),
            child: None,
        })
    }
}

/// Recognizer backed by an external engine process.
pub struct NativeRecognizer {
    command: String,
    child: Option<Child>,
}

#[async_trait]
impl SpeechRecognizer for NativeRecognizer {
    fn name(&self) -> &str {
        "native"
    }

    async fn request_permission(&mut self) -> Result<PermissionState> {
        // Microphone permission is negotiated by the engine itself on
        // start; a refused engine reports it on the error line. Here the
        // only check is that the engine is still resolvable.
        if which::which(&self.command).is_ok() {
            Ok(PermissionState::Granted)
        } else {
            Ok(PermissionState::Denied)
        }
    }

    async fn start(&mut self, options: StartOptions) -> Result<mpsc::Receiver<RecognizerEvent>> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--language").arg(&options.language);
        if options.interim_results {
            cmd.arg("--partial");
        }
        if options.continuous {
            cmd.arg("--continuous");
        }
        cmd.stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .stdin(std::process::Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| ParleyError::Capture(format!("failed to start engine: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ParleyError::Capture("engine stdout unavailable".to_owned()))?;

        debug!("engine started: {}", self.command);
        self.child = Some(child);

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(event) = parse_engine_line(&line) else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    // Receiver dropped; the session is gone.
                    return;
                }
            }
            let _ = tx.send(RecognizerEvent::End).await;
        });

        Ok(rx)
    }

    async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!("failed to stop engine: {e}");
            }
            // Reap in the background; the reader task emits End at EOF.
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
    }
}

/// Parse one engine stdout line. `None` for chatter.
fn parse_engine_line(line: &str) -> Option<RecognizerEvent> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;

    if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
        return Some(RecognizerEvent::Error(message.to_owned()));
    }
    if let Some(level) = value.get("level").and_then(serde_json::Value::as_f64) {
        #[allow(clippy::cast_possible_truncation)]
        return Some(RecognizerEvent::Level(level as f32));
    }
    let text = value.get("text").and_then(|t| t.as_str())?;
    let is_final = value
        .get("final")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    Some(RecognizerEvent::Result {
        text: text.to_owned(),
        is_final,
    })
}
