//! Speech-recognition capability abstraction.
//!
//! The capture session talks to recognizers through [`SpeechRecognizer`]:
//! `start` yields a channel of [`RecognizerEvent`]s and `stop` asks the
//! engine to finish up. Concrete providers (on-device engine, hosted
//! service) are chosen per capture attempt by [`RecognizerSelector`]
//! probing registered factories in preference order, so a provider that was
//! unusable on one attempt can be retried on the next.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ParleyError, Result};

/// An event emitted by a recognition engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    /// A transcription update.
    Result {
        /// The transcribed text.
        text: String,
        /// Final segment (committed) vs. partial (display only).
        is_final: bool,
    },
    /// Input amplitude in `[0, 1]`, for UI feedback only.
    Level(f32),
    /// The engine reported an error. Treated like `End` by the session:
    /// whatever was transcribed before the error is still resolved.
    Error(String),
    /// The engine finished, either on request or on its own.
    End,
}

/// Options passed to [`SpeechRecognizer::start`].
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Recognition language tag, e.g. `en-US`.
    pub language: String,
    /// Whether partial (non-final) results are wanted.
    pub interim_results: bool,
    /// Keep listening across utterances instead of ending after the first
    /// final result. Requested in hands-free mode; best-effort.
    pub continuous: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_owned(),
            interim_results: true,
            continuous: false,
        }
    }
}

/// Outcome of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    /// Capture may proceed.
    Granted,
    /// The user or platform refused. Hard stop, no transcript.
    Denied,
}

/// A speech-recognition engine the session can drive.
///
/// The event receiver returned by `start` is exclusively owned by one
/// session; dropping it releases the subscription.
#[async_trait]
pub trait SpeechRecognizer: Send {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Negotiate permission with the engine or platform.
    async fn request_permission(&mut self) -> Result<PermissionState>;

    /// Start recognition, returning the event channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be started.
    async fn start(&mut self, options: StartOptions) -> Result<mpsc::Receiver<RecognizerEvent>>;

    /// Ask the engine to finish. The engine answers with a final `End`
    /// event on the channel returned by `start`.
    async fn stop(&mut self);
}

/// A probe-and-construct handle for one provider.
pub trait RecognizerFactory: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Whether this provider is usable right now. Called on every capture
    /// attempt, not once per process.
    fn probe(&self) -> bool;

    /// Construct a fresh recognizer instance.
    fn create(&self) -> Box<dyn SpeechRecognizer>;
}

/// Selects a recognition provider by capability probing.
///
/// Factories are tried in registration order; register the preferred
/// (on-device) provider first.
pub struct RecognizerSelector {
    factories: Vec<Box<dyn RecognizerFactory>>,
}

impl std::fmt::Debug for RecognizerSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.factories.iter().map(|f| f.name()).collect();
        f.debug_struct("RecognizerSelector")
            .field("factories", &names)
            .finish()
    }
}

impl RecognizerSelector {
    /// Create a selector over the given factories, in preference order.
    #[must_use]
    pub fn new(factories: Vec<Box<dyn RecognizerFactory>>) -> Self {
        Self { factories }
    }

    /// Probe factories in order and construct the first usable provider.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::CapabilityUnavailable`] when no provider
    /// passes its probe.
    pub fn select(&self) -> Result<Box<dyn SpeechRecognizer>> {
        for factory in &self.factories {
            if factory.probe() {
                tracing::debug!("selected speech provider: {}", factory.name());
                return Ok(factory.create());
            }
            tracing::debug!("speech provider unavailable: {}", factory.name());
        }
        Err(ParleyError::CapabilityUnavailable)
    }
}
