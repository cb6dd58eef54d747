//! Voice-capture session state machine.
//!
//! Turns a press-and-hold (or hands-free) gesture plus an asynchronous
//! recognition engine into exactly one committed outcome per capture:
//! **send**, **draft** (the user dragged past the cancel threshold), or
//! nothing (empty transcript).
//!
//! ```text
//! Idle ──start──▶ Requesting ──engine confirmed──▶ Listening
//!   ▲                  │                               │
//!   │        denied / unavailable            stop / engine end
//!   │                  │                               │
//!   └──────────────────┴──────── Finalizing ◀──────────┘
//! ```
//!
//! The session owns the recognizer event channel exclusively; re-entering
//! `Idle` releases it, so events cannot reach a dead session. Transitions
//! happen on one logical thread of control: the caller drives
//! `start`/`stop`/gesture methods and pumps engine events through
//! [`VoiceCaptureSession::run`] or
//! [`handle_event`](VoiceCaptureSession::handle_event).

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::recognizer::{
    PermissionState, RecognizerEvent, RecognizerSelector, SpeechRecognizer, StartOptions,
};
use crate::config::VoiceConfig;
use crate::error::{ParleyError, Result};

/// Capture session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No recognizer active.
    Idle,
    /// A start has been asked for; awaiting permission and engine start.
    Requesting,
    /// Recognizer active, transcript accumulating.
    Listening,
    /// Resolving the outcome after a stop request or engine end.
    Finalizing,
}

/// Capture mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Press-and-hold: output is produced only when the session finalizes.
    Manual,
    /// Each finalized utterance is dispatched immediately.
    HandsFree,
}

/// Events the session emits to its caller (the presentation layer).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Lifecycle transition.
    State(CaptureState),
    /// Live transcript replacement (display only, never committed).
    Partial(String),
    /// Input amplitude for UI feedback.
    Level(f32),
    /// Finalized text to send.
    Send(String),
    /// Finalized text to append to the editable draft.
    Draft(String),
}

/// A voice-capture session.
///
/// One capture attempt at a time: `start` while a previous attempt is
/// unresolved is a no-op. Provider selection and permission negotiation
/// happen on every `start`, so an attempt that failed can be retried.
pub struct VoiceCaptureSession {
    state: CaptureState,
    mode: CaptureMode,
    selector: RecognizerSelector,
    language: String,
    min_hold: Duration,
    cancel_threshold: f32,
    events: mpsc::UnboundedSender<SessionEvent>,

    recognizer: Option<Box<dyn SpeechRecognizer>>,
    engine_events: Option<mpsc::Receiver<RecognizerEvent>>,

    /// Live (uncommitted) transcript, replaced by each partial result.
    partial: String,
    /// Final segments committed during this capture, in arrival order.
    committed: Vec<String>,
    /// Cancel intent, continuously derived from gesture displacement and
    /// read only when finalizing.
    cancel_intent: bool,
    gesture_origin: Option<f32>,
    /// When the engine confirmed the start (min-hold reference point).
    granted_at: Option<Instant>,
    /// Re-entrancy guard collapsing overlapping start calls.
    starting: bool,
    /// A stop arrived while the start was still in flight.
    stop_requested: bool,
}

impl std::fmt::Debug for VoiceCaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceCaptureSession")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("committed_segments", &self.committed.len())
            .finish()
    }
}

impl VoiceCaptureSession {
    /// Create a session.
    ///
    /// `events` receives everything the session produces; the presentation
    /// layer decides UI effects.
    #[must_use]
    pub fn new(
        config: &VoiceConfig,
        selector: RecognizerSelector,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            state: CaptureState::Idle,
            mode: if config.hands_free {
                CaptureMode::HandsFree
            } else {
                CaptureMode::Manual
            },
            selector,
            language: config.language.clone(),
            min_hold: Duration::from_millis(config.min_hold_ms),
            cancel_threshold: config.cancel_threshold,
            events,
            recognizer: None,
            engine_events: None,
            partial: String::new(),
            committed: Vec::new(),
            cancel_intent: false,
            gesture_origin: None,
            granted_at: None,
            starting: false,
            stop_requested: false,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Current capture mode.
    #[must_use]
    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Switch capture mode. Takes effect on the next `start`.
    pub fn set_mode(&mut self, mode: CaptureMode) {
        self.mode = mode;
    }

    /// Begin a capture attempt.
    ///
    /// A second start while one is already requested or listening collapses
    /// into the first: exactly one recognizer start happens.
    ///
    /// # Errors
    ///
    /// [`ParleyError::CapabilityUnavailable`] when no provider passes its
    /// probe, [`ParleyError::PermissionDenied`] on refusal. Either way the
    /// session is back in `Idle` and can be retried.
    pub async fn start(&mut self) -> Result<()> {
        if self.starting || self.state != CaptureState::Idle {
            debug!("capture start ignored in state {:?}", self.state);
            return Ok(());
        }
        self.starting = true;
        self.partial.clear();
        self.committed.clear();
        self.cancel_intent = false;
        self.stop_requested = false;
        self.set_state(CaptureState::Requesting);

        let result = self.request_and_start().await;
        self.starting = false;
        if result.is_err() {
            self.reset_to_idle();
        }
        result
    }

    /// Provider selection, permission negotiation, and engine start.
    async fn request_and_start(&mut self) -> Result<()> {
        let mut recognizer = self.selector.select()?;

        match recognizer.request_permission().await? {
            PermissionState::Granted => {}
            PermissionState::Denied => {
                warn!("speech permission denied by {}", recognizer.name());
                return Err(ParleyError::PermissionDenied);
            }
        }

        let options = StartOptions {
            language: self.language.clone(),
            interim_results: true,
            continuous: self.mode == CaptureMode::HandsFree,
        };
        let engine_events = recognizer.start(options).await?;
        self.enter_listening(recognizer, engine_events).await;
        Ok(())
    }

    /// The engine confirmed the start. If a stop raced in while the start
    /// was in flight, skip straight to finalizing so the session still
    /// reaches `Idle`.
    async fn enter_listening(
        &mut self,
        mut recognizer: Box<dyn SpeechRecognizer>,
        engine_events: mpsc::Receiver<RecognizerEvent>,
    ) {
        if self.stop_requested {
            debug!("capture cancelled before engine confirmation");
            recognizer.stop().await;
            self.recognizer = Some(recognizer);
            self.engine_events = Some(engine_events);
            self.set_state(CaptureState::Finalizing);
            return;
        }
        self.recognizer = Some(recognizer);
        self.engine_events = Some(engine_events);
        self.granted_at = Some(Instant::now());
        self.set_state(CaptureState::Listening);
    }

    /// Record the gesture start point for cancel-intent tracking.
    pub fn gesture_began(&mut self, y: f32) {
        self.gesture_origin = Some(y);
    }

    /// Update cancel intent from the current gesture position.
    ///
    /// The flag is re-derived on every move, so dragging past the threshold
    /// and back clears it again. It is read only when finalizing; flips
    /// after release are impossible because the gesture has ended.
    pub fn gesture_moved(&mut self, y: f32) {
        if let Some(origin) = self.gesture_origin {
            self.cancel_intent = (y - origin).abs() > self.cancel_threshold;
        }
    }

    /// End the capture.
    ///
    /// In manual mode a release before the minimum hold duration defers the
    /// stop by the remaining time instead of dropping the capture. A stop
    /// while the start is still in flight is honored once the engine
    /// confirms.
    pub async fn stop(&mut self) {
        match self.state {
            CaptureState::Idle | CaptureState::Finalizing => {}
            CaptureState::Requesting => {
                self.stop_requested = true;
            }
            CaptureState::Listening => {
                if self.mode == CaptureMode::Manual
                    && let Some(granted_at) = self.granted_at
                {
                    let elapsed = granted_at.elapsed();
                    if elapsed < self.min_hold {
                        tokio::time::sleep(self.min_hold - elapsed).await;
                    }
                }
                self.set_state(CaptureState::Finalizing);
                if let Some(recognizer) = self.recognizer.as_mut() {
                    recognizer.stop().await;
                }
            }
        }
    }

    /// Feed one engine event into the state machine.
    ///
    /// Events arriving after `Idle` re-entry are ignored.
    pub fn handle_event(&mut self, event: RecognizerEvent) {
        if self.state == CaptureState::Idle {
            return;
        }
        match event {
            RecognizerEvent::Result {
                text,
                is_final: false,
            } => {
                self.partial = text;
                self.emit(SessionEvent::Partial(self.partial.clone()));
            }
            RecognizerEvent::Result {
                text,
                is_final: true,
            } => self.commit_segment(text),
            RecognizerEvent::Level(value) => self.emit(SessionEvent::Level(value)),
            RecognizerEvent::Error(reason) => {
                // An engine error still resolves whatever was captured.
                warn!("recognizer error, finalizing: {reason}");
                self.resolve();
            }
            RecognizerEvent::End => self.resolve(),
        }
    }

    /// Pump engine events until the session resolves back to `Idle`.
    pub async fn run(&mut self) {
        while self.state != CaptureState::Idle {
            let event = match self.engine_events.as_mut() {
                Some(rx) => rx.recv().await.unwrap_or(RecognizerEvent::End),
                None => RecognizerEvent::End,
            };
            self.handle_event(event);
        }
    }

    /// A final segment arrived. Hands-free flushes it immediately; manual
    /// accumulates it for finalization.
    fn commit_segment(&mut self, text: String) {
        let trimmed = text.trim();
        if self.mode == CaptureMode::HandsFree && self.state == CaptureState::Listening {
            if !trimmed.is_empty() {
                self.emit(SessionEvent::Send(trimmed.to_owned()));
            }
            self.partial.clear();
            self.emit(SessionEvent::Partial(String::new()));
        } else {
            if !trimmed.is_empty() {
                self.committed.push(trimmed.to_owned());
            }
            self.partial.clear();
        }
    }

    /// Resolve the capture outcome and return to `Idle`.
    ///
    /// Prefers the committed segments; falls back to the live partial when
    /// nothing was finalized. Cancel intent routes the text to the draft.
    fn resolve(&mut self) {
        if self.state != CaptureState::Finalizing {
            self.set_state(CaptureState::Finalizing);
        }

        let resolved = if self.committed.is_empty() {
            self.partial.trim().to_owned()
        } else {
            self.committed.join(" ")
        };

        if !resolved.is_empty() {
            if self.cancel_intent {
                self.emit(SessionEvent::Draft(resolved));
            } else {
                self.emit(SessionEvent::Send(resolved));
            }
        }

        self.reset_to_idle();
    }

    /// Clear every transient buffer and release the recognizer.
    fn reset_to_idle(&mut self) {
        self.partial.clear();
        self.committed.clear();
        self.cancel_intent = false;
        self.gesture_origin = None;
        self.granted_at = None;
        self.stop_requested = false;
        self.recognizer = None;
        self.engine_events = None;
        self.set_state(CaptureState::Idle);
    }

    fn set_state(&mut self, state: CaptureState) {
        if self.state != state {
            self.state = state;
            self.emit(SessionEvent::State(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // The caller may have dropped its receiver during teardown.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::capture::recognizer::RecognizerFactory;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared handle letting tests feed events into a started recognizer.
    #[derive(Default)]
    struct EngineHandle {
        tx: Mutex<Option<mpsc::Sender<RecognizerEvent>>>,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl EngineHandle {
        async fn send(&self, event: RecognizerEvent) {
            let tx = self.tx.lock().unwrap().clone().unwrap();
            tx.send(event).await.unwrap();
        }

        /// Drop the sender, closing the engine channel.
        fn close(&self) {
            self.tx.lock().unwrap().take();
        }
    }

    struct FakeRecognizer {
        handle: Arc<EngineHandle>,
        permission: PermissionState,
    }

    #[async_trait]
    impl SpeechRecognizer for FakeRecognizer {
        fn name(&self) -> &str {
            "fake"
        }

        async fn request_permission(&mut self) -> Result<PermissionState> {
            Ok(self.permission)
        }

        async fn start(
            &mut self,
            _options: StartOptions,
        ) -> Result<mpsc::Receiver<RecognizerEvent>> {
            self.handle.starts.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            *self.handle.tx.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn stop(&mut self) {
            self.handle.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeFactory {
        handle: Arc<EngineHandle>,
        permission: PermissionState,
        available: bool,
    }

    impl RecognizerFactory for FakeFactory {
        fn name(&self) -> &str {
            "fake"
        }

        fn probe(&self) -> bool {
            self.available
        }

        fn create(&self) -> Box<dyn SpeechRecognizer> {
            Box::new(FakeRecognizer {
                handle: Arc::clone(&self.handle),
                permission: self.permission,
            })
        }
    }

    struct Harness {
        session: VoiceCaptureSession,
        handle: Arc<EngineHandle>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    impl Harness {
        fn new(hands_free: bool) -> Self {
            Self::with_permission(hands_free, PermissionState::Granted)
        }

        fn with_permission(hands_free: bool, permission: PermissionState) -> Self {
            let handle = Arc::new(EngineHandle::default());
            let selector = RecognizerSelector::new(vec![Box::new(FakeFactory {
                handle: Arc::clone(&handle),
                permission,
                available: true,
            })]);
            let config = VoiceConfig {
                hands_free,
                min_hold_ms: 700,
                cancel_threshold: 80.0,
                ..VoiceConfig::default()
            };
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                session: VoiceCaptureSession::new(&config, selector, tx),
                handle,
                events: rx,
            }
        }

        /// Drain any engine events already queued into the session.
        fn pump(&mut self) {
            while let Some(rx) = self.session.engine_events.as_mut() {
                match rx.try_recv() {
                    Ok(event) => self.session.handle_event(event),
                    Err(_) => break,
                }
            }
        }

        fn drain_events(&mut self) -> Vec<SessionEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        fn sends(&mut self) -> Vec<String> {
            self.drain_events()
                .into_iter()
                .filter_map(|e| match e {
                    SessionEvent::Send(text) => Some(text),
                    _ => None,
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn start_reaches_listening() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        assert_eq!(h.session.state(), CaptureState::Listening);
        assert_eq!(h.handle.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn double_start_is_single_engine_start() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        h.session.start().await.unwrap();
        assert_eq!(h.handle.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permission_denied_returns_to_idle() {
        let mut h = Harness::with_permission(false, PermissionState::Denied);
        let result = h.session.start().await;
        assert!(matches!(result, Err(ParleyError::PermissionDenied)));
        assert_eq!(h.session.state(), CaptureState::Idle);
        // Denied attempt can be retried (selection happens per attempt).
        assert_eq!(h.handle.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_provider_returns_to_idle() {
        let handle = Arc::new(EngineHandle::default());
        let selector = RecognizerSelector::new(vec![Box::new(FakeFactory {
            handle,
            permission: PermissionState::Granted,
            available: false,
        })]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = VoiceCaptureSession::new(&VoiceConfig::default(), selector, tx);
        let result = session.start().await;
        assert!(matches!(result, Err(ParleyError::CapabilityUnavailable)));
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn partials_replace_live_transcript() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        h.handle
            .send(RecognizerEvent::Result {
                text: "hel".into(),
                is_final: false,
            })
            .await;
        h.handle
            .send(RecognizerEvent::Result {
                text: "hello".into(),
                is_final: false,
            })
            .await;
        h.pump();

        let partials: Vec<String> = h
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Partial(text) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(partials, ["hel", "hello"]);
        assert_eq!(h.session.partial, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn manual_mode_sends_only_on_finalize() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        h.handle
            .send(RecognizerEvent::Result {
                text: "first part".into(),
                is_final: true,
            })
            .await;
        h.pump();
        assert!(h.sends().is_empty(), "no send before finalization");

        h.session.stop().await;
        h.handle.send(RecognizerEvent::End).await;
        h.pump();
        assert_eq!(h.sends(), ["first part"]);
        assert_eq!(h.session.state(), CaptureState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_mode_joins_committed_segments() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        for text in ["one", "two"] {
            h.handle
                .send(RecognizerEvent::Result {
                    text: text.into(),
                    is_final: true,
                })
                .await;
        }
        h.session.stop().await;
        h.handle.send(RecognizerEvent::End).await;
        h.pump();
        assert_eq!(h.sends(), ["one two"]);
    }

    #[tokio::test]
    async fn hands_free_flushes_each_final_segment() {
        let mut h = Harness::new(true);
        h.session.start().await.unwrap();
        h.handle
            .send(RecognizerEvent::Result {
                text: "first utterance".into(),
                is_final: true,
            })
            .await;
        h.pump();

        let events = h.drain_events();
        assert!(
            events.contains(&SessionEvent::Send("first utterance".into())),
            "final segment dispatched immediately: {events:?}"
        );
        // Live transcript cleared after the flush.
        assert!(events.contains(&SessionEvent::Partial(String::new())));
        assert_eq!(h.session.state(), CaptureState::Listening);

        h.handle
            .send(RecognizerEvent::Result {
                text: "second utterance".into(),
                is_final: true,
            })
            .await;
        h.pump();
        assert_eq!(h.sends(), ["second utterance"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_intent_routes_to_draft() {
        let mut h = Harness::new(false);
        h.session.gesture_began(100.0);
        h.session.start().await.unwrap();
        h.handle
            .send(RecognizerEvent::Result {
                text: "save this for later".into(),
                is_final: true,
            })
            .await;
        h.session.gesture_moved(200.0); // past the 80pt threshold
        h.session.stop().await;
        h.handle.send(RecognizerEvent::End).await;
        h.pump();

        let events = h.drain_events();
        assert!(events.contains(&SessionEvent::Draft("save this for later".into())));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, SessionEvent::Send(_))),
            "cancelled capture must not send"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_intent_clears_when_dragged_back() {
        let mut h = Harness::new(false);
        h.session.gesture_began(100.0);
        h.session.start().await.unwrap();
        h.session.gesture_moved(200.0);
        h.session.gesture_moved(110.0); // back under the threshold
        h.handle
            .send(RecognizerEvent::Result {
                text: "send me".into(),
                is_final: true,
            })
            .await;
        h.session.stop().await;
        h.handle.send(RecognizerEvent::End).await;
        h.pump();
        assert_eq!(h.sends(), ["send me"]);
    }

    #[tokio::test(start_paused = true)]
    async fn short_release_defers_stop_past_min_hold() {
        let mut h = Harness::new(false);
        let before = Instant::now();
        h.session.start().await.unwrap();
        // Release immediately: the stop must still happen, deferred.
        h.session.stop().await;
        assert!(before.elapsed() >= Duration::from_millis(700));
        assert_eq!(h.session.state(), CaptureState::Finalizing);
        assert_eq!(h.handle.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn long_hold_stops_without_delay() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let before = Instant::now();
        h.session.stop().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_transcript_dispatches_nothing() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        h.session.stop().await;
        h.handle.send(RecognizerEvent::End).await;
        h.pump();

        let events = h.drain_events();
        assert!(!events.iter().any(|e| matches!(
            e,
            SessionEvent::Send(_) | SessionEvent::Draft(_)
        )));
        assert_eq!(h.session.state(), CaptureState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_error_still_resolves_transcript() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        h.handle
            .send(RecognizerEvent::Result {
                text: "partial before crash".into(),
                is_final: false,
            })
            .await;
        h.handle
            .send(RecognizerEvent::Error("engine crashed".into()))
            .await;
        h.pump();

        assert_eq!(h.sends(), ["partial before crash"]);
        assert_eq!(h.session.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn natural_end_falls_back_to_partial() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        h.handle
            .send(RecognizerEvent::Result {
                text: "only a partial".into(),
                is_final: false,
            })
            .await;
        h.handle.send(RecognizerEvent::End).await;
        h.pump();
        assert_eq!(h.sends(), ["only a partial"]);
    }

    #[tokio::test]
    async fn committed_preferred_over_partial() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        h.handle
            .send(RecognizerEvent::Result {
                text: "committed".into(),
                is_final: true,
            })
            .await;
        h.handle
            .send(RecognizerEvent::Result {
                text: "dangling partial".into(),
                is_final: false,
            })
            .await;
        h.handle.send(RecognizerEvent::End).await;
        h.pump();
        assert_eq!(h.sends(), ["committed"]);
    }

    #[tokio::test]
    async fn stop_during_requesting_defers_until_confirmation() {
        let mut h = Harness::new(false);
        // Simulate a stop racing in while the engine start is in flight.
        h.session.set_state(CaptureState::Requesting);
        h.session.stop().await;
        assert!(h.session.stop_requested);
        assert_eq!(h.session.state(), CaptureState::Requesting);

        // Engine confirmation is a no-op listen: straight to Finalizing.
        let recognizer = h.session.selector.select().unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        h.session.enter_listening(recognizer, rx).await;
        assert_eq!(h.session.state(), CaptureState::Finalizing);
        assert_eq!(h.handle.stops.load(Ordering::SeqCst), 1);

        // Channel closed — run() resolves to Idle.
        h.session.run().await;
        assert_eq!(h.session.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn run_pumps_until_idle() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        h.handle
            .send(RecognizerEvent::Result {
                text: "pumped".into(),
                is_final: true,
            })
            .await;
        h.handle.send(RecognizerEvent::End).await;
        h.handle.close();
        h.session.run().await;
        assert_eq!(h.session.state(), CaptureState::Idle);
        assert_eq!(h.sends(), ["pumped"]);
    }

    #[tokio::test]
    async fn events_after_idle_are_ignored() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        h.handle.send(RecognizerEvent::End).await;
        h.pump();
        assert_eq!(h.session.state(), CaptureState::Idle);
        h.drain_events();

        h.session.handle_event(RecognizerEvent::Result {
            text: "ghost".into(),
            is_final: true,
        });
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test]
    async fn idle_reentry_releases_engine_channel() {
        let mut h = Harness::new(false);
        h.session.start().await.unwrap();
        h.handle.send(RecognizerEvent::End).await;
        h.pump();
        assert!(h.session.engine_events.is_none());
        assert!(h.session.recognizer.is_none());
    }

    #[tokio::test]
    async fn level_events_pass_through() {
        let mut h = Harness::new(true);
        h.session.start().await.unwrap();
        h.handle.send(RecognizerEvent::Level(0.7)).await;
        h.pump();
        assert!(h.drain_events().contains(&SessionEvent::Level(0.7)));
    }

    #[tokio::test(start_paused = true)]
    async fn hands_free_has_no_min_hold() {
        let mut h = Harness::new(true);
        h.session.start().await.unwrap();
        let before = Instant::now();
        h.session.stop().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn session_retries_after_failed_attempt() {
        let mut h = Harness::with_permission(false, PermissionState::Denied);
        assert!(h.session.start().await.is_err());
        assert_eq!(h.session.state(), CaptureState::Idle);
        // A later attempt goes through selection again.
        assert!(h.session.start().await.is_err());
        assert_eq!(h.session.state(), CaptureState::Idle);
    }
}
