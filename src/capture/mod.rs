//! Voice capture: the session state machine and recognition providers.
//!
//! [`VoiceCaptureSession`] owns the capture lifecycle; providers implement
//! [`SpeechRecognizer`] and are chosen per attempt by [`RecognizerSelector`].

pub mod hosted;
pub mod native;
pub mod recognizer;
pub mod session;

pub use hosted::HostedEngineFactory;
pub use native::NativeEngineFactory;
pub use recognizer::{
    PermissionState, RecognizerEvent, RecognizerFactory, RecognizerSelector, SpeechRecognizer,
    StartOptions,
};
pub use session::{CaptureMode, CaptureState, SessionEvent, VoiceCaptureSession};
