//! Live camera frame-streaming client for remote sign-language inference
//!
//! Captures a camera feed, samples it on a fixed-interval timer, compresses
//! each sample to JPEG and ships it over a persistent WebSocket to a remote
//! inference service, routing the asynchronous prediction events back to a
//! caller-supplied handler. Camera failures, connection drops and runtime
//! reconfiguration are surfaced as typed state, never as panics.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sign_stream::{StreamConfig, StreamSession, TestPatternBackend};
//!
//! # async fn run() -> Result<(), sign_stream::SessionError> {
//! let backend = Arc::new(TestPatternBackend::new());
//! let mut session = StreamSession::new(backend, StreamConfig::default())?;
//!
//! session
//!     .connect(Arc::new(|prediction| {
//!         println!("{} ({:.0}%)", prediction.letter, prediction.confidence * 100.0);
//!     }))
//!     .await?;
//! // ...
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod encoder;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use capture::{
    is_capture_supported, AccessDenied, CameraAccessResult, CameraBackend, CaptureConstraints,
    CaptureSession, CaptureSurface, FacingMode,
};
pub use capture::testpattern::TestPatternBackend;
pub use config::{needs_restart, ConfigError, StreamConfig, StreamConfigUpdate};
pub use encoder::{EncoderHandle, EncoderStats, FrameEncoder};
pub use protocol::{EncodedFrame, Prediction};
pub use session::{SessionError, StreamSession};
pub use transport::{
    PredictionHandler, StreamTransport, TransportError, TransportState, TransportStats,
};
