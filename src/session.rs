//! Stream session controller
//!
//! The single external façade over capture, encoding and transport. A
//! [`StreamSession`] owns exactly one capture session and one transport, is
//! the sole writer of the stream configuration, and guarantees that neither
//! a camera handle nor an open connection outlives it.

use crate::capture::{
    is_capture_supported, AccessDenied, CameraBackend, CaptureConstraints, CaptureSession,
};
use crate::config::{needs_restart, ConfigError, StreamConfig, StreamConfigUpdate};
use crate::encoder::EncoderStats;
use crate::transport::{
    PredictionHandler, StateCell, StreamTransport, TransportError, TransportState, TransportStats,
};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera capture is not supported in this environment")]
    Unsupported,

    #[error(transparent)]
    Camera(#[from] AccessDenied),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no live capture surface")]
    NoSurface,
}

/// Composes capture session, frame encoder and stream transport into one
/// streaming lifecycle.
pub struct StreamSession {
    backend: Arc<dyn CameraBackend>,
    capture: CaptureSession,
    constraints: CaptureConstraints,
    config: Arc<RwLock<StreamConfig>>,
    state: Arc<StateCell>,
    transport: StreamTransport,
    handler: Option<PredictionHandler>,
}

impl StreamSession {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        config: StreamConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let constraints = CaptureConstraints {
            width: config.width,
            height: config.height,
            ..Default::default()
        };

        let config = Arc::new(RwLock::new(config));
        let state = Arc::new(StateCell::new());
        let transport = StreamTransport::new(Arc::clone(&config), Arc::clone(&state));

        Ok(Self {
            capture: CaptureSession::new(Arc::clone(&backend)),
            backend,
            constraints,
            config,
            state,
            transport,
            handler: None,
        })
    }

    /// Overrides the acquisition constraints used on the next access request.
    pub fn with_constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Acquires the camera (or reuses the open stream) and starts streaming.
    ///
    /// Re-entrant-safe: a no-op while already connecting or connected. When
    /// the environment lacks capture capability the platform permission API
    /// is never touched. On access denial no transport connection is
    /// attempted and the surface stays unset.
    pub async fn connect(&mut self, on_prediction: PredictionHandler) -> Result<(), SessionError> {
        if self.status().is_active() {
            debug!("Session already connected, ignoring connect");
            return Ok(());
        }

        if !is_capture_supported(self.backend.as_ref()) {
            warn!("Capture unsupported in this environment");
            return Err(SessionError::Unsupported);
        }

        let surface = match self.capture.surface() {
            Some(surface) => surface,
            None => self.capture.request_access(&self.constraints).await?,
        };

        self.handler = Some(Arc::clone(&on_prediction));
        self.transport.connect(surface, on_prediction).await?;
        Ok(())
    }

    /// Tears down transport then capture session. Always safe to call.
    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
        self.capture.release();
        self.handler = None;
    }

    /// Merges a partial update into the current configuration.
    ///
    /// While streaming, a change to `server_url` or `frame_rate` performs
    /// exactly one disconnect-then-reconnect cycle with the same surface and
    /// callback; size and quality changes apply live without interrupting
    /// the stream.
    pub async fn update_config(
        &mut self,
        update: StreamConfigUpdate,
    ) -> Result<(), SessionError> {
        let old = self.config.read().clone();
        let new = old.merged(&update);
        new.validate()?;

        let restart = self.status().is_active() && needs_restart(&old, &new);

        *self.config.write() = new;

        if restart {
            info!("Configuration change requires transport restart");
            let surface = self.capture.surface().ok_or(SessionError::NoSurface)?;
            let handler = self.handler.clone().ok_or(SessionError::NoSurface)?;

            self.transport.disconnect().await;
            self.transport.connect(surface, handler).await?;
        }

        Ok(())
    }

    /// Read-only state snapshot for UI binding.
    pub fn status(&self) -> TransportState {
        self.state.get()
    }

    /// Every transport state entered since the session was created.
    pub fn state_log(&self) -> Vec<TransportState> {
        self.state.log()
    }

    pub fn config(&self) -> StreamConfig {
        self.config.read().clone()
    }

    pub fn pause(&self) {
        self.transport.pause();
    }

    pub fn resume(&self) {
        self.transport.resume();
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    pub fn encoder_stats(&self) -> Option<EncoderStats> {
        self.transport.encoder_stats()
    }
}
