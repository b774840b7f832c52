//! Camera acquisition and release
//!
//! A [`CaptureSession`] owns at most one open camera stream at a time. It is
//! the only component allowed to acquire or release the underlying hardware;
//! everything downstream samples through the read-only [`CaptureSurface`].

mod surface;
pub mod testpattern;

pub use surface::CaptureSurface;

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Closed set of camera acquisition failures.
///
/// Every backend error is classified into one of these before it reaches a
/// caller; raw platform errors never cross this boundary. All variants are
/// recoverable by explicit user action — acquisition is never retried
/// automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessDenied {
    #[error("camera access denied; permission must be granted explicitly")]
    PermissionRefused,

    #[error("no camera device detected")]
    NoDevice,

    #[error("camera is in use by another application")]
    DeviceBusy,

    #[error("camera constraints not satisfiable")]
    Unsatisfiable,

    #[error("this environment does not support camera capture")]
    Unsupported,

    #[error("camera error: {0}")]
    Other(String),
}

/// Outcome of an acquisition attempt: a live sampling surface or a classified
/// denial.
pub type CameraAccessResult = Result<Arc<dyn CaptureSurface>, AccessDenied>;

/// Explicit acquisition hints. Acquisition is never attempted with ambiguous
/// constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            facing: FacingMode::User,
            width: 640,
            height: 480,
        }
    }
}

/// An open camera stream: the sampling surface paired with the handle that
/// stops its underlying tracks. Exclusively owned by a [`CaptureSession`].
pub struct CameraStream {
    surface: Arc<dyn CaptureSurface>,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl CameraStream {
    pub fn new(surface: Arc<dyn CaptureSurface>, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            surface,
            stop: Some(Box::new(stop)),
        }
    }

    fn stop_tracks(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

/// Platform-agnostic camera acquisition backend.
///
/// Real implementations wrap a platform media API; the
/// [`testpattern::TestPatternBackend`] provides a hardware-free one.
pub trait CameraBackend: Send + Sync {
    /// Whether this environment exposes camera capture at all.
    fn is_supported(&self) -> bool;

    /// Opens a camera matching the constraints. Suspends until the platform
    /// permission prompt resolves or the device is opened. Implementations
    /// must classify every failure into [`AccessDenied`].
    fn open(&self, constraints: &CaptureConstraints) -> Result<CameraStream, AccessDenied>;
}

/// Capability probe: whether capture is available in this environment.
///
/// Pure and synchronous. Callers must check this before any acquisition
/// attempt and render an unsupported state instead of requesting access.
pub fn is_capture_supported(backend: &dyn CameraBackend) -> bool {
    backend.is_supported()
}

/// Owns the lifecycle of a single camera acquisition.
pub struct CaptureSession {
    backend: Arc<dyn CameraBackend>,
    stream: Option<CameraStream>,
}

impl CaptureSession {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            stream: None,
        }
    }

    /// Requests camera access with the given constraints.
    ///
    /// If a previous stream is still open, its hardware is released first so
    /// two camera handles are never held simultaneously. On denial the
    /// session holds no surface.
    pub async fn request_access(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> CameraAccessResult {
        if !self.backend.is_supported() {
            return Err(AccessDenied::Unsupported);
        }

        if self.stream.is_some() {
            debug!("Releasing previous camera stream before re-acquiring");
            self.release();
        }

        match self.backend.open(constraints) {
            Ok(stream) => {
                info!(
                    width = constraints.width,
                    height = constraints.height,
                    "Camera stream acquired"
                );
                let surface = Arc::clone(&stream.surface);
                self.stream = Some(stream);
                Ok(surface)
            }
            Err(reason) => {
                warn!(reason = %reason, "Camera access denied");
                Err(reason)
            }
        }
    }

    /// The live sampling surface, if a stream is open.
    pub fn surface(&self) -> Option<Arc<dyn CaptureSurface>> {
        self.stream.as_ref().map(|s| Arc::clone(&s.surface))
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Stops every underlying track and drops the stream. Idempotent; a
    /// no-op when nothing is open. Runs on every exit path via `Drop`.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
            info!("Camera stream released");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
