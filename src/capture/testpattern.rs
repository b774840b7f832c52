//! Synthetic camera backend
//!
//! Produces a moving colour gradient without touching any hardware. Used by
//! the demo binary and throughout the test suite; the denying and
//! unsupported variants simulate the acquisition failure paths.

use super::{AccessDenied, CameraBackend, CameraStream, CaptureConstraints, CaptureSurface};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Hardware-free camera backend.
pub struct TestPatternBackend {
    supported: bool,
    deny: Option<AccessDenied>,
    open_calls: AtomicUsize,
    open_streams: Arc<AtomicUsize>,
}

impl TestPatternBackend {
    /// A backend that always grants access.
    pub fn new() -> Self {
        Self {
            supported: true,
            deny: None,
            open_calls: AtomicUsize::new(0),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A backend reporting no capture capability at all.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// A backend that refuses every acquisition with the given reason.
    pub fn denying(reason: AccessDenied) -> Self {
        Self {
            deny: Some(reason),
            ..Self::new()
        }
    }

    /// Number of times `open` was invoked (granted or not).
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::Relaxed)
    }

    /// Number of streams currently holding simulated hardware.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::Relaxed)
    }
}

impl Default for TestPatternBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for TestPatternBackend {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn open(&self, constraints: &CaptureConstraints) -> Result<CameraStream, AccessDenied> {
        self.open_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(reason) = &self.deny {
            return Err(reason.clone());
        }

        let surface = Arc::new(TestPatternSurface {
            width: constraints.width,
            height: constraints.height,
            live: AtomicBool::new(true),
            ticks: AtomicU64::new(0),
        });

        self.open_streams.fetch_add(1, Ordering::Relaxed);

        let stop_surface = Arc::clone(&surface);
        let open_streams = Arc::clone(&self.open_streams);
        let stream = CameraStream::new(surface, move || {
            stop_surface.live.store(false, Ordering::Release);
            open_streams.fetch_sub(1, Ordering::Relaxed);
        });

        Ok(stream)
    }
}

/// Moving-gradient surface; goes dead when its tracks are stopped.
struct TestPatternSurface {
    width: u32,
    height: u32,
    live: AtomicBool,
    ticks: AtomicU64,
}

impl CaptureSurface for TestPatternSurface {
    fn dimensions(&self) -> Option<(u32, u32)> {
        if self.live.load(Ordering::Acquire) {
            Some((self.width, self.height))
        } else {
            None
        }
    }

    fn frame(&self) -> Option<RgbImage> {
        if !self.live.load(Ordering::Acquire) {
            return None;
        }

        let t = self.ticks.fetch_add(1, Ordering::Relaxed) as u32;
        let (w, h) = (self.width, self.height);

        Some(RgbImage::from_fn(w, h, |x, y| {
            let r = ((x + t) * 255 / w.max(1)) as u8;
            let g = (y * 255 / h.max(1)) as u8;
            let b = (t % 255) as u8;
            image::Rgb([r, g, b])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_matches_requested_dimensions() {
        let backend = TestPatternBackend::new();
        let constraints = CaptureConstraints {
            width: 64,
            height: 48,
            ..Default::default()
        };

        let stream = backend.open(&constraints).unwrap();
        assert_eq!(stream.surface.dimensions(), Some((64, 48)));

        let frame = stream.surface.frame().unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
    }

    #[test]
    fn frames_vary_over_time() {
        let backend = TestPatternBackend::new();
        let stream = backend.open(&CaptureConstraints::default()).unwrap();

        let a = stream.surface.frame().unwrap();
        let b = stream.surface.frame().unwrap();
        assert_ne!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn dropping_stream_stops_tracks() {
        let backend = TestPatternBackend::new();
        let stream = backend.open(&CaptureConstraints::default()).unwrap();
        let surface = Arc::clone(&stream.surface);

        drop(stream);

        assert!(surface.frame().is_none());
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn denying_backend_reports_reason() {
        let backend = TestPatternBackend::denying(AccessDenied::DeviceBusy);
        let result = backend.open(&CaptureConstraints::default());
        assert_eq!(result.err(), Some(AccessDenied::DeviceBusy));
    }
}
