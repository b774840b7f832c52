//! Live capture surface abstraction

use image::RgbImage;

/// The live video source region from which frames are sampled.
///
/// A surface belongs to the capture session that produced it; everyone else
/// (the frame encoder in particular) only ever reads from it. Once the owning
/// session releases the underlying hardware, the surface goes dead: both
/// methods return `None` from then on.
pub trait CaptureSurface: Send + Sync {
    /// Native dimensions of the current video, or `None` while the source is
    /// still warming up (zero-sized frames must never be sampled).
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Latest frame as packed RGB8, or `None` when no frame is available.
    fn frame(&self) -> Option<RgbImage>;
}

impl std::fmt::Debug for dyn CaptureSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSurface")
            .field("dimensions", &self.dimensions())
            .finish()
    }
}
