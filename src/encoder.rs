//! Timer-driven frame sampling and JPEG compression
//!
//! The encoder samples a [`CaptureSurface`] at a fixed interval derived from
//! the configured frame rate, scales each sample to the configured size and
//! compresses it to JPEG at the configured quality. A fixed-interval timer
//! (rather than frame-synced sampling) keeps outbound bandwidth predictable
//! regardless of the camera's native rate.

use crate::capture::CaptureSurface;
use crate::config::StreamConfig;
use crate::protocol::EncodedFrame;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bounded frame queue depth; a full queue drops the newest frame rather
/// than building up latency.
const FRAME_CHANNEL_DEPTH: usize = 8;

/// Encoder statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub ticks_skipped: u64,
    pub frames_dropped: u64,
}

/// Cancellation handle for a running encoder.
///
/// Cloneable so both the controller and the transport's close path can stop
/// sampling; `stop` is idempotent and no tick runs after it returns.
#[derive(Clone)]
pub struct EncoderHandle {
    running: Arc<AtomicBool>,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
    frames_encoded: Arc<AtomicU64>,
    ticks_skipped: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
}

impl EncoderHandle {
    /// Halts sampling immediately. Safe to call any number of times.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            debug!("Stopping frame encoder");
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Timer-driven sampler over a live capture surface.
pub struct FrameEncoder;

impl FrameEncoder {
    /// Begins sampling `surface` at the interval given by the shared config's
    /// frame rate. Size and quality are re-read from the config cell on every
    /// tick, so they apply live; rate changes require a restart.
    ///
    /// Each tick either emits one [`EncodedFrame`] into the returned channel
    /// or skips silently (surface not ready, or queue full). Never blocks.
    pub fn start(
        surface: Arc<dyn CaptureSurface>,
        config: Arc<RwLock<StreamConfig>>,
    ) -> (EncoderHandle, mpsc::Receiver<EncodedFrame>) {
        let interval = config.read().frame_interval();

        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting frame encoder"
        );

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);

        let running = Arc::new(AtomicBool::new(true));
        let frames_encoded = Arc::new(AtomicU64::new(0));
        let ticks_skipped = Arc::new(AtomicU64::new(0));
        let frames_dropped = Arc::new(AtomicU64::new(0));

        let handle = EncoderHandle {
            running: Arc::clone(&running),
            task: Arc::new(parking_lot::Mutex::new(None)),
            frames_encoded: Arc::clone(&frames_encoded),
            ticks_skipped: Arc::clone(&ticks_skipped),
            frames_dropped: Arc::clone(&frames_dropped),
        };

        let task = tokio::spawn(async move {
            // First tick one full period after start, matching a plain
            // repeating timer.
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if !running.load(Ordering::Acquire) {
                    break;
                }

                let (width, height, quality) = {
                    let cfg = config.read();
                    (cfg.width, cfg.height, cfg.jpeg_quality())
                };

                // Surface not ready yet: skip the tick, no payload, no error
                let frame = match surface.dimensions().and_then(|_| surface.frame()) {
                    Some(frame) => frame,
                    None => {
                        ticks_skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };

                match encode_jpeg(&frame, width, height, quality) {
                    Ok(image) => {
                        let encoded = EncodedFrame {
                            image,
                            captured_at_ms: epoch_ms(),
                        };
                        match frame_tx.try_send(encoded) {
                            Ok(()) => {
                                frames_encoded.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(_) => {
                                frames_dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to encode frame, skipping tick");
                        ticks_skipped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        });

        *handle.task.lock() = Some(task);
        (handle, frame_rx)
    }
}

fn encode_jpeg(
    frame: &image::RgbImage,
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Bytes, image::ImageError> {
    let scaled = if frame.dimensions() == (width, height) {
        std::borrow::Cow::Borrowed(frame)
    } else {
        std::borrow::Cow::Owned(image::imageops::resize(
            frame,
            width,
            height,
            FilterType::Triangle,
        ))
    };

    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    scaled.write_with_encoder(encoder)?;
    Ok(Bytes::from(buf))
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
