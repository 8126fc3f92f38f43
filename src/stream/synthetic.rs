//! Synthetic placeholder source
//!
//! When no capture attempt can produce frames (fallback ladder exhausted,
//! capture tool missing), attached viewers still need well-formed JPEG
//! parts instead of a stalled connection. This encodes one flat gray frame
//! at the requested size and republishes it at a slow fixed rate.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageBuffer};
use tokio::task::JoinHandle;
use tracing::info;

use super::broadcaster::Broadcaster;
use super::frame::{Frame, FrameLimits};

/// Republish period for the placeholder frame
pub const DEFAULT_PLACEHOLDER_INTERVAL: Duration = Duration::from_secs(1);

/// Placeholder luma, a dark neutral gray
const PLACEHOLDER_SHADE: u8 = 0x60;

const PLACEHOLDER_QUALITY: u8 = 70;

/// Placeholder dimensions are clamped to this range; the configured size
/// comes straight from the file and a placeholder gains nothing from
/// matching an absurd resolution pixel for pixel
const MIN_PLACEHOLDER_DIM: u32 = 16;
const MAX_PLACEHOLDER_DIM: u32 = 2048;

/// Encode a flat grayscale JPEG of the given size
pub fn placeholder_jpeg(width: u32, height: u32) -> Result<Bytes, String> {
    let width = width.clamp(MIN_PLACEHOLDER_DIM, MAX_PLACEHOLDER_DIM);
    let height = height.clamp(MIN_PLACEHOLDER_DIM, MAX_PLACEHOLDER_DIM);

    let pixels = vec![PLACEHOLDER_SHADE; width as usize * height as usize];
    let img: GrayImage = ImageBuffer::from_raw(width, height, pixels)
        .ok_or_else(|| "placeholder pixel buffer size mismatch".to_string())?;

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, PLACEHOLDER_QUALITY);
    encoder
        .encode_image(&img)
        .map_err(|e| format!("placeholder encode failed: {e}"))?;
    Ok(Bytes::from(out))
}

/// Periodic publisher of a single placeholder frame
///
/// Publishing stops when the handle is dropped.
pub struct SyntheticSource {
    task: JoinHandle<()>,
}

impl SyntheticSource {
    /// Encode the placeholder once and start republishing it
    pub fn start(
        broadcaster: Arc<Broadcaster>,
        width: u32,
        height: u32,
        limits: &FrameLimits,
        interval: Duration,
    ) -> Result<Self, String> {
        let jpeg = placeholder_jpeg(width, height)?;
        let frame = Frame::from_jpeg(jpeg, limits)
            .ok_or_else(|| "placeholder failed frame validation".to_string())?;

        info!(
            width,
            height,
            bytes = frame.len(),
            "Synthetic placeholder source started"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                broadcaster.publish(&frame);
            }
        });

        Ok(Self { task })
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}
