//! Captured frames and the views detectors receive.
//!
//! - `Frame`: Timestamped pixel buffer owned by a frame source. Bytes are private.
//! - `FrameView`: Borrowed view handed to a detector for the duration of one call.
//! - `StillImage`: JPEG-encoded still supplied to the cloud scan flow on demand.
//!
//! Capture buffers come from a finite pool on real devices, so a `Frame` is
//! never cloned and its bytes are zeroized on drop. Detectors only ever see a
//! `FrameView<'_>`, whose lifetime ends when `detect` returns.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// JPEG quality used for stills sent to the cloud vision model.
pub const DEFAULT_JPEG_QUALITY: u8 = 50;

/// MIME type of every `StillImage`.
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Luma8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Luma8 => 1,
        }
    }
}

/// Orientation the source applied when producing the frame.
///
/// Bounding boxes are expressed relative to the frame as tagged here, with the
/// origin at the lower-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Up,
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

/// Reason a frame cannot be handed to a detector.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameDefect {
    #[error("frame buffer is empty")]
    Empty,
    #[error("frame has a zero dimension ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
    #[error("expected {expected} bytes for a {width}x{height} {format:?} frame, found {actual}")]
    LengthMismatch {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("pixel format {0:?} is not supported by the detector")]
    UnsupportedFormat(PixelFormat),
}

/// One captured image sample.
///
/// There is no `Clone` impl: a frame is owned by exactly one stage at a time.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture time as an offset from the start of the stream.
    pub timestamp: Duration,
    pub orientation: Orientation,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp: Duration,
    ) -> Self {
        Self {
            data,
            width,
            height,
            format,
            timestamp,
            orientation: Orientation::Up,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Wrap a decoded RGB image.
    pub fn from_rgb_image(image: image::RgbImage, timestamp: Duration) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, PixelFormat::Rgb8, timestamp)
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Borrowed view for a detector call.
    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }

    /// Check that the buffer matches its declared geometry.
    pub fn check_layout(&self) -> std::result::Result<(), FrameDefect> {
        if self.data.is_empty() {
            return Err(FrameDefect::Empty);
        }
        if self.width == 0 || self.height == 0 {
            return Err(FrameDefect::ZeroDimension {
                width: self.width,
                height: self.height,
            });
        }
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(self.format.bytes_per_pixel()))
            .unwrap_or(usize::MAX);
        if self.data.len() != expected {
            return Err(FrameDefect::LengthMismatch {
                width: self.width,
                height: self.height,
                format: self.format,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Encode the frame as a JPEG still.
    pub fn to_jpeg(&self, quality: u8) -> Result<StillImage> {
        self.check_layout()
            .map_err(|defect| anyhow!("cannot encode frame: {}", defect))?;

        let (pixels, color) = match self.format {
            PixelFormat::Rgb8 => (self.data.clone(), ExtendedColorType::Rgb8),
            PixelFormat::Luma8 => (self.data.clone(), ExtendedColorType::L8),
            PixelFormat::Rgba8 => (
                self.data
                    .chunks_exact(4)
                    .flat_map(|px| [px[0], px[1], px[2]])
                    .collect(),
                ExtendedColorType::Rgb8,
            ),
        };

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
            .encode(&pixels, self.width, self.height, color)
            .context("encode jpeg still")?;
        Ok(StillImage { bytes })
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("timestamp", &self.timestamp)
            .field("orientation", &self.orientation)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

/// Read-only view of a frame for the duration of one detector call.
///
/// The view borrows the frame, so a detector cannot keep it past `detect`:
///
/// ```compile_fail
/// use smart_cane::FrameView;
///
/// struct Hoarder {
///     last: Option<FrameView<'static>>,
/// }
///
/// impl Hoarder {
///     fn keep(&mut self, view: FrameView<'_>) {
///         self.last = Some(view);
///     }
/// }
/// ```
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    frame: &'a Frame,
}

impl<'a> FrameView<'a> {
    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }

    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn format(&self) -> PixelFormat {
        self.frame.format
    }

    pub fn timestamp(&self) -> Duration {
        self.frame.timestamp
    }

    pub fn orientation(&self) -> Orientation {
        self.frame.orientation
    }

    /// Luma of the pixel at (x, y), top-left origin.
    pub fn luma_at(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let bpp = self.format().bytes_per_pixel();
        let idx = (y as usize * self.width() as usize + x as usize) * bpp;
        let px = self.pixels().get(idx..idx + bpp)?;
        Some(match self.format() {
            PixelFormat::Luma8 => px[0],
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => {
                ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8
            }
        })
    }
}

/// JPEG-encoded still image.
#[derive(Clone, PartialEq, Eq)]
pub struct StillImage {
    bytes: Vec<u8>,
}

impl StillImage {
    /// Wrap bytes that are already JPEG-encoded.
    pub fn from_jpeg_bytes(bytes: Vec<u8>) -> Result<Self> {
        if !is_jpeg(&bytes) {
            return Err(anyhow!("data is not a JPEG image"));
        }
        Ok(Self { bytes })
    }

    pub fn from_jpeg_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        Self::from_jpeg_bytes(bytes).with_context(|| format!("invalid image {}", path.display()))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &'static str {
        JPEG_MIME_TYPE
    }
}

impl fmt::Debug for StillImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StillImage")
            .field("mime_type", &JPEG_MIME_TYPE)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Sniffs the leading magic only; camera files often carry bytes after EOI.
fn is_jpeg(bytes: &[u8]) -> bool {
    matches!(image::guess_format(bytes), Ok(ImageFormat::Jpeg))
}
