//! On-demand object scan: still image → cloud model → speech.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cloud::{CloudError, VisionClient};
use crate::frame::{Frame, StillImage, DEFAULT_JPEG_QUALITY};
use crate::speech::{Speaker, Voice};

pub const REQUESTING_MESSAGE: &str = "Requesting analysis.";
pub const NO_IMAGE_MESSAGE: &str = "Please take or choose a photo first.";

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("a scan is already in progress")]
    Busy,
    #[error("no usable image: {0:#}")]
    Image(#[source] anyhow::Error),
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

/// Runs one scan at a time and reads the answer aloud.
pub struct ObjectScanner<C, V: Voice> {
    client: C,
    speaker: Speaker<V>,
    jpeg_quality: u8,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<C: VisionClient, V: Voice> ObjectScanner<C, V> {
    pub fn new(client: C, speaker: Speaker<V>) -> Self {
        Self {
            client,
            speaker,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn speaker(&self) -> &Speaker<V> {
        &self.speaker
    }

    pub fn is_scanning(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Encode `frame` and scan it. The frame is only borrowed.
    pub fn scan_frame(&self, frame: &Frame) -> Result<String, ScanError> {
        let still = frame
            .to_jpeg(self.jpeg_quality)
            .map_err(|err| self.no_image(err))?;
        self.scan_still(&still)
    }

    pub fn scan_file(&self, path: &Path) -> Result<String, ScanError> {
        let still = StillImage::from_jpeg_file(path).map_err(|err| self.no_image(err))?;
        self.scan_still(&still)
    }

    pub fn scan_still(&self, image: &StillImage) -> Result<String, ScanError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScanError::Busy);
        }
        let _guard = InFlight(&self.in_flight);

        self.speaker.speak(REQUESTING_MESSAGE);
        match self.client.analyze(image) {
            Ok(answer) => {
                self.speaker.speak(&answer);
                Ok(answer)
            }
            Err(err) => {
                log::warn!("object scan failed: {}", err);
                self.speaker.speak(&format!("An error occurred. {}", err));
                Err(err.into())
            }
        }
    }

    fn no_image(&self, err: anyhow::Error) -> ScanError {
        self.speaker.speak(NO_IMAGE_MESSAGE);
        ScanError::Image(err)
    }
}
