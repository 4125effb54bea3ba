use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::{FrameView, PixelFormat};

/// Detection model behind the inference engine.
///
/// A backend value only exists once its model is loaded; constructors are the
/// place to fail on a missing or corrupt artifact. `detect` is called from the
/// inference lane only, one frame at a time.
///
/// Implementations must treat the view as read-only and must not keep pixels
/// beyond the call. Returned boxes are normalized to the frame's own
/// dimensions with the origin at the lower-left corner; confidence filtering
/// is left to the engine.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend accepts frames in this pixel format.
    fn supports(&self, format: PixelFormat) -> bool;

    /// Run the model on one frame.
    fn detect(&mut self, frame: FrameView<'_>) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, run once when the engine is built.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn supports(&self, format: PixelFormat) -> bool {
        (**self).supports(format)
    }

    fn detect(&mut self, frame: FrameView<'_>) -> Result<Vec<RawDetection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
