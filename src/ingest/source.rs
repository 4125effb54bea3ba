use anyhow::Result;

use crate::frame::Frame;

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// A live capture session.
///
/// Each `connect` begins a fresh sequence of frames that is pulled by exactly
/// one lane until it ends or `disconnect` is called. Timestamps within one
/// sequence are non-decreasing.
pub trait FrameSource: Send {
    /// Acquire the capture resource.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. `Ok(None)` means the sequence has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the capture resource. Safe to call when not connected.
    fn disconnect(&mut self) {}

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}
