use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::source::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Plays a fixed list of frames once.
///
/// The sequence cannot be restarted: a second `connect` fails.
pub struct ReplaySource {
    name: String,
    frames: VecDeque<Frame>,
    spacing: Option<Duration>,
    frames_captured: u64,
    connected: bool,
    used: bool,
}

impl ReplaySource {
    pub fn new(name: impl Into<String>, frames: Vec<Frame>) -> Self {
        Self {
            name: name.into(),
            frames: frames.into(),
            spacing: None,
            frames_captured: 0,
            connected: false,
            used: false,
        }
    }

    /// Sleep `spacing` before each frame.
    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = Some(spacing);
        self
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ReplaySource {
    fn connect(&mut self) -> Result<()> {
        if self.used {
            return Err(anyhow!("replay source '{}' cannot be restarted", self.name));
        }
        self.used = true;
        self.connected = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("replay source '{}' not connected", self.name));
        }
        if let Some(spacing) = self.spacing {
            std::thread::sleep(spacing);
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.frames_captured += 1;
        }
        Ok(frame)
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            source: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn frame(ms: u64) -> Frame {
        Frame::new(vec![0u8; 3], 1, 1, PixelFormat::Rgb8, Duration::from_millis(ms))
    }

    #[test]
    fn replays_in_order_then_ends() -> Result<()> {
        let mut source = ReplaySource::new("replay", vec![frame(0), frame(10)]);
        source.connect()?;
        assert_eq!(source.next_frame()?.map(|f| f.timestamp), Some(Duration::ZERO));
        assert_eq!(
            source.next_frame()?.map(|f| f.timestamp),
            Some(Duration::from_millis(10))
        );
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn cannot_restart() -> Result<()> {
        let mut source = ReplaySource::new("replay", vec![frame(0)]);
        source.connect()?;
        source.disconnect();
        assert!(source.connect().is_err());
        Ok(())
    }
}
