use std::time::Instant;

use anyhow::{anyhow, Result};

use super::source::{FrameSource, SourceStats};
use super::{frame_interval, frame_timestamp, SourceSettings};
use crate::frame::{Frame, Orientation, PixelFormat};

/// Synthetic `stub://` camera.
///
/// Renders a bright corridor with a dark doorway band that drifts across the
/// view, so the built-in detector has something to find. Timestamps advance by
/// exactly one frame interval per frame.
pub struct SyntheticSource {
    settings: SourceSettings,
    frame_count: u64,
    connected: bool,
    paced: bool,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            settings,
            frame_count: 0,
            connected: false,
            paced: false,
            next_due: None,
        }
    }

    /// Sleep between frames so they arrive at the configured rate.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    fn render(&self) -> Vec<u8> {
        let (width, height) = (self.settings.width, self.settings.height);
        let band_width = (width / 5).max(1);
        let travel = width.saturating_sub(band_width).max(1) as u64;
        let band_start = ((self.frame_count / 3) % travel) as u32;
        let band = band_start..band_start + band_width;
        let top = height / 4;

        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let value = if y >= top && band.contains(&x) {
                    25
                } else {
                    // Gentle vertical gradient so frames are not flat.
                    170 + ((y * 30) / height.max(1)) as u8
                };
                pixels.extend_from_slice(&[value, value, value]);
            }
        }
        pixels
    }

    fn wait_for_slot(&mut self) {
        let interval = frame_interval(self.settings.fps);
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        if self.settings.width == 0 || self.settings.height == 0 {
            return Err(anyhow!(
                "synthetic source needs a non-zero resolution, got {}x{}",
                self.settings.width,
                self.settings.height
            ));
        }
        self.connected = true;
        self.next_due = None;
        log::info!("SyntheticSource: connected to {} (synthetic)", self.settings.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if self.paced {
            self.wait_for_slot();
        }
        let timestamp = frame_timestamp(self.settings.fps, self.frame_count);
        let pixels = self.render();
        self.frame_count += 1;
        Ok(Some(
            Frame::new(
                pixels,
                self.settings.width,
                self.settings.height,
                PixelFormat::Rgb8,
                timestamp,
            )
            .with_orientation(Orientation::Portrait),
        ))
    }

    fn disconnect(&mut self) {
        if self.connected {
            log::info!("SyntheticSource: disconnected from {}", self.settings.url);
        }
        self.connected = false;
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.settings.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{CpuBackend, DetectorBackend};
    use std::time::Duration;

    fn stub_settings() -> SourceSettings {
        SourceSettings {
            url: "stub://test".to_string(),
            fps: 30,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn synthetic_source_produces_frames() -> Result<()> {
        let mut source = SyntheticSource::new(stub_settings());
        source.connect()?;

        let frame = source.next_frame()?.expect("frame");
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.check_layout(), Ok(()));
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn timestamps_advance_by_frame_interval() -> Result<()> {
        let mut source = SyntheticSource::new(stub_settings());
        source.connect()?;
        let first = source.next_frame()?.expect("frame");
        let second = source.next_frame()?.expect("frame");
        assert_eq!(first.timestamp, Duration::ZERO);
        assert_eq!(second.timestamp, frame_interval(30));
        Ok(())
    }

    #[test]
    fn requires_connect() {
        let mut source = SyntheticSource::new(stub_settings());
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn doorway_is_visible_to_cpu_backend() -> Result<()> {
        let mut source = SyntheticSource::new(stub_settings());
        source.connect()?;
        let frame = source.next_frame()?.expect("frame");
        let detections = CpuBackend::new().detect(frame.view())?;
        assert_eq!(detections.len(), 1);
        assert!(detections[0].confidence > 0.5);
        Ok(())
    }
}
