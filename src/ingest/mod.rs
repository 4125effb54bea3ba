//! Frame sources.
//!
//! This module provides the sources the pipeline can own:
//! - Synthetic `stub://` scenes (demos, tests)
//! - Replay of a fixed frame list (tests, push-style adapters)
//! - A local directory of JPEG stills
//!
//! On the phone the capture session is platform-owned; an adapter wraps it in
//! `FrameSource` or pushes frames through `FramePipeline::handle_frame`.
//!
//! Sources MUST NOT:
//! - Retain a frame after handing it off
//! - Store frames to disk
//! - Block in `next_frame` for longer than one capture interval at steady state

mod jpeg_dir;
mod replay;
mod source;
mod synthetic;

use std::time::Duration;

use anyhow::{anyhow, Result};

pub use jpeg_dir::JpegDirSource;
pub use replay::ReplaySource;
pub use source::{FrameSource, SourceStats};
pub use synthetic::SyntheticSource;

/// Where frames come from and at what rate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    /// `stub://<name>`, `dir://<path>` or a plain local directory path.
    pub url: String,
    /// Capture rate in frames per second.
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: "stub://front_camera".to_string(),
            fps: 30,
            width: 640,
            height: 480,
        }
    }
}

/// Open the source named by `settings.url`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone()).paced(true)));
    }
    let path = match url.strip_prefix("dir://") {
        Some(path) => path,
        None if !url.is_empty() && !url.contains("://") => url,
        None => {
            return Err(anyhow!(
                "unsupported frame source '{}'; expected stub://, dir:// or a local path",
                url
            ))
        }
    };
    Ok(Box::new(JpegDirSource::new(path, settings.fps).paced(true)))
}

/// Spacing between frames at `fps`.
pub fn frame_interval(fps: u32) -> Duration {
    if fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(1_000_000_000 / fps as u64)
    }
}

/// Capture timestamp of the `index`-th frame at `fps`, saturating at `u64::MAX` ns.
pub fn frame_timestamp(fps: u32, index: u64) -> Duration {
    let nanos = (frame_interval(fps).as_nanos() as u64).saturating_mul(index);
    Duration::from_nanos(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_url_opens_synthetic_source() -> Result<()> {
        let source = open_source(&SourceSettings::default())?;
        assert_eq!(source.stats().source, "stub://front_camera");
        Ok(())
    }

    #[test]
    fn dir_url_opens_jpeg_source() -> Result<()> {
        let settings = SourceSettings {
            url: "dir:///tmp/frames".to_string(),
            ..SourceSettings::default()
        };
        let source = open_source(&settings)?;
        assert_eq!(source.stats().source, "/tmp/frames");
        Ok(())
    }

    #[test]
    fn network_urls_are_rejected() {
        let settings = SourceSettings {
            url: "rtsp://192.168.1.10/stream".to_string(),
            ..SourceSettings::default()
        };
        assert!(open_source(&settings).is_err());
    }

    #[test]
    fn frame_interval_matches_rate() {
        assert_eq!(frame_interval(30), Duration::from_nanos(33_333_333));
        assert_eq!(frame_interval(10), Duration::from_millis(100));
        assert_eq!(frame_interval(0), Duration::ZERO);
    }

    #[test]
    fn frame_timestamp_does_not_wrap() {
        assert_eq!(frame_timestamp(10, 3), Duration::from_millis(300));
        let past_u32 = u64::from(u32::MAX) + 5;
        assert_eq!(
            frame_timestamp(10, past_u32),
            Duration::from_millis(100 * past_u32)
        );
        assert_eq!(frame_timestamp(1, u64::MAX), Duration::from_nanos(u64::MAX));
    }
}
