use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use super::{frame_interval, frame_timestamp};
use super::source::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Replays the JPEG stills of a local directory in file-name order.
///
/// Frames are decoded in memory; timestamps are spaced at `1 / fps`.
pub struct JpegDirSource {
    dir: PathBuf,
    fps: u32,
    files: Vec<PathBuf>,
    next_index: usize,
    frames_captured: u64,
    paced: bool,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

impl JpegDirSource {
    pub fn new(dir: impl AsRef<Path>, fps: u32) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            fps,
            files: Vec::new(),
            next_index: 0,
            frames_captured: 0,
            paced: false,
            connected_at: None,
            last_error: None,
        }
    }

    /// Sleep between frames so they arrive at `fps`.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    fn list_jpegs(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl FrameSource for JpegDirSource {
    fn connect(&mut self) -> Result<()> {
        if self.connected_at.is_some() || self.next_index > 0 {
            return Err(anyhow!(
                "jpeg directory source {} cannot be restarted",
                self.dir.display()
            ));
        }
        let files = Self::list_jpegs(&self.dir)?;
        if files.is_empty() {
            return Err(anyhow!("no JPEG files in {}", self.dir.display()));
        }
        log::info!(
            "JpegDirSource: {} frames from {}",
            files.len(),
            self.dir.display()
        );
        self.files = files;
        self.connected_at = Some(Instant::now());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.connected_at.is_none() {
            return Err(anyhow!("jpeg directory source not connected; call connect() first"));
        }
        let Some(path) = self.files.get(self.next_index).cloned() else {
            return Ok(None);
        };
        let interval = frame_interval(self.fps);
        if self.paced && self.next_index > 0 {
            std::thread::sleep(interval);
        }
        let timestamp = frame_timestamp(self.fps, self.next_index as u64);
        self.next_index += 1;

        let image = match image::open(&path) {
            Ok(image) => image,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(anyhow!("decode {}: {}", path.display(), err));
            }
        };
        self.last_error = None;
        self.frames_captured += 1;
        Ok(Some(Frame::from_rgb_image(image.into_rgb8(), timestamp)))
    }

    fn disconnect(&mut self) {
        self.files.clear();
    }

    fn is_healthy(&self) -> bool {
        self.connected_at.is_some() && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            source: self.dir.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_jpeg(dir: &Path, name: &str, shade: u8) {
        let image = image::RgbImage::from_pixel(8, 6, image::Rgb([shade, shade, shade]));
        image.save(dir.join(name)).expect("write jpeg");
    }

    #[test]
    fn replays_directory_in_name_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_jpeg(dir.path(), "b.jpg", 200);
        write_jpeg(dir.path(), "a.jpeg", 10);
        std::fs::write(dir.path().join("notes.txt"), "ignored")?;

        let mut source = JpegDirSource::new(dir.path(), 10);
        source.connect()?;
        let first = source.next_frame()?.expect("first frame");
        let second = source.next_frame()?.expect("second frame");
        assert!(source.next_frame()?.is_none());

        assert_eq!((first.width, first.height), (8, 6));
        assert!(first.view().luma_at(0, 0).unwrap() < 50);
        assert_eq!(second.timestamp, Duration::from_millis(100));
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn empty_directory_fails_to_connect() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = JpegDirSource::new(dir.path(), 10);
        assert!(source.connect().is_err());
        Ok(())
    }

    #[test]
    fn corrupt_file_is_an_error_and_stream_continues() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.jpg"), b"garbage")?;
        write_jpeg(dir.path(), "b.jpg", 120);
        let mut source = JpegDirSource::new(dir.path(), 10);
        source.connect()?;
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        assert!(source.next_frame()?.is_some());
        assert!(source.is_healthy());
        Ok(())
    }
}
