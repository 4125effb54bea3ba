use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::{FrameView, PixelFormat};

/// Columns darker than this fraction of the frame's mean luma belong to a candidate.
const DARK_RATIO: f32 = 0.6;
/// Candidates narrower than this fraction of the frame width are ignored.
const MIN_WIDTH_FRACTION: f32 = 0.05;
/// Sampling grid resolution along each axis.
const GRID: u32 = 96;

/// Built-in door heuristic used when no model artifact is configured.
///
/// Looks for tall, dark vertical bands against a brighter background, which is
/// how an open doorway reads in a grayscale column profile. Confidence is the
/// band's contrast against the frame mean.
#[derive(Default)]
pub struct CpuBackend {
    frames_seen: u64,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn supports(&self, _format: PixelFormat) -> bool {
        true
    }

    fn detect(&mut self, frame: FrameView<'_>) -> Result<Vec<RawDetection>> {
        self.frames_seen += 1;
        let (width, height) = (frame.width(), frame.height());
        let step_x = (width / GRID).max(1);
        let step_y = (height / GRID).max(1);
        let xs: Vec<u32> = (0..width).step_by(step_x as usize).collect();
        let ys: Vec<u32> = (0..height).step_by(step_y as usize).collect();

        let column_luma: Vec<f32> = xs
            .iter()
            .map(|&x| mean(ys.iter().filter_map(|&y| frame.luma_at(x, y))))
            .collect();
        let frame_mean = mean(column_luma.iter().map(|&v| v as u8));
        if frame_mean < 1.0 {
            return Ok(Vec::new());
        }

        let cutoff = frame_mean * DARK_RATIO;
        let mut detections = Vec::new();
        let mut run_start: Option<usize> = None;
        for i in 0..=column_luma.len() {
            let dark = column_luma.get(i).is_some_and(|&v| v < cutoff);
            match (dark, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    run_start = None;
                    let x0 = xs[start];
                    let x1 = xs.get(i).copied().unwrap_or(width);
                    if ((x1 - x0) as f32) < width as f32 * MIN_WIDTH_FRACTION {
                        continue;
                    }
                    if let Some(det) =
                        band_detection(&frame, &xs[start..i], &ys, x0, x1, cutoff, frame_mean)
                    {
                        detections.push(det);
                    }
                }
                _ => {}
            }
        }

        if !detections.is_empty() {
            log::trace!(
                "cpu backend: {} candidate(s) in frame #{}",
                detections.len(),
                self.frames_seen
            );
        }
        Ok(detections)
    }
}

fn band_detection(
    frame: &FrameView<'_>,
    band_xs: &[u32],
    ys: &[u32],
    x0: u32,
    x1: u32,
    cutoff: f32,
    frame_mean: f32,
) -> Option<RawDetection> {
    let dark_rows: Vec<(u32, f32)> = ys
        .iter()
        .map(|&y| (y, mean(band_xs.iter().filter_map(|&x| frame.luma_at(x, y)))))
        .filter(|&(_, luma)| luma < cutoff)
        .collect();
    let top = dark_rows.first()?.0;
    let bottom = dark_rows.last()?.0.saturating_add(1).min(frame.height());
    let band_mean = dark_rows.iter().map(|&(_, l)| l).sum::<f32>() / dark_rows.len() as f32;

    let (w, h) = (frame.width() as f32, frame.height() as f32);
    let bbox = BoundingBox::new(
        x0 as f32 / w,
        1.0 - bottom as f32 / h,
        (x1 - x0) as f32 / w,
        (bottom - top) as f32 / h,
    );
    let confidence = ((frame_mean - band_mean) / frame_mean).clamp(0.0, 1.0);
    Some(RawDetection::new(bbox, confidence).with_label("door"))
}

fn mean(values: impl Iterator<Item = u8>) -> f32 {
    let (sum, count) = values.fold((0u64, 0u64), |(s, c), v| (s + v as u64, c + 1));
    if count == 0 {
        0.0
    } else {
        sum as f32 / count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use std::time::Duration;

    fn frame_with_band(width: u32, height: u32, band: std::ops::Range<u32>, rows: std::ops::Range<u32>) -> Frame {
        let mut data = vec![200u8; (width * height) as usize];
        for y in rows {
            for x in band.clone() {
                data[(y * width + x) as usize] = 20;
            }
        }
        Frame::new(data, width, height, PixelFormat::Luma8, Duration::ZERO)
    }

    #[test]
    fn uniform_frame_has_no_detections() {
        let frame = Frame::new(vec![128u8; 64 * 48], 64, 48, PixelFormat::Luma8, Duration::ZERO);
        let mut backend = CpuBackend::new();
        assert!(backend.detect(frame.view()).unwrap().is_empty());
    }

    #[test]
    fn finds_dark_vertical_band() {
        let frame = frame_with_band(100, 80, 40..60, 20..80);
        let mut backend = CpuBackend::new();
        let detections = backend.detect(frame.view()).unwrap();
        assert_eq!(detections.len(), 1);

        let det = &detections[0];
        assert_eq!(det.label.as_deref(), Some("door"));
        assert!((det.bbox.x - 0.40).abs() < 0.02);
        assert!((det.bbox.width - 0.20).abs() < 0.02);
        // Band touches the bottom edge, so its lower-left y is 0.
        assert!(det.bbox.y.abs() < 0.02);
        assert!((det.bbox.max_y() - 0.75).abs() < 0.02);
        assert!(det.confidence > 0.5);
    }

    #[test]
    fn ignores_thin_lines() {
        let frame = frame_with_band(100, 80, 50..51, 0..80);
        let mut backend = CpuBackend::new();
        assert!(backend.detect(frame.view()).unwrap().is_empty());
    }

    #[test]
    fn black_frame_has_no_detections() {
        let frame = Frame::new(vec![0u8; 32 * 32 * 3], 32, 32, PixelFormat::Rgb8, Duration::ZERO);
        let mut backend = CpuBackend::new();
        assert!(backend.detect(frame.view()).unwrap().is_empty());
    }
}
