use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionSet};
use crate::frame::{Frame, FrameDefect};

/// Detections at or below this confidence never leave the engine.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.10;

/// Per-frame inference failure. Never fatal to the stream.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] FrameDefect),
    #[error("inference failed: {0:#}")]
    Internal(#[source] anyhow::Error),
    #[error("inference took {elapsed:?}, limit is {limit:?}")]
    Timeout { limit: Duration, elapsed: Duration },
}

/// Startup failure: the engine cannot exist without a usable model.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("model artifact {} not found", path.display())]
    Missing { path: PathBuf },
    #[error("failed to load model {}: {source:#}", path.display())]
    Unloadable {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("model format of {} is not supported in this build", path.display())]
    Unsupported { path: PathBuf },
    #[error("backend '{backend}' failed to warm up: {source:#}")]
    WarmUp {
        backend: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineSettings {
    /// Detections must score strictly above this value.
    pub confidence_threshold: f32,
    /// Calls running longer than this are reported as `Timeout` and discarded.
    pub timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            timeout: None,
        }
    }
}

/// Loaded detection model plus the output contract around it.
pub struct InferenceEngine {
    backend: Box<dyn DetectorBackend>,
    settings: EngineSettings,
}

impl InferenceEngine {
    pub fn new<B: DetectorBackend + 'static>(backend: B) -> Result<Self, ModelLoadError> {
        Self::with_settings(backend, EngineSettings::default())
    }

    pub fn with_settings<B: DetectorBackend + 'static>(
        backend: B,
        settings: EngineSettings,
    ) -> Result<Self, ModelLoadError> {
        let mut backend: Box<dyn DetectorBackend> = Box::new(backend);
        backend
            .warm_up()
            .map_err(|source| ModelLoadError::WarmUp {
                backend: backend.name(),
                source,
            })?;
        log::info!(
            "inference engine ready: backend={} threshold={:.2} timeout={:?}",
            backend.name(),
            settings.confidence_threshold,
            settings.timeout
        );
        Ok(Self { backend, settings })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Run the model on one frame.
    ///
    /// The frame is only borrowed for the duration of the call. Returned
    /// detections score above the threshold, keep the model's output order and
    /// carry fresh ids.
    pub fn detect(&mut self, frame: &Frame) -> Result<DetectionSet, InferenceError> {
        frame.check_layout()?;
        if !self.backend.supports(frame.format) {
            return Err(FrameDefect::UnsupportedFormat(frame.format).into());
        }

        let started = Instant::now();
        let raw = self
            .backend
            .detect(frame.view())
            .map_err(InferenceError::Internal)?;
        let elapsed = started.elapsed();
        if let Some(limit) = self.settings.timeout {
            if elapsed > limit {
                return Err(InferenceError::Timeout { limit, elapsed });
            }
        }

        let threshold = self.settings.confidence_threshold;
        let detections = raw
            .into_iter()
            .filter(|d| d.confidence > threshold)
            .map(Detection::from_raw)
            .collect();
        Ok(DetectionSet::new(frame.timestamp, detections))
    }
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("backend", &self.backend.name())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;
    use crate::detect::result::{BoundingBox, RawDetection};
    use crate::frame::{FrameView, PixelFormat};
    use anyhow::anyhow;

    fn frame(ts_ms: u64) -> Frame {
        Frame::new(
            vec![0u8; 4 * 4 * 3],
            4,
            4,
            PixelFormat::Rgb8,
            Duration::from_millis(ts_ms),
        )
    }

    fn raw(confidence: f32) -> RawDetection {
        RawDetection::new(BoundingBox::new(0.1, 0.1, 0.2, 0.2), confidence)
    }

    #[test]
    fn filters_sub_threshold_detections_in_order() {
        let backend = StubBackend::new(vec![raw(0.05), raw(0.15), raw(0.90)]);
        let mut engine = InferenceEngine::new(backend).unwrap();

        let set = engine.detect(&frame(40)).unwrap();
        let confidences: Vec<f32> = set.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.15, 0.90]);
        assert_eq!(set.timestamp(), Duration::from_millis(40));
        assert_ne!(set.detections()[0].id, set.detections()[1].id);
    }

    #[test]
    fn threshold_is_exclusive() {
        let backend = StubBackend::new(vec![raw(0.10), raw(0.1001)]);
        let mut engine = InferenceEngine::new(backend).unwrap();
        let set = engine.detect(&frame(0)).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn empty_buffer_is_invalid_frame() {
        let mut engine = InferenceEngine::new(StubBackend::new(vec![raw(0.9)])).unwrap();
        let empty = Frame::new(Vec::new(), 4, 4, PixelFormat::Rgb8, Duration::ZERO);
        assert!(matches!(
            engine.detect(&empty),
            Err(InferenceError::InvalidFrame(FrameDefect::Empty))
        ));
        assert!(engine.detect(&frame(100)).is_ok());
    }

    struct RgbOnly;

    impl DetectorBackend for RgbOnly {
        fn name(&self) -> &'static str {
            "rgb-only"
        }

        fn supports(&self, format: PixelFormat) -> bool {
            format == PixelFormat::Rgb8
        }

        fn detect(&mut self, _frame: FrameView<'_>) -> anyhow::Result<Vec<RawDetection>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn unsupported_format_is_invalid_frame() {
        let mut engine = InferenceEngine::new(RgbOnly).unwrap();
        let luma = Frame::new(vec![0u8; 16], 4, 4, PixelFormat::Luma8, Duration::ZERO);
        assert!(matches!(
            engine.detect(&luma),
            Err(InferenceError::InvalidFrame(FrameDefect::UnsupportedFormat(
                PixelFormat::Luma8
            )))
        ));
    }

    struct Failing;

    impl DetectorBackend for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn supports(&self, _format: PixelFormat) -> bool {
            true
        }

        fn detect(&mut self, _frame: FrameView<'_>) -> anyhow::Result<Vec<RawDetection>> {
            Err(anyhow!("tensor shape mismatch"))
        }
    }

    #[test]
    fn backend_failure_is_internal() {
        let mut engine = InferenceEngine::new(Failing).unwrap();
        let err = engine.detect(&frame(0)).unwrap_err();
        assert!(matches!(err, InferenceError::Internal(_)));
        assert!(err.to_string().contains("tensor shape mismatch"));
    }

    struct Slow;

    impl DetectorBackend for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn supports(&self, _format: PixelFormat) -> bool {
            true
        }

        fn detect(&mut self, _frame: FrameView<'_>) -> anyhow::Result<Vec<RawDetection>> {
            std::thread::sleep(Duration::from_millis(30));
            Ok(vec![raw(0.9)])
        }
    }

    #[test]
    fn overrun_is_reported_as_timeout() {
        let settings = EngineSettings {
            timeout: Some(Duration::from_millis(5)),
            ..EngineSettings::default()
        };
        let mut engine = InferenceEngine::with_settings(Slow, settings).unwrap();
        assert!(matches!(
            engine.detect(&frame(0)),
            Err(InferenceError::Timeout { .. })
        ));
    }

    struct ColdModel;

    impl DetectorBackend for ColdModel {
        fn name(&self) -> &'static str {
            "cold"
        }

        fn supports(&self, _format: PixelFormat) -> bool {
            true
        }

        fn detect(&mut self, _frame: FrameView<'_>) -> anyhow::Result<Vec<RawDetection>> {
            Ok(Vec::new())
        }

        fn warm_up(&mut self) -> anyhow::Result<()> {
            Err(anyhow!("weights missing"))
        }
    }

    #[test]
    fn warm_up_failure_blocks_construction() {
        assert!(matches!(
            InferenceEngine::new(ColdModel),
            Err(ModelLoadError::WarmUp {
                backend: "cold",
                ..
            })
        ));
    }
}
