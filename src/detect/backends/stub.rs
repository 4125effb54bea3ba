use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::detect::backend::DetectorBackend;
use crate::detect::engine::ModelLoadError;
use crate::detect::result::RawDetection;
use crate::frame::{FrameView, PixelFormat};

/// Fixture-driven backend for tests and demos.
///
/// Returns the same scripted detections for every frame. The fixture plays the
/// role of a model artifact: a missing or malformed file fails construction.
pub struct StubBackend {
    detections: Vec<RawDetection>,
    calls: u64,
}

#[derive(Debug, Deserialize)]
struct StubFixture {
    #[serde(default)]
    label: Option<String>,
    detections: Vec<RawDetection>,
}

impl StubBackend {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            calls: 0,
        }
    }

    /// Load a JSON fixture: `{"label": "door", "detections": [{x, y, width, height, confidence}]}`.
    pub fn from_path(path: &Path) -> Result<Self, ModelLoadError> {
        if !path.exists() {
            return Err(ModelLoadError::Missing {
                path: path.to_path_buf(),
            });
        }
        Self::read_fixture(path).map_err(|source| ModelLoadError::Unloadable {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read_fixture(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).context("read stub fixture")?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let fixture: StubFixture = serde_json::from_str(raw).context("parse stub fixture")?;
        let detections = fixture
            .detections
            .into_iter()
            .map(|mut d| {
                if d.label.is_none() {
                    d.label = fixture.label.clone();
                }
                d
            })
            .collect();
        Ok(Self::new(detections))
    }

    /// Number of frames this backend has seen.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, _format: PixelFormat) -> bool {
        true
    }

    fn detect(&mut self, _frame: FrameView<'_>) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        Ok(self.detections.clone())
    }
}
