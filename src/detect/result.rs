use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

static NEXT_DETECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identifier assigned when a detection is created.
///
/// Never derived from model output; two detections from the same frame always
/// have different ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DetectionId(u64);

impl DetectionId {
    pub fn next() -> Self {
        Self(NEXT_DETECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Axis-aligned box in normalized unit coordinates, origin at the lower-left.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn min_x(&self) -> f32 {
        self.x
    }

    pub fn min_y(&self) -> f32 {
        self.y
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    /// Intersect with the unit square. Non-finite inputs collapse to an empty box.
    pub fn clamped(&self) -> Self {
        let finite = |v: f32| if v.is_finite() { v } else { 0.0 };
        let x0 = finite(self.x).clamp(0.0, 1.0);
        let y0 = finite(self.y).clamp(0.0, 1.0);
        let x1 = finite(self.max_x()).clamp(0.0, 1.0);
        let y1 = finite(self.max_y()).clamp(0.0, 1.0);
        Self {
            x: x0,
            y: y0,
            width: (x1 - x0).max(0.0),
            height: (y1 - y0).max(0.0),
        }
    }
}

/// Detection as produced by a backend, before filtering and id assignment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(flatten)]
    pub bbox: BoundingBox,
    pub confidence: f32,
    #[serde(default)]
    pub label: Option<String>,
}

impl RawDetection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// One recognized region.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub id: DetectionId,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub label: Option<String>,
}

impl Detection {
    pub(crate) fn from_raw(raw: RawDetection) -> Self {
        Self {
            id: DetectionId::next(),
            bbox: raw.bbox.clamped(),
            confidence: raw.confidence.clamp(0.0, 1.0),
            label: raw.label,
        }
    }
}

/// Detections valid as of one capture timestamp, in model output order.
///
/// A set is built once and never mutated afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionSet {
    timestamp: Duration,
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(timestamp: Duration, detections: Vec<Detection>) -> Self {
        Self {
            timestamp,
            detections,
        }
    }

    /// The empty set published when nothing is known.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}
