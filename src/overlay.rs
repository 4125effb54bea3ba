//! Mapping of published detections into consumer view coordinates.
//!
//! Detection boxes are normalized with a lower-left origin; views are laid out
//! from the top-left, so the vertical axis is flipped.

use crate::detect::{BoundingBox, Detection, DetectionSet};

/// Vertical offset of the confidence label above its box, in view points.
pub const LABEL_OFFSET: f32 = 15.0;

/// Rectangle in view coordinates (origin top-left).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ViewRect {
    pub fn min_y(&self) -> f32 {
        self.y
    }

    pub fn mid_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    pub fn mid_y(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

/// One box plus its label, ready to draw.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayItem {
    pub rect: ViewRect,
    pub label: String,
    /// Centre of the label text.
    pub label_anchor: (f32, f32),
}

pub fn to_view_rect(bbox: &BoundingBox, view_width: f32, view_height: f32) -> ViewRect {
    ViewRect {
        x: bbox.x * view_width,
        y: (1.0 - bbox.max_y()) * view_height,
        width: bbox.width * view_width,
        height: bbox.height * view_height,
    }
}

/// `"87%"` for 0.87; the percentage is truncated, not rounded.
pub fn confidence_label(confidence: f32) -> String {
    format!("{}%", (confidence * 100.0) as i32)
}

pub fn label_anchor(rect: &ViewRect) -> (f32, f32) {
    (rect.mid_x(), rect.min_y() - LABEL_OFFSET)
}

pub fn overlay_item(detection: &Detection, view_width: f32, view_height: f32) -> OverlayItem {
    let rect = to_view_rect(&detection.bbox, view_width, view_height);
    OverlayItem {
        rect,
        label: confidence_label(detection.confidence),
        label_anchor: label_anchor(&rect),
    }
}

/// Overlay items for a whole set, in detection order.
pub fn layout(set: &DetectionSet, view_width: f32, view_height: f32) -> Vec<OverlayItem> {
    set.iter()
        .map(|d| overlay_item(d, view_width, view_height))
        .collect()
}
