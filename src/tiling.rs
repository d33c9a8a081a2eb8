use std::collections::HashMap;

use crate::core::{Detection, DetectionSet, Frame};
use crate::detector::{ObjectDetector, TileView, sanitize_raw};
use crate::geometry::{BoundingBox, TileRect, tile_to_frame};
use crate::thresholds::{ClassThresholds, DEFAULT_CLASS_THRESHOLD};

#[derive(Debug, Clone, Copy)]
pub struct TilingConfig {
    /// Largest tile edge the detector accepts.
    pub max_tile: u32,
    /// Smallest tile edge worth running inference on.
    pub min_tile: u32,
    /// Required multiple for the detector input edge.
    pub stride: u32,
    /// Frames with fewer pixels than this produce an empty set.
    pub min_frame_pixels: u64,
    /// Same-class boxes at or above this overlap are treated as one
    /// tile-seam double-detection.
    pub dedup_iou: f32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            max_tile: 640,
            min_tile: 320,
            stride: 32,
            min_frame_pixels: 10_000,
            dedup_iou: 0.85,
        }
    }
}

/// Non-overlapping tile grid covering the frame exactly. The tile edge is
/// derived from the frame size, rounded up to the detector stride, and
/// clamped to the detector's input range; edge tiles absorb the remainder.
pub fn plan_tiles(width: u32, height: u32, config: &TilingConfig) -> Vec<TileRect> {
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let base = width.min(height) / 2;
    let base = base.clamp(config.min_tile, config.max_tile);
    let edge = base.div_ceil(config.stride) * config.stride;
    let edge = edge.clamp(config.stride, config.max_tile);

    let cols = (width / edge).max(1);
    let rows = (height / edge).max(1);

    let mut tiles = Vec::with_capacity((rows * cols) as usize);
    for row in 0..rows {
        let y1 = boundary(row, height, rows);
        let y2 = boundary(row + 1, height, rows);
        for col in 0..cols {
            let x1 = boundary(col, width, cols);
            let x2 = boundary(col + 1, width, cols);
            tiles.push(TileRect::new(x1, y1, x2 - x1, y2 - y1));
        }
    }
    tiles
}

fn boundary(index: u32, extent: u32, count: u32) -> u32 {
    ((index as u64 * extent as u64) / count as u64) as u32
}

/// Runs the detector over a tiled frame, filters by per-class confidence
/// thresholds, deduplicates tile-seam double-detections, and reassembles
/// frame-absolute detections.
pub struct InferenceEngine {
    detector: Box<dyn ObjectDetector>,
    thresholds: ClassThresholds,
    config: TilingConfig,
}

impl InferenceEngine {
    pub fn new(detector: Box<dyn ObjectDetector>, thresholds: ClassThresholds) -> Self {
        Self::with_tiling(detector, thresholds, TilingConfig::default())
    }

    pub fn with_tiling(
        detector: Box<dyn ObjectDetector>,
        thresholds: ClassThresholds,
        config: TilingConfig,
    ) -> Self {
        Self {
            detector,
            thresholds,
            config,
        }
    }

    pub fn thresholds(&self) -> ClassThresholds {
        self.thresholds.clone()
    }

    pub fn infer(&self, frame: &Frame) -> DetectionSet {
        if frame.pixel_count() < self.config.min_frame_pixels {
            return Vec::new();
        }

        let thresholds = self.thresholds.snapshot();
        let mut kept: DetectionSet = Vec::new();

        for rect in plan_tiles(frame.width(), frame.height(), &self.config) {
            let tile = TileView::new(frame, rect);
            let raw = match self.detector.detect(&tile) {
                Ok(raw) => raw,
                Err(err) => {
                    eprintln!(
                        "tile inference failed at ({}, {}): {err}",
                        rect.x, rect.y
                    );
                    continue;
                }
            };

            for detection in raw {
                let Some(detection) =
                    sanitize_raw(detection, rect.width as f32, rect.height as f32)
                else {
                    continue;
                };
                if detection.confidence <= minimum_confidence(&thresholds, &detection.class) {
                    continue;
                }
                let bounds = tile_to_frame(
                    BoundingBox::new(detection.x1, detection.y1, detection.x2, detection.y2),
                    &rect,
                );
                if self.is_duplicate(&kept, &detection.class, &bounds) {
                    continue;
                }
                kept.push(Detection {
                    bounds,
                    class: detection.class,
                    confidence: detection.confidence,
                    timestamp: frame.timestamp(),
                });
            }
        }

        kept
    }

    // Accept-first: a later seam duplicate is discarded in favor of the box
    // already kept.
    fn is_duplicate(&self, kept: &DetectionSet, class: &str, bounds: &BoundingBox) -> bool {
        kept.iter()
            .any(|existing| existing.class == class && existing.bounds.iou(bounds) >= self.config.dedup_iou)
    }
}

fn minimum_confidence(thresholds: &HashMap<String, f32>, class: &str) -> f32 {
    thresholds
        .get(class)
        .copied()
        .unwrap_or(DEFAULT_CLASS_THRESHOLD)
}
