use std::time::Duration;

use crate::detector::{DetectorError, ObjectDetector, RawDetection, TileView};
use crate::geometry::{BoundingBox, content_to_frame, frame_to_tile};

/// A region the mock detector reports whenever it becomes visible, placed in
/// content-absolute coordinates so it tracks scrolling the way real page
/// content does.
#[derive(Debug, Clone)]
pub struct ScriptedRegion {
    pub bounds: BoundingBox,
    pub class: String,
    pub confidence: f32,
}

impl ScriptedRegion {
    pub fn new(bounds: BoundingBox, class: impl Into<String>, confidence: f32) -> Self {
        Self {
            bounds,
            class: class.into(),
            confidence,
        }
    }
}

/// Deterministic detector backend for tests and the default binary run.
/// Reports the portion of each scripted region that falls inside the tile,
/// optionally sleeping to emulate inference latency.
#[derive(Debug, Clone)]
pub struct MockDetector {
    regions: Vec<ScriptedRegion>,
    latency: Option<Duration>,
}

impl Default for MockDetector {
    fn default() -> Self {
        Self::with_regions(vec![
            ScriptedRegion::new(BoundingBox::new(420.0, 300.0, 560.0, 420.0), "weapons", 0.72),
            ScriptedRegion::new(BoundingBox::new(80.0, 900.0, 320.0, 1060.0), "gore", 0.41),
        ])
    }
}

impl MockDetector {
    pub fn with_regions(regions: Vec<ScriptedRegion>) -> Self {
        Self {
            regions,
            latency: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

impl ObjectDetector for MockDetector {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn detect(&self, tile: &TileView<'_>) -> Result<Vec<RawDetection>, DetectorError> {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }

        let capture = tile.frame().viewport();
        let rect = tile.rect();
        let tile_frame_box = BoundingBox::new(
            rect.x as f32,
            rect.y as f32,
            (rect.x + rect.width) as f32,
            (rect.y + rect.height) as f32,
        );

        let mut detections = Vec::new();
        for region in &self.regions {
            let frame_box = content_to_frame(region.bounds, &capture);
            if frame_box.intersection_area(&tile_frame_box) <= 0.0 {
                continue;
            }
            let visible = BoundingBox::new(
                frame_box.x1.max(tile_frame_box.x1),
                frame_box.y1.max(tile_frame_box.y1),
                frame_box.x2.min(tile_frame_box.x2),
                frame_box.y2.min(tile_frame_box.y2),
            );
            let local = frame_to_tile(visible, &rect);
            detections.push(RawDetection {
                x1: local.x1,
                y1: local.y1,
                x2: local.x2,
                y2: local.y2,
                class: region.class.clone(),
                confidence: region.confidence,
            });
        }
        Ok(detections)
    }
}
