use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::core::{BYTES_PER_PIXEL, Frame};
use crate::geometry::TileRect;

#[cfg(feature = "detector-mock")]
pub mod mock;

#[cfg(feature = "detector-onnx")]
pub mod onnx;

/// Class labels of the bundled content-safety model, in output order.
pub const DEFAULT_CLASS_NAMES: &[&str] = &["violence", "adult", "weapons", "drugs", "gore"];

/// A borrowed rectangular region of a captured frame, handed to the detector
/// for one inference call.
pub struct TileView<'a> {
    frame: &'a Frame,
    rect: TileRect,
}

impl<'a> TileView<'a> {
    pub fn new(frame: &'a Frame, rect: TileRect) -> Self {
        Self { frame, rect }
    }

    pub fn frame(&self) -> &Frame {
        self.frame
    }

    pub fn rect(&self) -> TileRect {
        self.rect
    }

    pub fn width(&self) -> u32 {
        self.rect.width
    }

    pub fn height(&self) -> u32 {
        self.rect.height
    }

    /// One BGRA pixel row of the tile.
    pub fn row(&self, y: u32) -> &[u8] {
        let offset = (self.rect.y + y) as usize * self.frame.stride()
            + self.rect.x as usize * BYTES_PER_PIXEL;
        let len = self.rect.width as usize * BYTES_PER_PIXEL;
        &self.frame.data()[offset..offset + len]
    }
}

/// One raw detector result in tile-local coordinates, before validation and
/// threshold filtering.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class: String,
    pub confidence: f32,
}

/// Validation boundary for raw detector output. Non-finite coordinates and
/// out-of-range confidences drop the single offending record; boxes are
/// clamped to the tile and must keep positive extent.
pub(crate) fn sanitize_raw(raw: RawDetection, tile_width: f32, tile_height: f32) -> Option<RawDetection> {
    let coords = [raw.x1, raw.y1, raw.x2, raw.y2];
    if coords.iter().any(|value| !value.is_finite()) {
        return None;
    }
    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return None;
    }
    let clamped = RawDetection {
        x1: raw.x1.clamp(0.0, tile_width),
        y1: raw.y1.clamp(0.0, tile_height),
        x2: raw.x2.clamp(0.0, tile_width),
        y2: raw.y2.clamp(0.0, tile_height),
        ..raw
    };
    (clamped.x2 > clamped.x1 && clamped.y2 > clamped.y1).then_some(clamped)
}

/// Pre-trained object detector, treated as a black box returning
/// (box, class, confidence) tuples for a tile.
pub trait ObjectDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-time startup check. Failure here is the only fatal condition in
    /// the pipeline.
    fn warm_up(&self) -> Result<(), DetectorError> {
        Ok(())
    }

    fn detect(&self, tile: &TileView<'_>) -> Result<Vec<RawDetection>, DetectorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Mock,
    Onnx,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Mock => "mock",
            DetectorKind::Onnx => "onnx",
        }
    }
}

impl FromStr for DetectorKind {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(DetectorKind::Mock),
            "onnx" => Ok(DetectorKind::Onnx),
            other => Err(DetectorError::UnknownKind {
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub model_path: Option<PathBuf>,
    pub class_names: Vec<String>,
    pub input_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            input_size: 640,
        }
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector backend {backend} is not supported in this build")]
    Unsupported { backend: &'static str },

    #[error("unknown detector backend '{name}'")]
    UnknownKind { name: String },

    #[error("model file not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("no model path configured; provide --model or set `model` in the configuration file")]
    MissingModelPath,

    #[error("failed to initialize onnx runtime environment: {0}")]
    Environment(String),

    #[error("failed to create inference session: {0}")]
    Session(String),

    #[error("failed to prepare model input: {0}")]
    Input(String),

    #[error("model inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output shape")]
    InvalidOutputShape,
}

pub fn build_detector(
    kind: DetectorKind,
    config: DetectorConfig,
) -> Result<Box<dyn ObjectDetector>, DetectorError> {
    match kind {
        DetectorKind::Mock => {
            #[cfg(feature = "detector-mock")]
            {
                let _ = config;
                Ok(Box::new(mock::MockDetector::default()))
            }
            #[cfg(not(feature = "detector-mock"))]
            {
                let _ = config;
                Err(DetectorError::Unsupported { backend: "mock" })
            }
        }
        DetectorKind::Onnx => {
            #[cfg(feature = "detector-onnx")]
            {
                Ok(Box::new(onnx::OnnxDetector::new(config)?))
            }
            #[cfg(not(feature = "detector-onnx"))]
            {
                let _ = config;
                Err(DetectorError::Unsupported { backend: "onnx" })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> RawDetection {
        RawDetection {
            x1,
            y1,
            x2,
            y2,
            class: "weapons".to_string(),
            confidence,
        }
    }

    #[test]
    fn sanitize_drops_non_finite_coordinates() {
        assert!(sanitize_raw(raw(f32::NAN, 0.0, 10.0, 10.0, 0.5), 100.0, 100.0).is_none());
        assert!(sanitize_raw(raw(0.0, 0.0, f32::INFINITY, 10.0, 0.5), 100.0, 100.0).is_none());
    }

    #[test]
    fn sanitize_drops_out_of_range_confidence() {
        assert!(sanitize_raw(raw(0.0, 0.0, 10.0, 10.0, 1.2), 100.0, 100.0).is_none());
        assert!(sanitize_raw(raw(0.0, 0.0, 10.0, 10.0, -0.1), 100.0, 100.0).is_none());
    }

    #[test]
    fn sanitize_clamps_to_tile_bounds() {
        let kept = sanitize_raw(raw(-5.0, 10.0, 120.0, 60.0, 0.7), 100.0, 100.0).unwrap();
        assert_eq!(kept.x1, 0.0);
        assert_eq!(kept.x2, 100.0);
        assert_eq!(kept.y1, 10.0);
        assert_eq!(kept.y2, 60.0);
    }

    #[test]
    fn sanitize_drops_boxes_fully_outside_tile() {
        assert!(sanitize_raw(raw(120.0, 10.0, 140.0, 60.0, 0.7), 100.0, 100.0).is_none());
    }

    #[test]
    fn detector_kind_parses() {
        assert_eq!(DetectorKind::from_str("mock").unwrap(), DetectorKind::Mock);
        assert_eq!(DetectorKind::from_str("ONNX").unwrap(), DetectorKind::Onnx);
        assert!(DetectorKind::from_str("frcnn").is_err());
    }
}
