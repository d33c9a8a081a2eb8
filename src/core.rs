use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::geometry::BoundingBox;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Bytes per pixel for captured surfaces (BGRA order).
pub const BYTES_PER_PIXEL: usize = 4;

/// Scroll offset, logical viewport size, and pixel-density scale of the
/// rendered surface at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewportState {
    pub scroll_x: f32,
    pub scroll_y: f32,
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            scroll_x: 0.0,
            scroll_y: 0.0,
            width: 0.0,
            height: 0.0,
            scale: 1.0,
        }
    }
}

impl ViewportState {
    pub fn new(scroll_x: f32, scroll_y: f32, width: f32, height: f32) -> Self {
        Self {
            scroll_x,
            scroll_y,
            width,
            height,
            scale: 1.0,
        }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }
}

/// An immutable captured image of the visible surface plus the viewport
/// metadata observed at capture time. Pixels are tightly packed BGRA rows
/// separated by `stride` bytes.
#[derive(Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    stride: usize,
    timestamp: Option<Duration>,
    viewport: ViewportState,
    data: Arc<[u8]>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("timestamp", &self.timestamp)
            .field("viewport", &self.viewport)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    pub fn from_owned(
        width: u32,
        height: u32,
        stride: usize,
        timestamp: Option<Duration>,
        viewport: ViewportState,
        data: Vec<u8>,
    ) -> PipelineResult<Self> {
        let row_bytes = (width as usize)
            .checked_mul(BYTES_PER_PIXEL)
            .ok_or_else(|| PipelineError::invalid_frame("row byte length overflowed"))?;
        if stride < row_bytes {
            return Err(PipelineError::invalid_frame(format!(
                "stride {} is smaller than row byte length {}",
                stride, row_bytes
            )));
        }
        let required = stride
            .checked_mul(height as usize)
            .ok_or_else(|| PipelineError::invalid_frame("frame byte length overflowed"))?;
        if data.len() < required {
            return Err(PipelineError::invalid_frame(format!(
                "insufficient frame bytes: got {} expected at least {}",
                data.len(),
                required
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            timestamp,
            viewport,
            data: Arc::from(data.into_boxed_slice()),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn viewport(&self) -> ViewportState {
        self.viewport
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// One detected region in some coordinate space, as produced by an inference
/// pass or a stabilizer update.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub bounds: BoundingBox,
    pub class: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Duration>,
}

/// The detections of one inference cycle. Semantically unordered; rendering
/// order is drawing order only.
pub type DetectionSet = Vec<Detection>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("capture backend {backend} is not supported in this build")]
    Unsupported { backend: &'static str },

    #[error("capture failed: {message}")]
    Capture { message: String },

    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("detector initialization failed: {0}")]
    DetectorInit(#[from] crate::detector::DetectorError),
}

impl PipelineError {
    pub fn unsupported(backend: &'static str) -> Self {
        Self::Unsupported { backend }
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_short_buffer() {
        let result = Frame::from_owned(
            4,
            4,
            16,
            None,
            ViewportState::default(),
            vec![0u8; 32],
        );
        assert!(matches!(result, Err(PipelineError::InvalidFrame { .. })));
    }

    #[test]
    fn frame_rejects_stride_below_row_bytes() {
        let result = Frame::from_owned(
            8,
            2,
            8,
            None,
            ViewportState::default(),
            vec![0u8; 64],
        );
        assert!(matches!(result, Err(PipelineError::InvalidFrame { .. })));
    }

    #[test]
    fn frame_accessors_work() {
        let viewport = ViewportState::new(10.0, 20.0, 4.0, 2.0);
        let frame = Frame::from_owned(
            4,
            2,
            16,
            Some(Duration::from_millis(5)),
            viewport,
            vec![0u8; 32],
        )
        .unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.stride(), 16);
        assert_eq!(frame.timestamp(), Some(Duration::from_millis(5)));
        assert_eq!(frame.viewport().scroll_x, 10.0);
        assert_eq!(frame.pixel_count(), 8);
    }
}
