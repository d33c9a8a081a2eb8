//! Adaptive screen-content sampling and restricted-content detection.
//!
//! A [`monitor::ContentMonitor`] drives the pipeline: it samples frames from
//! a [`capture::CaptureSource`] on an adaptive schedule, runs tiled object
//! detection through a [`tiling::InferenceEngine`], stabilizes results across
//! frames, and publishes viewport-relative detection sets on an async
//! channel. Detector backends are pluggable behind the
//! [`detector::ObjectDetector`] trait.

pub mod capture;
pub mod cli;
pub mod core;
pub mod detector;
pub mod geometry;
pub mod monitor;
pub mod settings;
pub mod stabilizer;
pub mod thresholds;
pub mod tiling;

pub use capture::{CaptureSource, SyntheticSurface};
pub use core::{Detection, DetectionSet, Frame, PipelineError, PipelineResult, ViewportState};
pub use detector::{DetectorConfig, DetectorError, DetectorKind, ObjectDetector, build_detector};
pub use geometry::{BoundingBox, TileRect};
pub use monitor::{
    ContentMonitor, DetectionUpdate, MonitorHandle, SchedulerConfig, update_stream,
};
pub use stabilizer::{ActivityEvent, DetectionStabilizer, StabilizerConfig};
pub use thresholds::ClassThresholds;
pub use tiling::{InferenceEngine, TilingConfig, plan_tiles};
