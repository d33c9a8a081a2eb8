use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::core::{BYTES_PER_PIXEL, Frame, PipelineError, PipelineResult, ViewportState};

/// The capture collaborator: hands the scheduler the current surface state
/// on demand. Capture is a plain synchronous call; the scheduler decides
/// when to invoke it and runs it off the control task.
pub trait CaptureSource: Send + Sync {
    /// Grab the currently visible portion of the surface together with the
    /// viewport metadata at this instant.
    fn capture(&self) -> PipelineResult<Frame>;

    /// Fresh viewport reading, used at publish time when scrolling may have
    /// happened during inference.
    fn viewport(&self) -> ViewportState;

    fn is_visible(&self) -> bool {
        true
    }
}

/// Deterministic scrollable surface for tests and the mock pipeline run.
/// Pixel values derive from content-absolute coordinates, so scrolling
/// shifts the captured image the way a real page does.
pub struct SyntheticSurface {
    content_height: f32,
    viewport: Mutex<ViewportState>,
    visible: AtomicBool,
    fail_capture: AtomicBool,
    epoch: Instant,
}

impl SyntheticSurface {
    pub fn new(viewport_width: f32, viewport_height: f32, content_height: f32) -> Self {
        Self {
            content_height,
            viewport: Mutex::new(ViewportState::new(0.0, 0.0, viewport_width, viewport_height)),
            visible: AtomicBool::new(true),
            fail_capture: AtomicBool::new(false),
            epoch: Instant::now(),
        }
    }

    pub fn set_scroll(&self, x: f32, y: f32) {
        let mut viewport = self.viewport.lock().expect("viewport state poisoned");
        let max_y = (self.content_height - viewport.height).max(0.0);
        viewport.scroll_x = x.max(0.0);
        viewport.scroll_y = y.clamp(0.0, max_y);
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    pub fn fail_next_captures(&self, fail: bool) {
        self.fail_capture.store(fail, Ordering::SeqCst);
    }
}

impl CaptureSource for SyntheticSurface {
    fn capture(&self) -> PipelineResult<Frame> {
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(PipelineError::capture("surface buffer unavailable"));
        }

        let viewport = self.viewport();
        let width = viewport.width as u32;
        let height = viewport.height as u32;
        let stride = width as usize * BYTES_PER_PIXEL;

        let mut data = vec![0u8; stride * height as usize];
        for row in 0..height {
            let content_y = viewport.scroll_y as u32 + row;
            let offset = row as usize * stride;
            for col in 0..width {
                let content_x = viewport.scroll_x as u32 + col;
                let value = ((content_x + content_y) % 256) as u8;
                let pixel = offset + col as usize * BYTES_PER_PIXEL;
                data[pixel] = value;
                data[pixel + 1] = value;
                data[pixel + 2] = value;
                data[pixel + 3] = 255;
            }
        }

        Frame::from_owned(
            width,
            height,
            stride,
            Some(self.epoch.elapsed()),
            viewport,
            data,
        )
    }

    fn viewport(&self) -> ViewportState {
        *self.viewport.lock().expect("viewport state poisoned")
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captured_pixels_follow_scroll_offset() {
        let surface = SyntheticSurface::new(64.0, 48.0, 1024.0);
        let before = surface.capture().unwrap();
        surface.set_scroll(0.0, 100.0);
        let after = surface.capture().unwrap();

        assert_eq!(before.data()[0], 0);
        assert_eq!(after.data()[0], 100);
        assert_eq!(after.viewport().scroll_y, 100.0);
    }

    #[test]
    fn scroll_clamps_to_content_extent() {
        let surface = SyntheticSurface::new(64.0, 48.0, 100.0);
        surface.set_scroll(0.0, 500.0);
        assert_eq!(surface.viewport().scroll_y, 52.0);
    }

    #[test]
    fn capture_failure_is_reported() {
        let surface = SyntheticSurface::new(64.0, 48.0, 1024.0);
        surface.fail_next_captures(true);
        assert!(matches!(
            surface.capture(),
            Err(PipelineError::Capture { .. })
        ));
        surface.fail_next_captures(false);
        assert!(surface.capture().is_ok());
    }
}
