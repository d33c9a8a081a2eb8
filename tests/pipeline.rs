use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::timeout;
use tokio_stream::StreamExt;

use screenveil::detector::mock::{MockDetector, ScriptedRegion};
use screenveil::detector::{DetectorError, ObjectDetector, RawDetection, TileView};
use screenveil::{
    ActivityEvent, BoundingBox, CaptureSource, ClassThresholds, ContentMonitor, DetectionUpdate,
    InferenceEngine, SchedulerConfig, StabilizerConfig, SyntheticSurface, update_stream,
};

const WAIT: Duration = Duration::from_secs(5);

fn fast_scheduler() -> SchedulerConfig {
    SchedulerConfig {
        target_fps: 30.0,
        initial_interval: Duration::from_millis(10),
        min_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(50),
        interval_step: Duration::from_millis(5),
        shutdown_grace: Duration::from_secs(1),
    }
}

fn start_monitor(
    surface: Arc<SyntheticSurface>,
    detector: Box<dyn ObjectDetector>,
) -> (
    screenveil::MonitorHandle,
    screenveil::monitor::UpdateStream,
    tokio::task::JoinHandle<()>,
) {
    let engine = InferenceEngine::new(detector, ClassThresholds::default());
    let (monitor, update_rx) = ContentMonitor::new(
        surface as Arc<dyn CaptureSource>,
        engine,
        fast_scheduler(),
        StabilizerConfig::default(),
    );
    let handle = monitor.handle();
    let task = tokio::spawn(monitor.run());
    (handle, update_stream(update_rx), task)
}

async fn next_update(updates: &mut screenveil::monitor::UpdateStream) -> DetectionUpdate {
    timeout(WAIT, updates.next())
        .await
        .expect("timed out waiting for update")
        .expect("update channel closed")
}

#[tokio::test(flavor = "multi_thread")]
async fn scripted_region_survives_the_full_pipeline() {
    let surface = Arc::new(SyntheticSurface::new(1920.0, 1080.0, 4000.0));
    let detector = MockDetector::with_regions(vec![ScriptedRegion::new(
        BoundingBox::new(700.0, 100.0, 780.0, 200.0),
        "weapons",
        0.6,
    )]);
    let (handle, mut updates, task) = start_monitor(surface, Box::new(detector));

    let update = next_update(&mut updates).await;
    assert_eq!(update.detections.len(), 1);
    let detection = &update.detections[0];
    assert_eq!(detection.class, "weapons");
    assert!((detection.confidence - 0.6).abs() < 1e-6);
    let bounds = detection.bounds;
    assert!((bounds.x1 - 700.0).abs() < 1e-3);
    assert!((bounds.y1 - 100.0).abs() < 1e-3);
    assert!((bounds.x2 - 780.0).abs() < 1e-3);
    assert!((bounds.y2 - 200.0).abs() < 1e-3);
    assert!(update.frame.is_some());

    handle.stop();
    let _ = timeout(WAIT, task).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn published_coordinates_are_viewport_relative_after_scrolling() {
    let surface = Arc::new(SyntheticSurface::new(1920.0, 1080.0, 4000.0));
    surface.set_scroll(0.0, 100.0);
    let detector = MockDetector::with_regions(vec![ScriptedRegion::new(
        BoundingBox::new(700.0, 100.0, 780.0, 200.0),
        "weapons",
        0.6,
    )]);
    let (handle, mut updates, task) = start_monitor(surface, Box::new(detector));

    let update = next_update(&mut updates).await;
    assert_eq!(update.viewport.scroll_y, 100.0);
    assert_eq!(update.detections.len(), 1);
    let bounds = update.detections[0].bounds;
    assert!((bounds.x1 - 700.0).abs() < 1e-3);
    assert!((bounds.y1 - 0.0).abs() < 1e-3);
    assert!((bounds.y2 - 100.0).abs() < 1e-3);

    handle.stop();
    let _ = timeout(WAIT, task).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn clean_frames_still_publish_empty_sets() {
    let surface = Arc::new(SyntheticSurface::new(640.0, 480.0, 2048.0));
    let detector = MockDetector::with_regions(Vec::new());
    let (handle, mut updates, task) = start_monitor(surface, Box::new(detector));

    let update = next_update(&mut updates).await;
    assert!(update.detections.is_empty());
    assert!(update.frame.is_some());

    handle.stop();
    let _ = timeout(WAIT, task).await;
}

struct CountingDetector {
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    latency: Duration,
}

impl ObjectDetector for CountingDetector {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn detect(&self, _tile: &TileView<'_>) -> Result<Vec<RawDetection>, DetectorError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.latency);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_inference_never_overlaps_cycles() {
    let surface = Arc::new(SyntheticSurface::new(1920.0, 1080.0, 4000.0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let detector = CountingDetector {
        active: Arc::new(AtomicUsize::new(0)),
        max_active: Arc::clone(&max_active),
        latency: Duration::from_millis(30),
    };
    let (handle, mut updates, task) = start_monitor(surface, Box::new(detector));

    // Cycles take ~90 ms against a 10 ms interval, so ticks pile up while
    // the worker is busy.
    for _ in 0..5 {
        let _ = next_update(&mut updates).await;
    }
    assert_eq!(max_active.load(Ordering::SeqCst), 1);

    handle.stop();
    let _ = timeout(WAIT, task).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn raising_a_threshold_suppresses_live_detections() {
    let surface = Arc::new(SyntheticSurface::new(1920.0, 1080.0, 4000.0));
    let detector = MockDetector::with_regions(vec![ScriptedRegion::new(
        BoundingBox::new(700.0, 100.0, 780.0, 200.0),
        "weapons",
        0.6,
    )]);
    let (handle, mut updates, task) = start_monitor(surface, Box::new(detector));

    let first = next_update(&mut updates).await;
    assert_eq!(first.detections.len(), 1);

    handle.set_threshold("weapons", 0.95);
    handle.notify_activity(ActivityEvent::Scroll);

    // An in-flight cycle may still carry the old detection; the set must
    // drain within a few cycles once the threshold change lands.
    let mut cleared = false;
    for _ in 0..20 {
        let update = next_update(&mut updates).await;
        if update.detections.is_empty() {
            cleared = true;
            break;
        }
    }
    assert!(cleared, "detections never cleared after raising the threshold");

    handle.stop();
    let _ = timeout(WAIT, task).await;
}
