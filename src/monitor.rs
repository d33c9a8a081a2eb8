use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_core::Stream;
use futures_util::stream::unfold;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, TryAcquireError, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::capture::CaptureSource;
use crate::core::{Detection, DetectionSet, Frame, ViewportState};
use crate::geometry::{clip_to_viewport, content_to_viewport, frame_to_content};
use crate::stabilizer::{ActivityEvent, DetectionStabilizer, StabilizerConfig};
use crate::thresholds::ClassThresholds;
use crate::tiling::InferenceEngine;

const TICK_PERIOD: Duration = Duration::from_millis(10);
const UPDATE_CHANNEL_CAPACITY: usize = 8;
const COMPLETION_CHANNEL_CAPACITY: usize = 4;
const ACTIVITY_CHANNEL_CAPACITY: usize = 32;

/// Sampling-loop tuning. The interval adapts between `min_interval` and
/// `max_interval` in `interval_step` increments depending on how observed
/// cycle throughput compares to `target_fps`.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub target_fps: f64,
    pub initial_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub interval_step: Duration,
    /// How long shutdown waits for an in-flight cycle before aborting it.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_fps: 10.0,
            initial_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(200),
            interval_step: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

/// One published pipeline result: the stabilized detection set in
/// viewport-relative coordinates, the source frame, and the viewport the
/// coordinates refer to. `frame` is `None` when the cycle's capture failed;
/// the empty set still publishes so consumers can clear their display.
#[derive(Debug, Clone)]
pub struct DetectionUpdate {
    pub detections: DetectionSet,
    pub frame: Option<Arc<Frame>>,
    pub viewport: ViewportState,
}

pub type UpdateStream = Pin<Box<dyn Stream<Item = DetectionUpdate> + Send>>;

pub fn update_stream(rx: mpsc::Receiver<DetectionUpdate>) -> UpdateStream {
    Box::pin(unfold(rx, |mut receiver| async {
        receiver.recv().await.map(|item| (item, receiver))
    }))
}

/// Clone-able control surface for a running monitor: live threshold
/// updates, user-activity events, and shutdown.
#[derive(Clone)]
pub struct MonitorHandle {
    thresholds: ClassThresholds,
    activity_tx: mpsc::Sender<ActivityEvent>,
    stop_tx: watch::Sender<bool>,
}

impl MonitorHandle {
    pub fn set_threshold(&self, class: &str, threshold: f32) {
        self.thresholds.set(class, threshold);
    }

    pub fn notify_activity(&self, event: ActivityEvent) {
        let _ = self.activity_tx.try_send(event);
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

struct CycleOutcome {
    frame: Option<Arc<Frame>>,
    detections: DetectionSet,
    elapsed: Duration,
}

/// Drives the sampling loop: periodic ticks decide when to start a
/// capture+inference cycle, at most one cycle runs at a time, and a burst of
/// ticks while busy coalesces into a single pending request.
pub struct ContentMonitor {
    core: MonitorCore,
    completion_rx: mpsc::Receiver<CycleOutcome>,
    activity_rx: mpsc::Receiver<ActivityEvent>,
    stop_rx: watch::Receiver<bool>,
    handle: MonitorHandle,
}

impl ContentMonitor {
    pub fn new(
        source: Arc<dyn CaptureSource>,
        engine: InferenceEngine,
        scheduler: SchedulerConfig,
        stabilizer: StabilizerConfig,
    ) -> (Self, mpsc::Receiver<DetectionUpdate>) {
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);
        let (activity_tx, activity_rx) = mpsc::channel(ACTIVITY_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let engine = Arc::new(engine);
        let handle = MonitorHandle {
            thresholds: engine.thresholds(),
            activity_tx,
            stop_tx,
        };

        let core = MonitorCore {
            source,
            engine,
            config: scheduler,
            stabilizer: DetectionStabilizer::new(stabilizer),
            inflight: Arc::new(Semaphore::new(1)),
            pending: None,
            last_cycle_start: None,
            interval: scheduler.initial_interval,
            avg_cycle: None,
            worker: None,
            completion_tx,
            update_tx,
        };

        (
            Self {
                core,
                completion_rx,
                activity_rx,
                stop_rx,
                handle,
            },
            update_rx,
        )
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    /// Runs the control loop until `MonitorHandle::stop` is observed. The
    /// control task never blocks on inference; it either dispatches a
    /// worker or skips the tick.
    pub async fn run(self) {
        let ContentMonitor {
            mut core,
            mut completion_rx,
            mut activity_rx,
            mut stop_rx,
            handle: _handle,
        } = self;

        let mut ticker = time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = stop_rx.changed() => {
                    if result.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                Some(event) = activity_rx.recv() => {
                    core.stabilizer.note_activity(event, Instant::now());
                }
                Some(outcome) = completion_rx.recv() => {
                    core.complete_cycle(outcome);
                }
                _ = ticker.tick() => {
                    core.tick();
                }
            }
        }

        core.shutdown().await;
    }
}

struct MonitorCore {
    source: Arc<dyn CaptureSource>,
    engine: Arc<InferenceEngine>,
    config: SchedulerConfig,
    stabilizer: DetectionStabilizer,
    inflight: Arc<Semaphore>,
    /// Single-slot pending request, most-recent-wins.
    pending: Option<Instant>,
    last_cycle_start: Option<Instant>,
    interval: Duration,
    avg_cycle: Option<Duration>,
    worker: Option<JoinHandle<()>>,
    completion_tx: mpsc::Sender<CycleOutcome>,
    update_tx: mpsc::Sender<DetectionUpdate>,
}

impl MonitorCore {
    fn tick(&mut self) {
        if !self.source.is_visible() {
            return;
        }
        let now = Instant::now();
        if let Some(last) = self.last_cycle_start {
            if now.duration_since(last) < self.interval {
                return;
            }
        }
        self.dispatch(now);
    }

    fn dispatch(&mut self, now: Instant) {
        match Arc::clone(&self.inflight).try_acquire_owned() {
            Ok(permit) => {
                self.last_cycle_start = Some(now);
                let source = Arc::clone(&self.source);
                let engine = Arc::clone(&self.engine);
                let completion_tx = self.completion_tx.clone();
                self.worker = Some(tokio::spawn(async move {
                    let started = Instant::now();
                    let outcome = match source.capture() {
                        Ok(frame) => {
                            let frame = Arc::new(frame);
                            let infer_frame = Arc::clone(&frame);
                            let infer_engine = Arc::clone(&engine);
                            let detections = match tokio::task::spawn_blocking(move || {
                                infer_engine.infer(&infer_frame)
                            })
                            .await
                            {
                                Ok(detections) => detections,
                                Err(err) => {
                                    eprintln!("inference worker failed: {err}");
                                    Vec::new()
                                }
                            };
                            CycleOutcome {
                                frame: Some(frame),
                                detections,
                                elapsed: started.elapsed(),
                            }
                        }
                        Err(err) => {
                            eprintln!("capture failed: {err}");
                            CycleOutcome {
                                frame: None,
                                detections: Vec::new(),
                                elapsed: started.elapsed(),
                            }
                        }
                    };
                    // Release exclusivity before signaling completion so the
                    // control task can redispatch a parked request at once.
                    drop(permit);
                    let _ = completion_tx.send(outcome).await;
                }));
            }
            Err(TryAcquireError::NoPermits) => {
                // Most-recent-wins: a burst of ticks while busy leaves at
                // most one coalesced request.
                self.pending = Some(now);
            }
            Err(TryAcquireError::Closed) => {}
        }
    }

    fn complete_cycle(&mut self, outcome: CycleOutcome) {
        self.adapt_interval(outcome.elapsed);

        let update = self.build_update(outcome);
        match self.update_tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                eprintln!("detection consumer lagging; dropping update");
            }
            Err(TrySendError::Closed(_)) => {}
        }

        if self.pending.take().is_some() {
            self.dispatch(Instant::now());
        }
    }

    fn adapt_interval(&mut self, elapsed: Duration) {
        let avg = match self.avg_cycle {
            Some(avg) => avg.mul_f64(0.8) + elapsed.mul_f64(0.2),
            None => elapsed,
        };
        self.avg_cycle = Some(avg);

        let observed_fps = 1.0 / avg.as_secs_f64().max(0.001);
        if observed_fps < self.config.target_fps * 0.8 {
            self.interval = (self.interval + self.config.interval_step).min(self.config.max_interval);
        } else if observed_fps > self.config.target_fps * 1.2
            && self.interval > self.config.min_interval
        {
            self.interval = self
                .interval
                .saturating_sub(self.config.interval_step)
                .max(self.config.min_interval);
        }
    }

    fn build_update(&mut self, outcome: CycleOutcome) -> DetectionUpdate {
        let current = self.source.viewport();

        let mut viewport_set: DetectionSet = Vec::new();
        if let Some(frame) = outcome.frame.as_ref() {
            let capture = frame.viewport();
            for detection in outcome.detections {
                let content = frame_to_content(detection.bounds, &capture);
                let relative = content_to_viewport(content, &current);
                let Some(clipped) = clip_to_viewport(relative, &current) else {
                    continue;
                };
                viewport_set.push(Detection {
                    bounds: clipped,
                    ..detection
                });
            }
        }

        let stabilized = self.stabilizer.update(viewport_set, Instant::now());
        // Retained entries may predate a scroll or resize; re-clip so the
        // published set always lies within the current viewport.
        let detections = stabilized
            .into_iter()
            .filter_map(|detection| {
                clip_to_viewport(detection.bounds, &current).map(|bounds| Detection {
                    bounds,
                    ..detection
                })
            })
            .collect();

        DetectionUpdate {
            detections,
            frame: outcome.frame,
            viewport: current,
        }
    }

    async fn shutdown(&mut self) {
        match time::timeout(self.config.shutdown_grace, self.inflight.acquire()).await {
            Ok(_) => {}
            Err(_) => {
                eprintln!(
                    "warning: inference cycle did not finish within {:?}; aborting it",
                    self.config.shutdown_grace
                );
                if let Some(worker) = self.worker.take() {
                    worker.abort();
                }
            }
        }
    }
}
