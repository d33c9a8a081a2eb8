use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_stream::StreamExt;

use screenveil::cli::{self, DetectorBackend};
use screenveil::settings;
use screenveil::{
    CaptureSource, ClassThresholds, ContentMonitor, DetectionSet, DetectorConfig, DetectorKind,
    InferenceEngine, PipelineError, SyntheticSurface, ViewportState, build_detector, update_stream,
};

#[derive(Debug, Serialize)]
struct UpdateLine<'a> {
    cycle: u32,
    detections: &'a DetectionSet,
    viewport: &'a ViewportState,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), PipelineError> {
    let (args, sources) = cli::parse_cli();
    let settings = settings::resolve_settings(&args, &sources)
        .map_err(|err| PipelineError::configuration(err.to_string()))?;

    let kind = match settings.detector {
        DetectorBackend::Mock => DetectorKind::Mock,
        DetectorBackend::Onnx => DetectorKind::Onnx,
    };
    let detector_config = DetectorConfig {
        model_path: settings.model.clone(),
        ..DetectorConfig::default()
    };
    let detector = build_detector(kind, detector_config)?;
    detector.warm_up().map_err(PipelineError::DetectorInit)?;

    let thresholds = ClassThresholds::default();
    for (class, value) in &settings.threshold_overrides {
        thresholds.set(class, *value);
    }

    let engine = InferenceEngine::new(detector, thresholds);
    let surface = Arc::new(SyntheticSurface::new(
        settings.viewport_width as f32,
        settings.viewport_height as f32,
        settings.content_height,
    ));

    let (monitor, update_rx) = ContentMonitor::new(
        Arc::clone(&surface) as Arc<dyn CaptureSource>,
        engine,
        settings.scheduler,
        settings.stabilizer,
    );
    let handle = monitor.handle();
    let monitor_task = tokio::spawn(monitor.run());

    let progress = if settings.json {
        None
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan.bold} [{elapsed_precise}] updates {pos} • {msg}",
            )
            .unwrap()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        Some(spinner)
    };

    let scroll_step = settings
        .scroll_step
        .unwrap_or(settings.viewport_height as f32 / 8.0);
    let mut updates = update_stream(update_rx);
    let mut consumed: u32 = 0;

    while consumed < settings.cycles {
        let Some(update) = updates.next().await else {
            break;
        };
        consumed += 1;

        // Walk the synthetic page so successive cycles see fresh content.
        surface.set_scroll(0.0, consumed as f32 * scroll_step);

        if settings.json {
            let line = UpdateLine {
                cycle: consumed,
                detections: &update.detections,
                viewport: &update.viewport,
            };
            match serde_json::to_string(&line) {
                Ok(json) => println!("{json}"),
                Err(err) => eprintln!("failed to serialize update: {err}"),
            }
        } else if let Some(progress) = progress.as_ref() {
            progress.set_position(consumed as u64);
            progress.set_message(format!("{} regions flagged", update.detections.len()));
        }
    }

    handle.stop();
    let _ = monitor_task.await;

    if let Some(progress) = progress {
        progress.finish_with_message(format!("completed {consumed} updates"));
    }

    Ok(())
}
