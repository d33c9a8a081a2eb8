use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ndarray::{Array4, CowArray, IxDyn};
use once_cell::sync::OnceCell;
use ort::environment::Environment;
use ort::error::OrtError;
use ort::session::{Session, SessionBuilder};
use ort::value::Value;

use crate::core::BYTES_PER_PIXEL;
use crate::detector::{DetectorConfig, DetectorError, ObjectDetector, RawDetection, TileView};
use crate::geometry::BoundingBox;

const BASE_CONFIDENCE: f32 = 0.25;
const NMS_IOU: f32 = 0.45;

struct ModelHandle {
    _environment: Arc<Environment>,
    session: Arc<Session>,
}

struct ModelRegistry {
    environment: Arc<Environment>,
    handles: Mutex<HashMap<PathBuf, Arc<ModelHandle>>>,
}

impl ModelRegistry {
    fn new() -> Result<Self, DetectorError> {
        let environment = Environment::builder()
            .with_name("screenveil")
            .build()
            .map_err(map_environment_error)?;
        Ok(Self {
            environment: Arc::new(environment),
            handles: Mutex::new(HashMap::new()),
        })
    }

    fn get(&self, path: &Path) -> Result<Arc<ModelHandle>, DetectorError> {
        if !path.exists() {
            return Err(DetectorError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let mut handles = self.handles.lock().expect("model registry poisoned");
        if let Some(handle) = handles.get(path) {
            return Ok(handle.clone());
        }

        let session = SessionBuilder::new(&self.environment)
            .map_err(map_session_error)?
            .with_model_from_file(path)
            .map_err(map_session_error)?;

        let handle = Arc::new(ModelHandle {
            _environment: Arc::clone(&self.environment),
            session: Arc::new(session),
        });
        handles.insert(path.to_path_buf(), handle.clone());
        Ok(handle)
    }
}

static MODEL_REGISTRY: OnceCell<ModelRegistry> = OnceCell::new();

fn registry() -> Result<&'static ModelRegistry, DetectorError> {
    MODEL_REGISTRY.get_or_try_init(ModelRegistry::new)
}

fn map_environment_error(err: OrtError) -> DetectorError {
    DetectorError::Environment(err.to_string())
}

fn map_session_error(err: OrtError) -> DetectorError {
    DetectorError::Session(err.to_string())
}

/// YOLO-style single-output detector running through ONNX Runtime. Sessions
/// are shared per model path across detector instances.
pub struct OnnxDetector {
    model: Arc<ModelHandle>,
    class_names: Vec<String>,
    input_size: usize,
}

impl OnnxDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, DetectorError> {
        let model_path = config
            .model_path
            .as_ref()
            .ok_or(DetectorError::MissingModelPath)?
            .clone();
        let model = registry()?.get(&model_path)?;
        Ok(Self {
            model,
            class_names: config.class_names,
            input_size: config.input_size.max(32),
        })
    }
}

impl ObjectDetector for OnnxDetector {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn warm_up(&self) -> Result<(), DetectorError> {
        // Session creation already validated the model file.
        Ok(())
    }

    fn detect(&self, tile: &TileView<'_>) -> Result<Vec<RawDetection>, DetectorError> {
        let input = prepare_input_tensor(tile, self.input_size)?;
        let (data, shape) = run_model(&self.model, &input)?;
        let boxes = decode_predictions(
            &data,
            &shape,
            &self.class_names,
            self.input_size,
            tile.width() as f32,
            tile.height() as f32,
        )?;
        Ok(non_max_suppress(boxes))
    }
}

/// Bilinear-resizes the BGRA tile to the model edge and lays it out as a
/// normalized RGB CHW tensor.
fn prepare_input_tensor(tile: &TileView<'_>, edge: usize) -> Result<Array4<f32>, DetectorError> {
    let src_width = tile.width() as usize;
    let src_height = tile.height() as usize;
    if src_width == 0 || src_height == 0 {
        return Err(DetectorError::Input("empty tile".to_string()));
    }

    let area = edge * edge;
    let mut data = vec![0f32; area * 3];
    let scale_x = if edge > 1 {
        (src_width - 1) as f32 / (edge - 1) as f32
    } else {
        0.0
    };
    let scale_y = if edge > 1 {
        (src_height - 1) as f32 / (edge - 1) as f32
    } else {
        0.0
    };

    for dy in 0..edge {
        let fy = scale_y * dy as f32;
        let y0 = fy.floor() as usize;
        let y1 = (y0 + 1).min(src_height - 1);
        let wy = fy - y0 as f32;
        let row0 = tile.row(y0 as u32);
        let row1 = tile.row(y1 as u32);
        for dx in 0..edge {
            let fx = scale_x * dx as f32;
            let x0 = fx.floor() as usize;
            let x1 = (x0 + 1).min(src_width - 1);
            let wx = fx - x0 as f32;

            // Channels are BGRA in the source, RGB in the tensor.
            for (channel, src_channel) in [(0usize, 2usize), (1, 1), (2, 0)] {
                let top_left = row0[x0 * BYTES_PER_PIXEL + src_channel] as f32;
                let top_right = row0[x1 * BYTES_PER_PIXEL + src_channel] as f32;
                let bottom_left = row1[x0 * BYTES_PER_PIXEL + src_channel] as f32;
                let bottom_right = row1[x1 * BYTES_PER_PIXEL + src_channel] as f32;
                let top = top_left + (top_right - top_left) * wx;
                let bottom = bottom_left + (bottom_right - bottom_left) * wx;
                let value = (top + (bottom - top) * wy) / 255.0;
                data[channel * area + dy * edge + dx] = value.clamp(0.0, 1.0);
            }
        }
    }

    Array4::from_shape_vec((1, 3, edge, edge), data)
        .map_err(|err| DetectorError::Input(err.to_string()))
}

fn run_model(model: &ModelHandle, input: &Array4<f32>) -> Result<(Vec<f32>, Vec<usize>), DetectorError> {
    let session = &model.session;
    let allocator = session.allocator();
    let input_dyn: CowArray<'_, f32, IxDyn> = CowArray::from(input.view().into_dyn());
    let value = Value::from_array(allocator, &input_dyn)
        .map_err(|err| DetectorError::Input(err.to_string()))?;
    let outputs = session
        .run(vec![value])
        .map_err(|err| DetectorError::Inference(err.to_string()))?;
    let tensor = outputs
        .into_iter()
        .next()
        .ok_or(DetectorError::InvalidOutputShape)?
        .try_extract::<f32>()
        .map_err(|err| DetectorError::Inference(err.to_string()))?;
    let view = tensor.view();
    let shape = view.shape().to_vec();
    let data = view.iter().copied().collect::<Vec<f32>>();
    Ok((data, shape))
}

/// Decodes `[1, 4+nc, N]` (attributes-first) or `[1, N, 5+nc]`
/// (anchors-first with objectness) prediction layouts into tile-local boxes.
fn decode_predictions(
    data: &[f32],
    shape: &[usize],
    class_names: &[String],
    edge: usize,
    tile_width: f32,
    tile_height: f32,
) -> Result<Vec<RawDetection>, DetectorError> {
    let &[1, rows, cols] = shape else {
        return Err(DetectorError::InvalidOutputShape);
    };
    if data.len() < rows * cols {
        return Err(DetectorError::InvalidOutputShape);
    }

    let num_classes = class_names.len().max(1);
    let attributes_first = rows == 4 + num_classes && rows < cols;

    let scale_x = tile_width / edge as f32;
    let scale_y = tile_height / edge as f32;
    let mut detections = Vec::new();

    let anchors = if attributes_first { cols } else { rows };
    for anchor in 0..anchors {
        let value = |attribute: usize| {
            if attributes_first {
                data[attribute * cols + anchor]
            } else {
                data[anchor * cols + attribute]
            }
        };

        let class_offset = if attributes_first { 4 } else { 5 };
        let available = if attributes_first { rows } else { cols };
        let mut best_class = 0usize;
        let mut best_score = 0f32;
        for class_id in 0..num_classes.min(available.saturating_sub(class_offset)) {
            let score = value(class_offset + class_id);
            if score > best_score {
                best_score = score;
                best_class = class_id;
            }
        }

        let confidence = if attributes_first {
            best_score
        } else {
            value(4) * best_score
        };
        if confidence < BASE_CONFIDENCE {
            continue;
        }

        let cx = value(0) * scale_x;
        let cy = value(1) * scale_y;
        let width = value(2) * scale_x;
        let height = value(3) * scale_y;
        let class = class_names
            .get(best_class)
            .cloned()
            .unwrap_or_else(|| format!("class_{best_class}"));

        detections.push(RawDetection {
            x1: cx - width / 2.0,
            y1: cy - height / 2.0,
            x2: cx + width / 2.0,
            y2: cy + height / 2.0,
            class,
            confidence: confidence.clamp(0.0, 1.0),
        });
    }

    Ok(detections)
}

/// Greedy per-class non-maximum suppression over one tile's raw boxes.
fn non_max_suppress(mut detections: Vec<RawDetection>) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let candidate_box =
            BoundingBox::new(candidate.x1, candidate.y1, candidate.x2, candidate.y2);
        let suppressed = kept.iter().any(|existing| {
            existing.class == candidate.class
                && BoundingBox::new(existing.x1, existing.y1, existing.x2, existing.y2)
                    .iou(&candidate_box)
                    >= NMS_IOU
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_attributes_first_layout() {
        // 2 anchors, 5 classes: rows = 4 + 5 = 9.
        let class_names: Vec<String> = crate::detector::DEFAULT_CLASS_NAMES
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = 9;
        let cols = 2;
        let mut data = vec![0f32; rows * cols];
        // Anchor 0: center (320, 320), size 64x64, weapons (class 2) at 0.8.
        data[0] = 320.0;
        data[cols] = 320.0;
        data[2 * cols] = 64.0;
        data[3 * cols] = 64.0;
        data[(4 + 2) * cols] = 0.8;

        let detections =
            decode_predictions(&data, &[1, rows, cols], &class_names, 640, 640.0, 640.0).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class, "weapons");
        assert!((detections[0].confidence - 0.8).abs() < 1e-6);
        assert!((detections[0].x1 - 288.0).abs() < 1e-3);
        assert!((detections[0].y2 - 352.0).abs() < 1e-3);
    }

    #[test]
    fn nms_collapses_overlapping_same_class_boxes() {
        let detections = vec![
            RawDetection {
                x1: 0.0,
                y1: 0.0,
                x2: 100.0,
                y2: 100.0,
                class: "adult".to_string(),
                confidence: 0.9,
            },
            RawDetection {
                x1: 5.0,
                y1: 5.0,
                x2: 105.0,
                y2: 105.0,
                class: "adult".to_string(),
                confidence: 0.6,
            },
            RawDetection {
                x1: 300.0,
                y1: 300.0,
                x2: 400.0,
                y2: 400.0,
                class: "adult".to_string(),
                confidence: 0.7,
            },
        ];
        let kept = non_max_suppress(detections);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
    }
}
