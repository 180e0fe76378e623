/// YOLO face detector using ONNX Runtime via `ort`.
///
/// Handles letterbox preprocessing, inference, and NMS post-processing.
/// Faces are returned in reading order (top-to-bottom, then left-to-right)
/// so repeated runs over the same image agree on face order.
use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::face_detector::{DetectedFace, FaceDetector};
use crate::shared::frame::Frame;
use crate::shared::region::Region;

use super::execution_provider::preferred_execution_providers;
use super::math;

/// Fallback YOLO model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.45;

/// Faces smaller than this (in source pixels, either side) are too small to embed.
const MIN_FACE_SIZE: i32 = 8;

/// YOLO face detector backed by an ONNX Runtime session.
pub struct OnnxYoloDetector {
    session: Mutex<ort::session::Session>,
    confidence: f64,
    input_size: u32,
}

impl OnnxYoloDetector {
    /// Load a YOLO ONNX model and prepare for inference.
    ///
    /// The input resolution is read from the model's input shape (expecting NCHW).
    /// Falls back to 640 if the shape is dynamic or unreadable.
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = ort::session::Session::builder()?
            .with_execution_providers(preferred_execution_providers())?
            .commit_from_file(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    if shape.len() >= 4 && shape[2] > 0 {
                        Some(shape[2] as u32)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        Ok(Self {
            session: Mutex::new(session),
            confidence,
            input_size,
        })
    }
}

impl FaceDetector for OnnxYoloDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let (tensor, mapping) = letterbox(frame, self.input_size);
        let input_value = ort::value::Tensor::from_array(tensor)?;

        let raw = {
            let mut session = self
                .session
                .lock()
                .map_err(|e| format!("Lock poisoned: {e}"))?;
            let outputs = session.run(ort::inputs![input_value])?;
            if outputs.len() == 0 {
                return Err("YOLO model produced no outputs".into());
            }
            let tensor = outputs[0].try_extract_array::<f32>()?;
            let shape = tensor.shape().to_vec();
            let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;
            parse_output(&shape, data, self.confidence)?
        };

        let kept = math::nms(raw, NMS_IOU_THRESH);
        let mut faces: Vec<DetectedFace> = kept
            .into_iter()
            .map(|(bbox, confidence)| DetectedFace {
                region: Region::from_bbox(
                    mapping.to_source(bbox),
                    frame.width(),
                    frame.height(),
                ),
                confidence,
            })
            .filter(|f| f.region.width >= MIN_FACE_SIZE && f.region.height >= MIN_FACE_SIZE)
            .collect();

        faces.sort_by_key(|f| (f.region.y, f.region.x, f.region.width, f.region.height));
        Ok(faces)
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Scale and padding applied by [`letterbox`], needed to map boxes back.
#[derive(Clone, Copy, Debug)]
struct LetterboxMapping {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl LetterboxMapping {
    /// Map a box from letterbox coordinates back to source-image coordinates.
    fn to_source(&self, bbox: [f64; 4]) -> [f64; 4] {
        let px = self.pad_x as f64;
        let py = self.pad_y as f64;
        [
            (bbox[0] - px) / self.scale,
            (bbox[1] - py) / self.scale,
            (bbox[2] - px) / self.scale,
            (bbox[3] - py) / self.scale,
        ]
    }
}

/// Letterbox-resize a frame to `target_size` × `target_size`, NCHW float32.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, LetterboxMapping) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Padded with 114/255 gray, YOLO convention
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (
        tensor,
        LetterboxMapping {
            scale,
            pad_x,
            pad_y,
        },
    )
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

/// Parse raw YOLO output into `([x1, y1, x2, y2], confidence)` pairs in
/// letterbox coordinates, dropping rows under `confidence`.
///
/// Accepts both `[1, features, detections]` (transposed, the usual export)
/// and `[1, detections, features]`. Each row starts with
/// `[cx, cy, w, h, conf, ...]`; trailing keypoint values are ignored.
fn parse_output(
    shape: &[usize],
    data: &[f32],
    confidence: f64,
) -> Result<Vec<([f64; 4], f64)>, Box<dyn std::error::Error>> {
    if shape.len() != 3 {
        return Err(format!("Unexpected YOLO output shape: {shape:?}").into());
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if num_feats < 5 {
        return Err(format!("YOLO output has too few features: {shape:?}").into());
    }
    if data.len() < num_dets * num_feats {
        return Err("YOLO output shorter than its shape".into());
    }

    let value = |det: usize, feat: usize| -> f64 {
        if transposed {
            data[feat * num_dets + det] as f64
        } else {
            data[det * num_feats + feat] as f64
        }
    };

    let mut dets = Vec::new();
    for i in 0..num_dets {
        let conf = value(i, 4);
        if conf < confidence {
            continue;
        }
        let (cx, cy, w, h) = (value(i, 0), value(i, 1), value(i, 2), value(i, 3));
        dets.push((
            [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            conf,
        ));
    }
    Ok(dets)
}
