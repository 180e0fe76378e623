pub const YOLO_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const YOLO_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

pub const EMBEDDING_MODEL_NAME: &str = "w600k_r50.onnx";
pub const EMBEDDING_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/w600k_r50.onnx";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// Label assigned to faces with no registry match within the threshold.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Maximum Euclidean distance between unit-length embeddings for a match.
///
/// 1.10 on unit vectors corresponds to a cosine similarity of ~0.395.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 1.10;

/// Minimum detector confidence for a face to be embedded.
pub const DEFAULT_DETECTION_CONFIDENCE: f64 = 0.5;

/// Returns true when `path` has one of the supported image extensions.
pub fn is_image_path(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
