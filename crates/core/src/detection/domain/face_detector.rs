use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// A face found in an image, before any embedding is computed.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedFace {
    pub region: Region,
    pub confidence: f64,
}

/// Domain interface for face detection.
///
/// Detection is stateless per image, hence `&self`: one detector is shared
/// by every extraction worker.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>>;
}
