use crate::shared::frame::Frame;

/// Domain interface for turning a face crop into a feature vector.
///
/// Returned vectors are L2-normalized so that Euclidean distances between
/// them fall in `[0, 2]`.
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, crop: &Frame) -> Result<Vec<f32>, Box<dyn std::error::Error>>;
}
