use thiserror::Error;

use crate::media::domain::image_decoder::ImageDecodeError;
use crate::shared::face_embedding::FaceEmbedding;
use crate::shared::frame::Frame;
use crate::shared::image_id::ImageId;

/// Why no embeddings could be produced for one image.
///
/// "No face found" is not an error; it is an empty `Ok`. Cloneable so a
/// single in-flight computation can hand the same failure to every waiter.
///
/// `Unavailable` means the extractor cannot run at all (models missing or
/// unloadable); it is not tied to the image and aborts the whole run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error(transparent)]
    Decode(#[from] ImageDecodeError),
    #[error("face inference failed for {image}: {reason}")]
    Inference { image: ImageId, reason: String },
    #[error("face extractor unavailable: {0}")]
    Unavailable(String),
}

impl ExtractionError {
    pub fn inference(image: &ImageId, err: impl std::fmt::Display) -> Self {
        Self::Inference {
            image: image.clone(),
            reason: err.to_string(),
        }
    }
}

/// Domain interface for producing one embedding per detected face.
///
/// For a fixed model and fixed image, output (including its order) must be
/// identical across calls.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, frame: &Frame) -> Result<Vec<FaceEmbedding>, ExtractionError>;
}
