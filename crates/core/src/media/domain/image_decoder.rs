use thiserror::Error;

use crate::shared::frame::Frame;
use crate::shared::image_id::ImageId;

/// Per-image failure to turn a staged file into pixels.
///
/// Never fatal to a batch: the image is skipped and counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageDecodeError {
    #[error("failed to read {image}: {reason}")]
    Unreadable { image: ImageId, reason: String },
    #[error("failed to decode {image}: {reason}")]
    Corrupt { image: ImageId, reason: String },
    #[error("{image} has zero width or height")]
    Empty { image: ImageId },
}

impl ImageDecodeError {
    pub fn image(&self) -> &ImageId {
        match self {
            Self::Unreadable { image, .. } | Self::Corrupt { image, .. } | Self::Empty { image } => {
                image
            }
        }
    }
}

/// Decodes encoded image bytes into an RGB [`Frame`].
///
/// Implementations must be pure functions of the bytes so that decoding is
/// safe to run from many worker threads at once.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, source: &ImageId, bytes: &[u8]) -> Result<Frame, ImageDecodeError>;
}
