use crate::media::domain::image_decoder::{ImageDecodeError, ImageDecoder};
use crate::shared::frame::Frame;
use crate::shared::image_id::ImageId;

/// Decodes staged image files with the `image` crate.
///
/// The format is sniffed from the content, not the extension, so a
/// mislabelled PNG saved as `.jpg` still decodes.
pub struct ImageFileDecoder;

impl ImageFileDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageFileDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageDecoder for ImageFileDecoder {
    fn decode(&self, source: &ImageId, bytes: &[u8]) -> Result<Frame, ImageDecodeError> {
        let img = image::load_from_memory(bytes).map_err(|e| ImageDecodeError::Corrupt {
            image: source.clone(),
            reason: e.to_string(),
        })?;
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(ImageDecodeError::Empty {
                image: source.clone(),
            });
        }
        Ok(Frame::new(rgb.into_raw(), width, height, 3, source.clone()))
    }
}
