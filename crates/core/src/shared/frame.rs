use ndarray::ArrayView3;

use crate::shared::image_id::ImageId;

/// A decoded image: contiguous RGB bytes in row-major order, tagged with the
/// identity of the file it was decoded from.
///
/// Format conversion happens at I/O boundaries only; the domain layer
/// treats pixel data as opaque.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    source: ImageId,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, source: ImageId) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            source,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn source(&self) -> &ImageId {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// RGB value of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = ((y as usize) * (self.width as usize) + x as usize) * self.channels as usize;
        [self.data[offset], self.data[offset + 1], self.data[offset + 2]]
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
