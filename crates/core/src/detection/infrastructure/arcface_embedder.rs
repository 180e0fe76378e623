/// ArcFace face embedder using ONNX Runtime.
///
/// Produces 512-d L2-normalized embeddings from square face crops.
use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::face_embedder::FaceEmbedder;
use crate::shared::frame::Frame;

use super::execution_provider::preferred_execution_providers;
use super::math::l2_normalize;

const INPUT_SIZE: usize = 112;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

pub struct ArcFaceEmbedder {
    session: Mutex<ort::session::Session>,
}

impl ArcFaceEmbedder {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let intra_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let session = ort::session::Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_inter_threads(1)?
            .with_intra_threads(intra_threads)?
            .with_execution_providers(preferred_execution_providers())?
            .commit_from_file(model_path)?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    fn embed(&self, crop: &Frame) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        if crop.is_empty() {
            return Err("Cannot embed an empty crop".into());
        }
        let tensor = preprocess(crop.data(), crop.width(), crop.height());
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        let embedding_array = outputs[0].try_extract_array::<f32>()?;
        let embedding_slice = embedding_array
            .as_slice()
            .ok_or("Cannot get embedding slice")?;

        let mut embedding = embedding_slice.to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

/// Resize crop to 112x112, normalize to [-1, 1], NCHW layout.
fn preprocess(rgb_data: &[u8], width: u32, height: u32) -> ndarray::Array4<f32> {
    let src_w = width as usize;
    let src_h = height as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));

    for y in 0..INPUT_SIZE {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / INPUT_SIZE as f64) as usize).min(src_h - 1);
        for x in 0..INPUT_SIZE {
            let src_x =
                (((x as f64 + 0.5) * src_w as f64 / INPUT_SIZE as f64) as usize).min(src_w - 1);
            let offset = (src_y * src_w + src_x) * 3;
            if offset + 2 < rgb_data.len() {
                for c in 0..3 {
                    tensor[[0, c, y, x]] = (rgb_data[offset + c] as f32 - NORM_MEAN) / NORM_STD;
                }
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_preprocess_shape() {
        let data = vec![128u8; 50 * 50 * 3];
        let tensor = preprocess(&data, 50, 50);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[rstest]
    #[case(127, (127.0 - 127.5) / 127.5)]
    #[case(255, 1.0)]
    #[case(0, -1.0)]
    fn test_preprocess_normalization(#[case] value: u8, #[case] expected: f32) {
        let data = vec![value; 10 * 10 * 3];
        let tensor = preprocess(&data, 10, 10);
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 0.01);
        assert!((tensor[[0, 2, 111, 111]] - expected).abs() < 0.01);
    }

    #[test]
    fn test_preprocess_keeps_channel_order() {
        // Single red pixel upsampled: R channel high, G and B low
        let data = vec![255u8, 0, 0];
        let tensor = preprocess(&data, 1, 1);
        assert!((tensor[[0, 0, 56, 56]] - 1.0).abs() < 0.01);
        assert!((tensor[[0, 1, 56, 56]] + 1.0).abs() < 0.01);
        assert!((tensor[[0, 2, 56, 56]] + 1.0).abs() < 0.01);
    }
}
