use crate::detection::domain::embedding_extractor::{EmbeddingExtractor, ExtractionError};
use crate::detection::domain::face_detector::FaceDetector;
use crate::detection::domain::face_embedder::FaceEmbedder;
use crate::shared::face_embedding::FaceEmbedding;
use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// Two-stage extractor: detect faces, then embed a square crop of each.
///
/// Embeddings come out in detector order, one per face.
pub struct DetectEmbedExtractor {
    detector: Box<dyn FaceDetector>,
    embedder: Box<dyn FaceEmbedder>,
}

impl DetectEmbedExtractor {
    pub fn new(detector: Box<dyn FaceDetector>, embedder: Box<dyn FaceEmbedder>) -> Self {
        Self { detector, embedder }
    }
}

impl EmbeddingExtractor for DetectEmbedExtractor {
    fn extract(&self, frame: &Frame) -> Result<Vec<FaceEmbedding>, ExtractionError> {
        let source = frame.source();
        let faces = self
            .detector
            .detect(frame)
            .map_err(|e| ExtractionError::inference(source, e))?;

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in faces {
            let crop = square_crop(frame, &face.region);
            if crop.is_empty() {
                log::debug!("Skipping empty crop for face at {:?} in {source}", face.region);
                continue;
            }
            let vector = self
                .embedder
                .embed(&crop)
                .map_err(|e| ExtractionError::inference(source, e))?;
            embeddings.push(FaceEmbedding::new(source.clone(), face.region, vector));
        }
        Ok(embeddings)
    }
}

/// Extracts a square crop centered on the region, clamped to frame bounds.
fn square_crop(frame: &Frame, region: &Region) -> Frame {
    let fw = frame.width() as i32;
    let fh = frame.height() as i32;

    let cx = region.x + region.width / 2;
    let cy = region.y + region.height / 2;
    let half = region.width.max(region.height) / 2;

    let x1 = (cx - half).clamp(0, fw) as usize;
    let y1 = (cy - half).clamp(0, fh) as usize;
    let x2 = (cx + half).clamp(0, fw) as usize;
    let y2 = (cy + half).clamp(0, fh) as usize;

    let crop_w = x2.saturating_sub(x1);
    let crop_h = y2.saturating_sub(y1);
    let channels = frame.channels() as usize;

    let src = frame.as_ndarray();
    let mut data = Vec::with_capacity(crop_w * crop_h * channels);

    for row in y1..y1 + crop_h {
        for col in x1..x1 + crop_w {
            for c in 0..channels {
                data.push(src[[row, col, c]]);
            }
        }
    }

    Frame::new(
        data,
        crop_w as u32,
        crop_h as u32,
        channels as u8,
        frame.source().clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_detector::DetectedFace;
    use crate::shared::image_id::ImageId;
    use std::sync::{Arc, Mutex};

    struct StubDetector {
        faces: Vec<Region>,
        fail: bool,
    }

    impl FaceDetector for StubDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>> {
            if self.fail {
                return Err("model exploded".into());
            }
            Ok(self
                .faces
                .iter()
                .map(|r| DetectedFace {
                    region: *r,
                    confidence: 0.9,
                })
                .collect())
        }
    }

    /// Embeds a crop as `[width, height]` and records crop sizes.
    struct SizeEmbedder {
        seen: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl FaceEmbedder for SizeEmbedder {
        fn embed(&self, crop: &Frame) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
            self.seen.lock().unwrap().push((crop.width(), crop.height()));
            Ok(vec![crop.width() as f32, crop.height() as f32])
        }
    }

    fn frame(w: u32, h: u32) -> Frame {
        Frame::new(vec![128; (w * h * 3) as usize], w, h, 3, ImageId::from("img.png"))
    }

    fn extractor(faces: Vec<Region>, fail: bool) -> (DetectEmbedExtractor, Arc<Mutex<Vec<(u32, u32)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ex = DetectEmbedExtractor::new(
            Box::new(StubDetector { faces, fail }),
            Box::new(SizeEmbedder { seen: seen.clone() }),
        );
        (ex, seen)
    }

    #[test]
    fn test_no_faces_is_empty_not_error() {
        let (ex, seen) = extractor(vec![], false);
        let result = ex.extract(&frame(100, 100)).unwrap();
        assert!(result.is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_one_embedding_per_face_in_detector_order() {
        let faces = vec![Region::new(10, 10, 20, 20), Region::new(50, 40, 30, 30)];
        let (ex, _) = extractor(faces.clone(), false);
        let result = ex.extract(&frame(100, 100)).unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].region(), faces[0]);
        assert_eq!(result[1].region(), faces[1]);
        assert_eq!(result[0].source().as_str(), "img.png");
        assert_eq!(result[1].vector(), &[30.0, 30.0]);
    }

    #[test]
    fn test_detector_failure_is_inference_error() {
        let (ex, _) = extractor(vec![], true);
        let err = ex.extract(&frame(10, 10)).unwrap_err();
        assert!(matches!(err, ExtractionError::Inference { .. }));
        assert!(err.to_string().contains("img.png"));
    }

    #[test]
    fn test_square_crop_uses_max_dimension() {
        // Tall region 10x30 centered at (45, 50) → 30x30 crop
        let crop = square_crop(&frame(100, 100), &Region::new(40, 35, 10, 30));
        assert_eq!(crop.width(), 30);
        assert_eq!(crop.height(), 30);
    }

    #[test]
    fn test_square_crop_clamps_to_frame() {
        // cx=10, cy=10, half=3 → x1=7, x2=10 → 3x3
        let crop = square_crop(&frame(10, 10), &Region::new(7, 7, 6, 6));
        assert_eq!(crop.width(), 3);
        assert_eq!(crop.height(), 3);
    }

    #[test]
    fn test_degenerate_region_is_skipped() {
        let (ex, seen) = extractor(vec![Region::new(5, 5, 0, 0)], false);
        assert!(ex.extract(&frame(10, 10)).unwrap().is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }
}
