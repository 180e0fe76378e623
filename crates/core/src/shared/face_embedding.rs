use serde::{Deserialize, Serialize};

use crate::shared::image_id::ImageId;
use crate::shared::region::Region;

/// Feature vector for one detected face, tagged with the image it came from
/// and where in that image the face was found.
///
/// Never mutated after extraction; the cache and the registry hand out clones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbedding {
    source: ImageId,
    region: Region,
    vector: Vec<f32>,
}

impl FaceEmbedding {
    pub fn new(source: ImageId, region: Region, vector: Vec<f32>) -> Self {
        Self {
            source,
            region,
            vector,
        }
    }

    pub fn source(&self) -> &ImageId {
        &self.source
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Euclidean distance to `other`, or `None` when dimensions differ.
    pub fn distance(&self, other: &FaceEmbedding) -> Option<f64> {
        euclidean_distance(&self.vector, &other.vector)
    }
}

/// Euclidean distance accumulated in `f64`, or `None` on a length mismatch.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum();
    Some(sum.sqrt())
}
