use std::collections::BTreeSet;

use crate::shared::face_embedding::FaceEmbedding;
use crate::shared::image_id::ImageId;

use super::matcher::MatchOutcome;

/// One dataset image after extraction and matching.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetRecord {
    pub image: ImageId,
    pub embeddings: Vec<FaceEmbedding>,
    /// One outcome per embedding, same order.
    pub matches: Vec<MatchOutcome>,
}

impl DatasetRecord {
    pub fn new(image: ImageId, embeddings: Vec<FaceEmbedding>, matches: Vec<MatchOutcome>) -> Self {
        Self {
            image,
            embeddings,
            matches,
        }
    }

    /// Groups this image belongs to: every matched label, plus `unknown`
    /// if any face went unmatched. Empty for an undetected image.
    pub fn groups(&self) -> BTreeSet<&str> {
        self.matches.iter().map(|m| m.label.as_str()).collect()
    }
}
