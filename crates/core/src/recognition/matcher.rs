use crate::shared::constants::{DEFAULT_MATCH_THRESHOLD, UNKNOWN_LABEL};
use crate::shared::face_embedding::FaceEmbedding;

use super::identity_registry::IdentityRegistry;

/// Label assigned to one dataset face.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchOutcome {
    pub label: String,
    /// Distance to the nearest registry embedding, or `None` when nothing in
    /// the registry was comparable.
    pub distance: Option<f64>,
}

impl MatchOutcome {
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

/// Nearest-neighbour matcher over an [`IdentityRegistry`].
#[derive(Clone, Copy, Debug)]
pub struct Matcher {
    threshold: f64,
}

impl Matcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compares `probe` against every registry embedding.
    ///
    /// The global minimum distance wins if it is `<= threshold`. Equal
    /// distances resolve to the lexicographically smallest label, which
    /// falls out of scanning identities in label order and only replacing
    /// the best on a strictly smaller distance.
    pub fn match_embedding(&self, probe: &FaceEmbedding, registry: &IdentityRegistry) -> MatchOutcome {
        let mut best: Option<(f64, &str)> = None;
        for identity in registry.identities() {
            for reference in identity.embeddings() {
                let Some(distance) = probe.distance(reference) else {
                    continue;
                };
                if best.map_or(true, |(d, _)| distance < d) {
                    best = Some((distance, identity.label()));
                }
            }
        }

        match best {
            Some((distance, label)) if distance <= self.threshold => MatchOutcome {
                label: label.to_string(),
                distance: Some(distance),
            },
            nearest => MatchOutcome {
                label: UNKNOWN_LABEL.to_string(),
                distance: nearest.map(|(d, _)| d),
            },
        }
    }

    /// Labels every face of one image, in face order.
    pub fn match_all(&self, faces: &[FaceEmbedding], registry: &IdentityRegistry) -> Vec<MatchOutcome> {
        faces
            .iter()
            .map(|face| self.match_embedding(face, registry))
            .collect()
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}
