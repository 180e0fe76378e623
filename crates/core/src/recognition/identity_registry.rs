use std::collections::BTreeMap;
use std::fmt;

use crate::shared::constants::UNKNOWN_LABEL;
use crate::shared::face_embedding::FaceEmbedding;

/// A labeled reference person and every embedding that represents them.
///
/// Embeddings are alternative positive examples; the closest one wins during
/// matching. Never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    label: String,
    embeddings: Vec<FaceEmbedding>,
}

impl Identity {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn embeddings(&self) -> &[FaceEmbedding] {
        &self.embeddings
    }
}

/// Faces extracted from one reference image, tagged with its label.
///
/// A reference image whose extraction failed contributes an empty list so
/// that its label is still accounted for.
#[derive(Clone, Debug)]
pub struct ReferenceEmbeddings {
    pub label: String,
    pub embeddings: Vec<FaceEmbedding>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmptyIdentityReason {
    /// None of the label's reference images produced a face.
    NoEmbeddings,
    /// The label collides with the sentinel for unmatched faces.
    ReservedLabel,
}

/// A staged identity left out of the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmptyIdentity {
    pub label: String,
    pub reason: EmptyIdentityReason,
}

impl fmt::Display for EmptyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            EmptyIdentityReason::NoEmbeddings => {
                write!(f, "identity '{}' has no usable face", self.label)
            }
            EmptyIdentityReason::ReservedLabel => {
                write!(f, "identity label '{}' is reserved", self.label)
            }
        }
    }
}

/// Immutable set of identities, ordered by label. Rebuilt every run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdentityRegistry {
    identities: Vec<Identity>,
}

impl IdentityRegistry {
    /// Groups reference embeddings by label.
    ///
    /// Only the largest face of each reference image is used, since group
    /// photos would otherwise attach bystanders to the label. Labels with no
    /// faces at all, and the reserved sentinel label, are returned as
    /// warnings instead of identities.
    pub fn build(references: Vec<ReferenceEmbeddings>) -> (Self, Vec<EmptyIdentity>) {
        let mut grouped: BTreeMap<String, Vec<FaceEmbedding>> = BTreeMap::new();
        for reference in references {
            let faces = grouped.entry(reference.label).or_default();
            if let Some(face) = largest_face(reference.embeddings) {
                faces.push(face);
            }
        }

        let mut identities = Vec::with_capacity(grouped.len());
        let mut empty = Vec::new();
        for (label, embeddings) in grouped {
            let reason = if label == UNKNOWN_LABEL {
                Some(EmptyIdentityReason::ReservedLabel)
            } else if embeddings.is_empty() {
                Some(EmptyIdentityReason::NoEmbeddings)
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    let warning = EmptyIdentity { label, reason };
                    log::warn!("Excluding {warning}");
                    empty.push(warning);
                }
                None => identities.push(Identity { label, embeddings }),
            }
        }

        (Self { identities }, empty)
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.label.as_str())
    }

    pub fn embedding_count(&self) -> usize {
        self.identities.iter().map(|i| i.embeddings.len()).sum()
    }
}

/// Largest region wins; on equal area the detector's first face is kept.
fn largest_face(embeddings: Vec<FaceEmbedding>) -> Option<FaceEmbedding> {
    let mut best: Option<FaceEmbedding> = None;
    for face in embeddings {
        let replace = match &best {
            Some(current) => face.region().area() > current.region().area(),
            None => true,
        };
        if replace {
            best = Some(face);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::image_id::ImageId;
    use crate::shared::region::Region;

    fn face(image: &str, size: i32, vector: Vec<f32>) -> FaceEmbedding {
        FaceEmbedding::new(ImageId::from(image), Region::new(0, 0, size, size), vector)
    }

    fn reference(label: &str, embeddings: Vec<FaceEmbedding>) -> ReferenceEmbeddings {
        ReferenceEmbeddings {
            label: label.to_string(),
            embeddings,
        }
    }

    #[test]
    fn test_groups_by_label_in_sorted_order() {
        let (registry, empty) = IdentityRegistry::build(vec![
            reference("Bob", vec![face("Bob.jpg", 10, vec![0.0, 1.0])]),
            reference("Alice", vec![face("Alice/1.jpg", 10, vec![1.0, 0.0])]),
            reference("Alice", vec![face("Alice/2.jpg", 10, vec![0.9, 0.1])]),
        ]);

        assert!(empty.is_empty());
        assert_eq!(registry.labels().collect::<Vec<_>>(), vec!["Alice", "Bob"]);
        assert_eq!(registry.identities()[0].embeddings().len(), 2);
        assert_eq!(registry.embedding_count(), 3);
    }

    #[test]
    fn test_identity_without_faces_is_reported() {
        let (registry, empty) = IdentityRegistry::build(vec![
            reference("Alice", vec![face("Alice.jpg", 10, vec![1.0])]),
            reference("Ghost", vec![]),
            reference("Ghost", vec![]),
        ]);

        assert_eq!(registry.len(), 1);
        assert_eq!(
            empty,
            vec![EmptyIdentity {
                label: "Ghost".into(),
                reason: EmptyIdentityReason::NoEmbeddings,
            }]
        );
    }

    #[test]
    fn test_reserved_label_is_rejected() {
        let (registry, empty) =
            IdentityRegistry::build(vec![reference(UNKNOWN_LABEL, vec![face("unknown.jpg", 10, vec![1.0])])]);

        assert!(registry.is_empty());
        assert_eq!(empty[0].reason, EmptyIdentityReason::ReservedLabel);
        assert!(empty[0].to_string().contains("reserved"));
    }

    #[test]
    fn test_group_photo_keeps_largest_face() {
        let (registry, _) = IdentityRegistry::build(vec![reference(
            "Alice",
            vec![
                face("Alice.jpg", 20, vec![0.0, 1.0]),
                face("Alice.jpg", 80, vec![1.0, 0.0]),
                face("Alice.jpg", 80, vec![0.5, 0.5]),
            ],
        )]);

        let alice = &registry.identities()[0];
        assert_eq!(alice.embeddings().len(), 1);
        assert_eq!(alice.embeddings()[0].vector(), &[1.0, 0.0]);
    }

    #[test]
    fn test_empty_input_builds_empty_registry() {
        let (registry, empty) = IdentityRegistry::build(vec![]);
        assert!(registry.is_empty());
        assert!(empty.is_empty());
    }
}
