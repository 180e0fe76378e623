use std::path::PathBuf;

use crate::shared::image_id::ImageId;

/// A staged image file: its identity within the staging area plus where it
/// lives on disk.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImageSource {
    pub id: ImageId,
    pub path: PathBuf,
}

/// A known-people image together with the identity label it was staged under.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReferenceImage {
    pub label: String,
    pub source: ImageSource,
}
