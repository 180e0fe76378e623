use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::recognition::dataset_record::DatasetRecord;
use crate::shared::image_id::ImageId;

/// Label → dataset images, both sorted. Derived from one run's records and
/// never merged with a previous run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationResult {
    groups: BTreeMap<String, BTreeSet<ImageId>>,
}

impl ClassificationResult {
    /// Groups records by assigned label. Undetected images join no group.
    pub fn organize(records: &[DatasetRecord]) -> Self {
        let mut result = Self::default();
        for record in records {
            for label in record.groups() {
                result.insert(label, record.image.clone());
            }
        }
        result
    }

    pub fn insert(&mut self, label: &str, image: ImageId) {
        self.groups.entry(label.to_string()).or_default().insert(image);
    }

    pub fn groups(&self) -> &BTreeMap<String, BTreeSet<ImageId>> {
        &self.groups
    }

    pub fn images(&self, label: &str) -> Option<&BTreeSet<ImageId>> {
        self.groups.get(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of (label, image) placements.
    pub fn placement_count(&self) -> usize {
        self.groups.values().map(BTreeSet::len).sum()
    }

    /// Plain `label -> [image]` view, convenient for assertions and display.
    pub fn to_map(&self) -> BTreeMap<String, Vec<String>> {
        self.groups
            .iter()
            .map(|(label, images)| {
                (
                    label.clone(),
                    images.iter().map(|i| i.as_str().to_string()).collect(),
                )
            })
            .collect()
    }
}
