use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::shared::constants::{DEFAULT_DETECTION_CONFIDENCE, DEFAULT_MATCH_THRESHOLD};

/// Where the engine reads and writes, and how it matches.
///
/// Missing fields in a config file fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub people_dir: PathBuf,
    pub dataset_dir: PathBuf,
    pub output_dir: PathBuf,
    pub cache_path: PathBuf,
    pub threshold: f64,
    /// Extraction worker count; `None` uses every available core.
    pub workers: Option<usize>,
    pub detection_confidence: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            people_dir: PathBuf::from("People"),
            dataset_dir: PathBuf::from("Dataset"),
            output_dir: PathBuf::from("output"),
            cache_path: PathBuf::from("encodings.json"),
            threshold: DEFAULT_MATCH_THRESHOLD,
            workers: None,
            detection_confidence: DEFAULT_DETECTION_CONFIDENCE,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let json = fs::read_to_string(path)
            .map_err(|e| format!("Cannot read config {}: {e}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| format!("Invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.filter(|&n| n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Checks values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), String> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(format!("threshold must be a non-negative number, got {}", self.threshold));
        }
        if !(0.0..=1.0).contains(&self.detection_confidence) {
            return Err(format!(
                "detection_confidence must be within 0..=1, got {}",
                self.detection_confidence
            ));
        }
        if self.workers == Some(0) {
            return Err("workers must be at least 1".to_string());
        }
        Ok(())
    }
}
