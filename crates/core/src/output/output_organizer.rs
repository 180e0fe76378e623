//! Materializes a [`ClassificationResult`] as `<root>/<label>/<image>`.
//!
//! Each write fully replaces the previous tree: the new grouping is built in
//! a sibling staging directory and swapped in, so readers never see a mix of
//! two runs.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;

use crate::shared::image_id::ImageId;

use super::classification_result::ClassificationResult;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("output {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("no source file known for {0}")]
    MissingSource(ImageId),
}

impl OutputError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub struct OutputOrganizer {
    root: PathBuf,
    /// Shared for reads, exclusive for writes.
    lock: RwLock<()>,
}

impl OutputOrganizer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replaces the output tree with `result`, copying each image from the
    /// path `sources` gives for it.
    pub fn materialize(
        &self,
        result: &ClassificationResult,
        sources: &HashMap<ImageId, PathBuf>,
    ) -> Result<(), OutputError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);

        let staging = self.staging_dir();
        remove_dir_if_exists(&staging)?;
        if let Err(e) = write_tree(&staging, result, sources) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if let Err(e) = self.swap_in(&staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        log::debug!(
            "Wrote {} placements across {} groups to {}",
            result.placement_count(),
            result.groups().len(),
            self.root.display()
        );
        Ok(())
    }

    /// Moves the live tree aside, renames `staging` into place, then drops
    /// the old copy. On a failed rename the old tree is moved back.
    fn swap_in(&self, staging: &Path) -> Result<(), OutputError> {
        let retired = self.sibling_dir("previous");
        remove_dir_if_exists(&retired)?;
        let had_previous = match fs::rename(&self.root, &retired) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(OutputError::io(&self.root, e)),
        };

        if let Err(e) = fs::rename(staging, &self.root) {
            if had_previous {
                if let Err(restore) = fs::rename(&retired, &self.root) {
                    log::warn!(
                        "Could not restore previous output from {}: {restore}",
                        retired.display()
                    );
                }
            }
            return Err(OutputError::io(&self.root, e));
        }

        if let Err(e) = remove_dir_if_exists(&retired) {
            log::warn!("Could not remove previous output: {e}");
        }
        Ok(())
    }

    /// Reads the grouping currently on disk. A missing tree is empty.
    pub fn read(&self) -> Result<ClassificationResult, OutputError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);

        let mut result = ClassificationResult::default();
        for label_dir in visible_entries(&self.root)? {
            if !label_dir.is_dir() {
                continue;
            }
            let Some(label) = label_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            for image in visible_entries(&label_dir)? {
                if let Some(name) = image.file_name().and_then(|n| n.to_str()) {
                    if image.is_file() {
                        result.insert(label, ImageId::from(name));
                    }
                }
            }
        }
        Ok(result)
    }

    /// Deletes the whole output tree.
    pub fn clear(&self) -> Result<(), OutputError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        remove_dir_if_exists(&self.staging_dir())?;
        remove_dir_if_exists(&self.sibling_dir("previous"))?;
        remove_dir_if_exists(&self.root)
    }

    fn staging_dir(&self) -> PathBuf {
        self.sibling_dir("partial")
    }

    /// Hidden sibling of the root, e.g. `.output.partial`.
    fn sibling_dir(&self, suffix: &str) -> PathBuf {
        let name = self
            .root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("output");
        self.root.with_file_name(format!(".{name}.{suffix}"))
    }
}

fn write_tree(
    dir: &Path,
    result: &ClassificationResult,
    sources: &HashMap<ImageId, PathBuf>,
) -> Result<(), OutputError> {
    fs::create_dir_all(dir).map_err(|e| OutputError::io(dir, e))?;
    for (label, images) in result.groups() {
        let label_dir = dir.join(label);
        fs::create_dir_all(&label_dir).map_err(|e| OutputError::io(&label_dir, e))?;
        for image in images {
            let source = sources
                .get(image)
                .ok_or_else(|| OutputError::MissingSource(image.clone()))?;
            let target = label_dir.join(image.file_name());
            fs::copy(source, &target).map_err(|e| OutputError::io(&target, e))?;
        }
    }
    Ok(())
}

fn remove_dir_if_exists(path: &Path) -> Result<(), OutputError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(OutputError::io(path, e)),
    }
}

fn visible_entries(dir: &Path) -> Result<Vec<PathBuf>, OutputError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(OutputError::io(dir, e)),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| OutputError::io(dir, e))?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        if !hidden {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        organizer: OutputOrganizer,
        sources: HashMap<ImageId, PathBuf>,
    }

    fn fixture(images: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("Dataset");
        fs::create_dir_all(&dataset).unwrap();
        let mut sources = HashMap::new();
        for name in images {
            let path = dataset.join(name);
            fs::write(&path, name.as_bytes()).unwrap();
            sources.insert(ImageId::from(*name), path);
        }
        let organizer = OutputOrganizer::new(dir.path().join("output"));
        Fixture {
            _dir: dir,
            organizer,
            sources,
        }
    }

    fn result(pairs: &[(&str, &str)]) -> ClassificationResult {
        let mut r = ClassificationResult::default();
        for (label, image) in pairs {
            r.insert(label, ImageId::from(*image));
        }
        r
    }

    #[test]
    fn test_materialize_copies_into_label_dirs() {
        let f = fixture(&["a.png", "b.png"]);
        f.organizer
            .materialize(&result(&[("Alice", "a.png"), ("unknown", "b.png")]), &f.sources)
            .unwrap();

        let root = f.organizer.root();
        assert_eq!(fs::read(root.join("Alice").join("a.png")).unwrap(), b"a.png");
        assert!(root.join("unknown").join("b.png").exists());
    }

    #[test]
    fn test_read_round_trips_materialized_tree() {
        let f = fixture(&["a.png", "b.png"]);
        let written = result(&[("Alice", "a.png"), ("Alice", "b.png"), ("Bob", "b.png")]);
        f.organizer.materialize(&written, &f.sources).unwrap();
        assert_eq!(f.organizer.read().unwrap(), written);
    }

    #[test]
    fn test_materialize_fully_replaces_previous_grouping() {
        let f = fixture(&["a.png", "b.png"]);
        f.organizer
            .materialize(&result(&[("Alice", "a.png"), ("Bob", "b.png")]), &f.sources)
            .unwrap();
        f.organizer
            .materialize(&result(&[("unknown", "a.png")]), &f.sources)
            .unwrap();

        let read = f.organizer.read().unwrap();
        assert_eq!(read.labels().collect::<Vec<_>>(), vec!["unknown"]);
        assert!(!f.organizer.root().join("Bob").exists());
    }

    #[test]
    fn test_missing_source_keeps_previous_tree() {
        let f = fixture(&["a.png"]);
        let first = result(&[("Alice", "a.png")]);
        f.organizer.materialize(&first, &f.sources).unwrap();

        let err = f
            .organizer
            .materialize(&result(&[("Alice", "ghost.png")]), &f.sources)
            .unwrap_err();
        assert!(matches!(err, OutputError::MissingSource(_)));
        assert_eq!(f.organizer.read().unwrap(), first);
    }

    #[test]
    fn test_failed_swap_restores_previous_tree() {
        let f = fixture(&["a.png", "b.png"]);
        let first = result(&[("Alice", "a.png")]);
        f.organizer.materialize(&first, &f.sources).unwrap();

        // Staging is built, the live tree moved aside, then the rename into
        // place fails because the staging dir is gone.
        let staging = f.organizer.staging_dir();
        write_tree(&staging, &result(&[("Bob", "b.png")]), &f.sources).unwrap();
        fs::remove_dir_all(&staging).unwrap();
        assert!(f.organizer.swap_in(&staging).is_err());

        assert_eq!(f.organizer.read().unwrap(), first);
        assert!(!f.organizer.sibling_dir("previous").exists());
    }

    #[test]
    fn test_successful_swap_leaves_no_sibling_dirs() {
        let f = fixture(&["a.png"]);
        let written = result(&[("Alice", "a.png")]);
        f.organizer.materialize(&written, &f.sources).unwrap();
        f.organizer.materialize(&written, &f.sources).unwrap();

        assert!(!f.organizer.staging_dir().exists());
        assert!(!f.organizer.sibling_dir("previous").exists());
        assert_eq!(f.organizer.read().unwrap(), written);
    }

    #[test]
    fn test_read_missing_tree_is_empty() {
        let f = fixture(&[]);
        assert!(f.organizer.read().unwrap().is_empty());
    }

    #[test]
    fn test_empty_result_leaves_empty_tree() {
        let f = fixture(&["a.png"]);
        f.organizer.materialize(&result(&[("Alice", "a.png")]), &f.sources).unwrap();
        f.organizer.materialize(&ClassificationResult::default(), &f.sources).unwrap();
        assert!(f.organizer.root().is_dir());
        assert!(f.organizer.read().unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_tree() {
        let f = fixture(&["a.png"]);
        f.organizer.materialize(&result(&[("Alice", "a.png")]), &f.sources).unwrap();
        f.organizer.clear().unwrap();
        assert!(!f.organizer.root().exists());
        assert!(f.organizer.read().unwrap().is_empty());
    }
}
