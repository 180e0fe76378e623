use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::media::domain::image_source::{ImageSource, ReferenceImage};
use crate::media::infrastructure::area_scanner::{scan_dataset, scan_known_people};
use crate::shared::constants::{is_image_path, UNKNOWN_LABEL};

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("invalid name '{0}': must be a single non-hidden path component")]
    InvalidName(String),
    #[error("'{0}' does not have a supported image extension")]
    NotAnImage(String),
    #[error("label '{0}' is reserved")]
    ReservedLabel(String),
    #[error("staging {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl StagingError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The two input areas: known people (reference images) and the dataset
/// to classify.
///
/// People are staged as `<people>/<label>/<file>`, dataset images as
/// `<dataset>/<file>`. Re-staging the same name overwrites.
pub struct StagingArea {
    people_dir: PathBuf,
    dataset_dir: PathBuf,
}

impl StagingArea {
    pub fn new(people_dir: impl Into<PathBuf>, dataset_dir: impl Into<PathBuf>) -> Self {
        Self {
            people_dir: people_dir.into(),
            dataset_dir: dataset_dir.into(),
        }
    }

    pub fn people_dir(&self) -> &Path {
        &self.people_dir
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    pub fn stage_person(&self, label: &str, file_name: &str, bytes: &[u8]) -> Result<PathBuf, StagingError> {
        let label = single_component(label)?;
        if label == UNKNOWN_LABEL {
            return Err(StagingError::ReservedLabel(label.to_string()));
        }
        let file_name = image_file_name(file_name)?;
        write_file(&self.people_dir.join(label), file_name, bytes)
    }

    pub fn stage_dataset(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, StagingError> {
        let file_name = image_file_name(file_name)?;
        write_file(&self.dataset_dir, file_name, bytes)
    }

    pub fn list_people(&self) -> Result<Vec<ReferenceImage>, StagingError> {
        scan_known_people(&self.people_dir).map_err(|e| StagingError::io(&self.people_dir, e))
    }

    pub fn list_dataset(&self) -> Result<Vec<ImageSource>, StagingError> {
        scan_dataset(&self.dataset_dir).map_err(|e| StagingError::io(&self.dataset_dir, e))
    }

    /// Removes both areas and everything staged in them.
    pub fn clear(&self) -> Result<(), StagingError> {
        for dir in [&self.people_dir, &self.dataset_dir] {
            match fs::remove_dir_all(dir) {
                Ok(()) => log::info!("Cleared {}", dir.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StagingError::io(dir, e)),
            }
        }
        Ok(())
    }
}

fn single_component(name: &str) -> Result<&str, StagingError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if !name.starts_with('.') && part == name => Ok(name),
        _ => Err(StagingError::InvalidName(name.to_string())),
    }
}

fn image_file_name(name: &str) -> Result<&str, StagingError> {
    let name = single_component(name)?;
    if !is_image_path(Path::new(name)) {
        return Err(StagingError::NotAnImage(name.to_string()));
    }
    Ok(name)
}

fn write_file(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, StagingError> {
    fs::create_dir_all(dir).map_err(|e| StagingError::io(dir, e))?;
    let path = dir.join(file_name);
    fs::write(&path, bytes).map_err(|e| StagingError::io(&path, e))?;
    log::debug!("Staged {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn area() -> (tempfile::TempDir, StagingArea) {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path().join("People"), dir.path().join("Dataset"));
        (dir, area)
    }

    #[test]
    fn test_stage_person_groups_under_label() {
        let (_dir, area) = area();
        area.stage_person("Alice", "one.jpg", b"1").unwrap();
        area.stage_person("Alice", "two.jpg", b"2").unwrap();
        area.stage_person("Bob", "b.png", b"3").unwrap();

        let people = area.list_people().unwrap();
        let pairs: Vec<_> = people
            .iter()
            .map(|r| (r.label.as_str(), r.source.id.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("Alice", "Alice/one.jpg"), ("Alice", "Alice/two.jpg"), ("Bob", "Bob/b.png")]
        );
    }

    #[test]
    fn test_stage_dataset_lists_flat_files() {
        let (_dir, area) = area();
        area.stage_dataset("b.png", b"b").unwrap();
        area.stage_dataset("a.png", b"a").unwrap();
        let ids: Vec<_> = area
            .list_dataset()
            .unwrap()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a.png", "b.png"]);
    }

    #[test]
    fn test_restaging_overwrites() {
        let (_dir, area) = area();
        let path = area.stage_dataset("a.png", b"old").unwrap();
        area.stage_dataset("a.png", b"new").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"new");
    }

    #[rstest]
    #[case("../escape.png")]
    #[case("nested/a.png")]
    #[case("/abs.png")]
    #[case(".hidden.png")]
    #[case("")]
    #[case("..")]
    fn test_rejects_unsafe_names(#[case] name: &str) {
        let (_dir, area) = area();
        assert!(matches!(
            area.stage_dataset(name, b"x"),
            Err(StagingError::InvalidName(_))
        ));
    }

    #[test]
    fn test_rejects_non_images_and_reserved_label() {
        let (_dir, area) = area();
        assert!(matches!(
            area.stage_dataset("notes.txt", b"x"),
            Err(StagingError::NotAnImage(_))
        ));
        assert!(matches!(
            area.stage_person("unknown", "u.png", b"x"),
            Err(StagingError::ReservedLabel(_))
        ));
        assert!(matches!(
            area.stage_person("../Alice", "a.png", b"x"),
            Err(StagingError::InvalidName(_))
        ));
    }

    #[test]
    fn test_clear_removes_both_areas() {
        let (_dir, area) = area();
        area.stage_person("Alice", "a.png", b"x").unwrap();
        area.stage_dataset("d.png", b"x").unwrap();
        area.clear().unwrap();

        assert!(!area.people_dir().exists());
        assert!(!area.dataset_dir().exists());
        assert!(area.list_people().unwrap().is_empty());
        area.clear().unwrap();
    }
}
