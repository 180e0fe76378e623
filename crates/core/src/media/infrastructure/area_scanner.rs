//! Discovery of staged images in the known-people and dataset areas.
//!
//! Known people are grouped into identities by one rule, applied one level
//! deep:
//! - a top-level image file `Alice.jpg` belongs to identity `Alice` (file stem);
//! - every image file directly inside a top-level directory `Alice/` belongs
//!   to identity `Alice` (directory name).
//!
//! Both forms may coexist and merge into one identity. Hidden entries and
//! files without an image extension are ignored. A missing area is empty.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::media::domain::image_source::{ImageSource, ReferenceImage};
use crate::shared::constants::is_image_path;
use crate::shared::image_id::ImageId;

/// Lists the image files directly inside `root`, sorted by identity.
pub fn scan_dataset(root: &Path) -> io::Result<Vec<ImageSource>> {
    let mut images = Vec::new();
    for path in visible_entries(root)? {
        if path.is_file() && is_image_path(&path) {
            if let Some(id) = ImageId::relative_to(root, &path) {
                images.push(ImageSource { id, path });
            } else {
                log::warn!("Skipping non UTF-8 path {}", path.display());
            }
        }
    }
    images.sort();
    Ok(images)
}

/// Lists known-people reference images with their labels, sorted by
/// `(label, identity)`.
pub fn scan_known_people(root: &Path) -> io::Result<Vec<ReferenceImage>> {
    let mut references = Vec::new();
    for path in visible_entries(root)? {
        if path.is_dir() {
            let Some(label) = file_name(&path) else {
                continue;
            };
            for inner in visible_entries(&path)? {
                if inner.is_file() && is_image_path(&inner) {
                    push_reference(&mut references, root, label.clone(), inner);
                }
            }
        } else if path.is_file() && is_image_path(&path) {
            let Some(label) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            push_reference(&mut references, root, label.to_string(), path.clone());
        }
    }
    references.sort();
    Ok(references)
}

fn push_reference(references: &mut Vec<ReferenceImage>, root: &Path, label: String, path: PathBuf) {
    if let Some(id) = ImageId::relative_to(root, &path) {
        references.push(ReferenceImage {
            label,
            source: ImageSource { id, path },
        });
    } else {
        log::warn!("Skipping non UTF-8 path {}", path.display());
    }
}

fn visible_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        match file_name(&path) {
            Some(name) if name.starts_with('.') => {}
            Some(_) => paths.push(path),
            None => log::warn!("Skipping non UTF-8 path {}", path.display()),
        }
    }
    Ok(paths)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    fn labels_and_ids(refs: &[ReferenceImage]) -> Vec<(String, String)> {
        refs.iter()
            .map(|r| (r.label.clone(), r.source.id.to_string()))
            .collect()
    }

    #[test]
    fn test_scan_dataset_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.png"));
        touch(&dir.path().join("a.JPG"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join(".hidden.png"));
        touch(&dir.path().join("nested").join("c.png"));

        let images = scan_dataset(dir.path()).unwrap();
        let ids: Vec<_> = images.iter().map(|i| i.id.to_string()).collect();
        assert_eq!(ids, vec!["a.JPG", "b.png"]);
        assert_eq!(images[1].path, dir.path().join("b.png"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_are_skipped_not_fatal() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("ok.png"));
        let bad = dir.path().join(OsStr::from_bytes(b"bad\xff.png"));
        // Some filesystems refuse non UTF-8 names outright.
        if fs::write(&bad, b"x").is_err() {
            return;
        }

        let ids: Vec<_> = scan_dataset(dir.path())
            .unwrap()
            .iter()
            .map(|i| i.id.to_string())
            .collect();
        assert_eq!(ids, vec!["ok.png"]);
        let refs = scan_known_people(dir.path()).unwrap();
        assert_eq!(labels_and_ids(&refs), vec![("ok".to_string(), "ok.png".to_string())]);
    }

    #[test]
    fn test_scan_missing_area_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(scan_dataset(&missing).unwrap().is_empty());
        assert!(scan_known_people(&missing).unwrap().is_empty());
    }

    #[test]
    fn test_known_people_file_stem_policy() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Alice.jpg"));
        touch(&dir.path().join("Bob.png"));

        let refs = scan_known_people(dir.path()).unwrap();
        assert_eq!(
            labels_and_ids(&refs),
            vec![
                ("Alice".to_string(), "Alice.jpg".to_string()),
                ("Bob".to_string(), "Bob.png".to_string()),
            ]
        );
    }

    #[test]
    fn test_known_people_directory_policy_merges_with_stem() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Alice.jpg"));
        touch(&dir.path().join("Alice").join("2.png"));
        touch(&dir.path().join("Alice").join("1.png"));
        touch(&dir.path().join("Alice").join("deeper").join("3.png"));
        touch(&dir.path().join("Carol").join("readme.md"));

        let refs = scan_known_people(dir.path()).unwrap();
        assert_eq!(
            labels_and_ids(&refs),
            vec![
                ("Alice".to_string(), "Alice.jpg".to_string()),
                ("Alice".to_string(), "Alice/1.png".to_string()),
                ("Alice".to_string(), "Alice/2.png".to_string()),
            ]
        );
    }
}
