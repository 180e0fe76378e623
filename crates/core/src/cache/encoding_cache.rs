use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::domain::embedding_extractor::ExtractionError;
use crate::shared::face_embedding::FaceEmbedding;
use crate::shared::fingerprint::Fingerprint;

use super::single_flight::{Flight, SingleFlight};

const CACHE_FORMAT_VERSION: u32 = 1;

pub type ExtractionResult = Result<Vec<FaceEmbedding>, ExtractionError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Embeddings computed for one image, valid while the fingerprint matches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub embeddings: Vec<FaceEmbedding>,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<String, CacheEntry>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a stored entry or another caller's computation.
    pub hits: usize,
    /// Times the compute function actually ran.
    pub computations: usize,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Bumped by `invalidate_all`; results computed under an older
    /// generation are returned to their caller but never stored.
    generation: u64,
}

/// Memoizes per-image embeddings across runs.
///
/// Lookups are keyed by source path and validated against a content
/// fingerprint. Concurrent misses on the same key share one computation.
/// Failed extractions are never stored. The backing JSON file is only
/// written by `persist`/`close`.
pub struct EncodingCache {
    path: Option<PathBuf>,
    state: RwLock<CacheState>,
    flights: SingleFlight<ExtractionResult>,
    /// Serializes file writes against file removal.
    file_lock: Mutex<()>,
    hits: AtomicUsize,
    computations: AtomicUsize,
    dirty: AtomicBool,
    recovered: bool,
}

impl EncodingCache {
    /// Loads the cache at `path`. A missing file starts empty; an unreadable
    /// or malformed one is logged and also starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (entries, recovered) = match load_entries(&path) {
            Ok(entries) => {
                log::debug!("Loaded {} cached encodings from {}", entries.len(), path.display());
                (entries, false)
            }
            Err(LoadError::Missing) => (HashMap::new(), false),
            Err(LoadError::Unusable(reason)) => {
                log::warn!(
                    "Ignoring unusable encoding cache {}: {reason}",
                    path.display()
                );
                (HashMap::new(), true)
            }
        };
        Self::with_entries(Some(path), entries, recovered)
    }

    /// A cache that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self::with_entries(None, HashMap::new(), false)
    }

    fn with_entries(
        path: Option<PathBuf>,
        entries: HashMap<String, CacheEntry>,
        recovered: bool,
    ) -> Self {
        Self {
            path,
            state: RwLock::new(CacheState {
                entries,
                generation: 0,
            }),
            flights: SingleFlight::new(),
            file_lock: Mutex::new(()),
            hits: AtomicUsize::new(0),
            computations: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
            recovered,
        }
    }

    /// Returns stored embeddings for `key` if `fingerprint` still matches,
    /// otherwise runs `compute` (at most once per key across concurrent
    /// callers) and stores a successful result.
    pub fn get_or_compute<F>(&self, key: &str, fingerprint: &Fingerprint, compute: F) -> ExtractionResult
    where
        F: FnOnce() -> ExtractionResult,
    {
        if let Some(embeddings) = self.lookup(key, fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(embeddings);
        }

        let flight_key = format!("{key}\0{}", fingerprint.blake3);
        let (result, flight) = self.flights.run(&flight_key, || {
            // Another leader may have stored this entry between our miss and
            // winning the flight.
            if let Some(embeddings) = self.lookup(key, fingerprint) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(embeddings);
            }
            let generation = self.generation();
            self.computations.fetch_add(1, Ordering::Relaxed);
            let result = compute();
            if let Ok(embeddings) = &result {
                self.store(key, fingerprint, embeddings, generation);
            }
            result
        });
        if flight == Flight::Shared {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Drops every entry, in memory and on disk. Computations already in
    /// flight still return to their callers but are not stored.
    pub fn invalidate_all(&self) -> Result<(), CacheError> {
        let _file = self.file_lock.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.entries.clear();
            state.generation += 1;
        }
        self.dirty.store(false, Ordering::SeqCst);

        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => log::debug!("Removed encoding cache {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(path, e)),
            }
        }
        Ok(())
    }

    /// Drops entries whose key is not in `keys`; returns how many went.
    pub fn retain(&self, keys: &HashSet<String>) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let before = state.entries.len();
        state.entries.retain(|key, _| keys.contains(key));
        let removed = before - state.entries.len();
        if removed > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }
        removed
    }

    /// Writes the cache to its backing file if anything changed since the
    /// last write. The file is replaced atomically.
    pub fn persist(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _file = self.file_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let json = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let file = CacheFile {
                version: CACHE_FORMAT_VERSION,
                entries: state
                    .entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            };
            serde_json::to_vec(&file)?
        };

        if let Err(e) = write_atomically(path, &json) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        log::debug!("Persisted encoding cache to {}", path.display());
        Ok(())
    }

    /// Persists and releases the cache.
    pub fn close(self) -> Result<(), CacheError> {
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
        }
    }

    /// True when `open` discarded an unreadable or malformed file.
    pub fn was_recovered(&self) -> bool {
        self.recovered
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lookup(&self, key: &str, fingerprint: &Fingerprint) -> Option<Vec<FaceEmbedding>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .entries
            .get(key)
            .filter(|entry| &entry.fingerprint == fingerprint)
            .map(|entry| entry.embeddings.clone())
    }

    fn generation(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    fn store(&self, key: &str, fingerprint: &Fingerprint, embeddings: &[FaceEmbedding], generation: u64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation != generation {
            log::debug!("Discarding encoding for {key} computed before invalidation");
            return;
        }
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                fingerprint: fingerprint.clone(),
                embeddings: embeddings.to_vec(),
            },
        );
        self.dirty.store(true, Ordering::SeqCst);
    }
}

enum LoadError {
    Missing,
    Unusable(String),
}

fn load_entries(path: &Path) -> Result<HashMap<String, CacheEntry>, LoadError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(LoadError::Missing),
        Err(e) => return Err(LoadError::Unusable(e.to_string())),
    };
    let file: CacheFile =
        serde_json::from_slice(&bytes).map_err(|e| LoadError::Unusable(e.to_string()))?;
    if file.version != CACHE_FORMAT_VERSION {
        return Err(LoadError::Unusable(format!(
            "unsupported format version {}",
            file.version
        )));
    }
    Ok(file.entries.into_iter().collect())
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| CacheError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        CacheError::io(path, e)
    })
}
