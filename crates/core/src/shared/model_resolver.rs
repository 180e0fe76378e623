use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::{
    EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL, YOLO_MODEL_NAME, YOLO_MODEL_URL,
};

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// A downloadable ONNX model: file name in the cache plus its source URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub url: &'static str,
}

pub const DETECTOR_MODEL: ModelSpec = ModelSpec {
    name: YOLO_MODEL_NAME,
    url: YOLO_MODEL_URL,
};

pub const EMBEDDING_MODEL: ModelSpec = ModelSpec {
    name: EMBEDDING_MODEL_NAME,
    url: EMBEDDING_MODEL_URL,
};

/// Resolve a model in the platform cache directory, downloading if needed.
pub fn resolve(
    spec: ModelSpec,
    bundled_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    resolve_in(&model_cache_dir()?, spec, bundled_dir, progress)
}

/// Resolve a model against an explicit cache directory.
///
/// Resolution order:
/// 1. `cache_dir`
/// 2. Bundled path (for development / pre-packaged installs)
/// 3. Download from the model's URL into `cache_dir`
pub fn resolve_in(
    cache_dir: &Path,
    spec: ModelSpec,
    bundled_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    let cached_path = cache_dir.join(spec.name);
    if cached_path.exists() {
        log::debug!("Model {} found in cache", spec.name);
        return Ok(cached_path);
    }

    if let Some(dir) = bundled_dir {
        let bundled_path = dir.join(spec.name);
        if bundled_path.exists() {
            log::debug!("Model {} found at {}", spec.name, bundled_path.display());
            return Ok(bundled_path);
        }
    }

    fs::create_dir_all(cache_dir).map_err(ModelResolveError::CacheDir)?;
    log::info!("Downloading {} from {}", spec.name, spec.url);
    download(spec.url, &cached_path, progress)?;
    Ok(cached_path)
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/FaceSort/models/`
/// - Linux: `$XDG_CACHE_HOME/FaceSort/models/` or `~/.cache/FaceSort/models/`
/// - Windows: `%LOCALAPPDATA%/FaceSort/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join("FaceSort").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join("FaceSort").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");

    let result = download_inner(url, dest, &temp_path, progress);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn download_inner(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<ProgressFn>,
) -> Result<(), ModelResolveError> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ModelResolveError::Write { path, source }
    };

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;
    let mut file = fs::File::create(temp_path).map_err(write_err(temp_path))?;

    // Models run to hundreds of MB, stream instead of buffering.
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = response.read(&mut buf).map_err(write_err(temp_path))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err(temp_path))?;
        downloaded += n as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }

    file.flush().map_err(write_err(temp_path))?;
    drop(file);

    fs::rename(temp_path, dest).map_err(write_err(dest))
}
