//! Recursive corpus loading.
//!
//! Walks a corpus root, keeps files with the wanted extension, sorts them
//! by path for a deterministic order, applies the optional document cap
//! and reads contents with up to `num_workers` reads in flight.

use anyhow::{bail, Result};
use futures_util::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// A corpus file read into memory.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub content: String,
}

/// List files under `root` ending in `.{extension}`, sorted by path.
///
/// A missing root is an empty corpus. Other files (annotation sidecars
/// next to documents, stray editor files) are not part of the corpus.
pub fn list_files(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    if !root.is_dir() {
        bail!("Corpus root is not a directory: {}", root.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

/// Load every corpus file under `root`, capped to `limit` files.
///
/// Unreadable files are logged and left out.
pub async fn load_corpus(
    root: &Path,
    extension: &str,
    limit: Option<usize>,
    num_workers: usize,
) -> Result<Vec<LoadedFile>> {
    let mut files = list_files(root, extension)?;
    if let Some(limit) = limit {
        files.truncate(limit);
    }

    let loaded = stream::iter(files.into_iter().map(|path| async move {
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Some(LoadedFile { path, content }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable corpus file");
                None
            }
        }
    }))
    .buffered(num_workers.max(1))
    .filter_map(|f| async move { f })
    .collect()
    .await;

    Ok(loaded)
}
