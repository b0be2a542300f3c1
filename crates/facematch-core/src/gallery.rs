//! Reference-embedding gallery.
//!
//! The gallery scans a directory tree of labeled reference images, encodes one
//! face per image and keeps the resulting identities in memory. Loading is
//! lazy: the first [`Gallery::get`] on an empty gallery triggers a scan, later
//! calls are served from the cache until a forced reload.
//!
//! A reload is staged: identities are collected into a fresh list and swapped
//! in only once every reference image has been encoded. If any image fails the
//! previously loaded identities stay in place.

use crate::config::GalleryConfig;
use crate::pipeline::{PipelineError, ReferenceEncoder};
use crate::types::{DimensionMismatch, Identity};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read gallery directory {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode reference image {path}: {source}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: PipelineError,
    },
    #[error("reference image {path} does not match the gallery embedding size: {source}")]
    Dimension {
        path: PathBuf,
        #[source]
        source: DimensionMismatch,
    },
    #[error("gallery has not been loaded")]
    NotLoaded,
}

#[derive(Default)]
pub(crate) struct GalleryState {
    pub(crate) identities: Vec<Identity>,
    loaded: bool,
}

impl GalleryState {
    /// Embedding length shared by every identity.
    pub(crate) fn dim(&self) -> Option<usize> {
        self.identities.first().map(|identity| identity.embedding.dim())
    }
}

/// Cached set of known identities built from a directory of reference images.
pub struct Gallery {
    source_path: PathBuf,
    extensions: Vec<String>,
    /// Held for the whole duration of a load, which serializes reloads.
    encoder: Mutex<Box<dyn ReferenceEncoder>>,
    state: RwLock<GalleryState>,
}

impl Gallery {
    /// Create an unloaded gallery. Nothing is read until the first access.
    pub fn new(config: GalleryConfig, encoder: impl ReferenceEncoder + 'static) -> Self {
        Self {
            source_path: config.source_path,
            extensions: config.extensions,
            encoder: Mutex::new(Box::new(encoder)),
            state: RwLock::new(GalleryState::default()),
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Whether a load has completed successfully.
    pub fn is_loaded(&self) -> bool {
        self.state().loaded
    }

    pub fn len(&self) -> usize {
        self.state().identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().identities.is_empty()
    }

    /// Embedding length of the loaded identities, if any.
    pub fn dim(&self) -> Option<usize> {
        self.state().dim()
    }

    /// Scan the source directory and replace the cached identities.
    ///
    /// Returns the number of identities loaded.
    pub fn load(&self) -> Result<usize, GalleryError> {
        let mut encoder = self.lock_encoder();
        self.load_with(&mut **encoder)
    }

    /// Cached identities, loading first if the cache is empty or `force_reload` is set.
    pub fn get(&self, force_reload: bool) -> Result<Vec<Identity>, GalleryError> {
        self.ensure_loaded(force_reload)?;
        Ok(self.state().identities.clone())
    }

    /// Cached identities without ever touching the filesystem.
    pub fn cached(&self) -> Result<Vec<Identity>, GalleryError> {
        let state = self.state();
        if !state.loaded {
            return Err(GalleryError::NotLoaded);
        }
        Ok(state.identities.clone())
    }

    pub(crate) fn ensure_loaded(&self, force_reload: bool) -> Result<(), GalleryError> {
        if !force_reload && !self.state().identities.is_empty() {
            return Ok(());
        }

        let mut encoder = self.lock_encoder();
        // Another caller may have finished a load while we waited.
        if !force_reload && !self.state().identities.is_empty() {
            return Ok(());
        }
        self.load_with(&mut **encoder).map(|_| ())
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, GalleryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn state_mut(&self) -> RwLockWriteGuard<'_, GalleryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_encoder(&self) -> MutexGuard<'_, Box<dyn ReferenceEncoder>> {
        self.encoder.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_with(&self, encoder: &mut dyn ReferenceEncoder) -> Result<usize, GalleryError> {
        let mut files = Vec::new();
        collect_files(&self.source_path, &mut files)?;

        let mut staged: Vec<Identity> = Vec::new();
        for path in files {
            if !has_extension(&path, &self.extensions) {
                tracing::trace!(path = %path.display(), "skipping unsupported file");
                continue;
            }

            let embedding = encoder
                .encode_reference(&path)
                .map_err(|source| GalleryError::Encoding { path: path.clone(), source })?;

            if let Some(first) = staged.first() {
                if first.embedding.dim() != embedding.dim() {
                    return Err(GalleryError::Dimension {
                        path,
                        source: DimensionMismatch {
                            expected: first.embedding.dim(),
                            actual: embedding.dim(),
                        },
                    });
                }
            }

            let name = identity_name(&path);
            tracing::debug!(path = %path.display(), name = %name, "encoded reference image");
            staged.push(Identity { name, embedding });
        }

        let count = staged.len();
        {
            let mut state = self.state_mut();
            state.identities = staged;
            state.loaded = true;
        }

        tracing::info!(
            path = %self.source_path.display(),
            identities = count,
            "gallery loaded"
        );
        Ok(count)
    }
}

/// Recursively list regular files under `dir`, in file-name order per directory.
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), GalleryError> {
    let load_err = |source: io::Error| GalleryError::Load { path: dir.to_path_buf(), source };

    let mut entries = std::fs::read_dir(dir)
        .map_err(load_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(load_err)?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        if entry.file_type().map_err(load_err)?.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|allowed| allowed.strip_prefix('.').unwrap_or(allowed) == ext)
}

fn identity_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    capwords(&stem)
}

/// Split on whitespace, capitalize each word (rest lower-cased) and join with single spaces.
pub fn capwords(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
