//! Scratch files
//!
//! Every file a request puts on disk (the staged upload, the converter's
//! output) is a [`ScratchFile`]. Releasing one is idempotent, and a scratch
//! file that is dropped without being released removes itself, so early
//! returns, `?` and panics all leave the work directory clean.

use std::io;
use std::path::{Path, PathBuf};

/// Prefix of every staged upload in the work directory
const UPLOAD_PREFIX: &str = "upload-";

/// Scratch-file errors
#[derive(Debug, thiserror::Error)]
pub enum ScratchError {
    #[error("Failed to prepare work directory {path}: {source}")]
    WorkDir { path: PathBuf, source: io::Error },

    #[error("Failed to allocate scratch file: {0}")]
    Allocate(#[source] io::Error),
}

// ============================================================================
// Scratch Directory
// ============================================================================

/// Allocator for uniquely named scratch files under one work directory
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Use `root` as the work directory, creating it if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ScratchError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| ScratchError::WorkDir {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new, empty, uniquely named file ending in `suffix`
    pub fn allocate(&self, suffix: &str) -> Result<ScratchFile, ScratchError> {
        let (_file, path) = tempfile::Builder::new()
            .prefix(UPLOAD_PREFIX)
            .suffix(suffix)
            .tempfile_in(&self.root)
            .map_err(ScratchError::Allocate)?
            .keep()
            .map_err(|e| ScratchError::Allocate(e.error))?;

        tracing::trace!(path = %path.display(), "Allocated scratch file");

        Ok(ScratchFile::owned(path))
    }

    /// Take responsibility for a path that may or may not exist yet,
    /// such as the converter's well-known output file
    pub fn claim(&self, path: impl Into<PathBuf>) -> ScratchFile {
        ScratchFile::owned(path.into())
    }
}

// ============================================================================
// Scratch File
// ============================================================================

/// A path removed when released or dropped
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    /// Cleared once the file has been released
    owned: bool,
}

impl ScratchFile {
    fn owned(path: PathBuf) -> Self {
        Self { path, owned: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Remove whatever is at the path right now, keeping responsibility for it
    pub fn clear(&self) {
        if self.owned {
            remove_quietly(&self.path);
        }
    }

    /// Remove the file if it still exists.
    ///
    /// Calling this again, or on a file that never got created, does
    /// nothing. Removal failures are logged, never returned: cleanup must
    /// not replace whatever error the caller is already propagating.
    pub fn release(&mut self) {
        if !self.owned {
            return;
        }
        self.owned = false;
        remove_quietly(&self.path);
    }
}

/// Remove `path`; a missing file is fine, anything else is logged
fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::trace!(path = %path.display(), "Removed scratch file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to remove scratch file"
        ),
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        self.release();
    }
}
