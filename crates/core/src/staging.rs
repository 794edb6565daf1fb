//! Filesystem staging of connector configuration and catalog payloads.
//!
//! Staged files live under a fixed root that is mounted into the
//! container:
//!
//! ```text
//! <root>/connector-data/config/<name>.json
//! <root>/connector-data/catalog/<name>.json
//! ```
//!
//! [`Stager::stage`] returns a [`StagedFiles`] guard. Dropping or
//! releasing the guard removes every file it staged, so a run can never
//! leak files, including when staging itself fails half way.

use std::io;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Directory under the staging root that holds all connector payloads.
pub const CONNECTOR_DATA_DIR: &str = "connector-data";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What a staged payload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Config,
    Catalog,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 2] = [Self::Config, Self::Catalog];

    /// Directory name under [`CONNECTOR_DATA_DIR`].
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Catalog => "catalog",
        }
    }
}

/// How a payload is written when the target already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingMode {
    /// Write on every attempt, replacing existing content.
    AlwaysOverwrite,
    /// Keep existing content; write only if the file is absent.
    WriteOnce,
}

/// Errors raised while staging. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Unable to create folders for {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A payload made visible to the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub kind: PayloadKind,
    /// Absolute host path.
    pub path: PathBuf,
    /// `true` when [`StagingMode::WriteOnce`] found existing content.
    pub reused: bool,
}

/// Path of a payload relative to the staging root (or to the mount target
/// inside the container).
pub fn relative_path(kind: PayloadKind, name: &str) -> PathBuf {
    Path::new(CONNECTOR_DATA_DIR)
        .join(kind.dir_name())
        .join(format!("{name}.json"))
}

// ---------------------------------------------------------------------------
// Stager
// ---------------------------------------------------------------------------

/// Writes payloads under a fixed staging root.
#[derive(Debug, Clone)]
pub struct Stager {
    root: PathBuf,
}

impl Stager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute host path for a payload.
    pub fn path_for(&self, kind: PayloadKind, name: &str) -> PathBuf {
        self.root.join(relative_path(kind, name))
    }

    /// Stage every payload for run `name`.
    ///
    /// Files are written in order; if any write fails, the files already
    /// staged for this call are removed before the error is returned.
    pub async fn stage(
        &self,
        name: &str,
        payloads: &[(PayloadKind, &[u8])],
        mode: StagingMode,
    ) -> Result<StagedFiles, StagingError> {
        let mut staged = StagedFiles::empty();
        for (kind, bytes) in payloads {
            let path = self.path_for(*kind, name);
            let reused = write_payload(&path, bytes, mode).await?;
            tracing::debug!(path = %path.display(), reused, "Staged connector payload");
            staged.files.push(StagedFile {
                kind: *kind,
                path,
                reused,
            });
        }
        Ok(staged)
    }

    /// Remove every payload kind staged under `name`.
    ///
    /// Already-absent files are not an error. Returns how many files were
    /// actually removed.
    pub async fn remove(&self, name: &str) -> Result<usize, StagingError> {
        let mut removed = 0;
        for kind in PayloadKind::ALL {
            let path = self.path_for(kind, name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(StagingError::Remove { path, source }),
            }
        }
        Ok(removed)
    }
}

/// Write one payload. Returns `true` if existing content was reused.
async fn write_payload(path: &Path, bytes: &[u8], mode: StagingMode) -> Result<bool, StagingError> {
    if mode == StagingMode::WriteOnce && tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(true);
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StagingError::CreateDir {
                path: path.to_path_buf(),
                source,
            })?;
    }

    // `fs::write` truncates, so existing content is replaced, never appended to.
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| StagingError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(false)
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Files staged for one run. Removes them when released or dropped.
#[derive(Debug)]
pub struct StagedFiles {
    files: Vec<StagedFile>,
}

impl StagedFiles {
    fn empty() -> Self {
        Self { files: Vec::new() }
    }

    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    /// Host path of the staged payload of `kind`, if any.
    pub fn path(&self, kind: PayloadKind) -> Option<&Path> {
        self.files
            .iter()
            .find(|f| f.kind == kind)
            .map(|f| f.path.as_path())
    }

    /// Remove the staged files now. Returns how many were removed.
    pub async fn release(mut self) -> usize {
        let mut removed = 0;
        for file in std::mem::take(&mut self.files) {
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => removed += 1,
                Err(e) => log_remove_failure(&file, &e),
            }
        }
        removed
    }
}

fn log_remove_failure(file: &StagedFile, e: &io::Error) {
    if e.kind() != io::ErrorKind::NotFound {
        tracing::warn!(
            path = %file.path.display(),
            error = %e,
            "Failed to remove staged file",
        );
    }
}

impl Drop for StagedFiles {
    // Last resort for aborted runs; `release` is the normal path.
    fn drop(&mut self) {
        for file in self.files.drain(..) {
            if let Err(e) = std::fs::remove_file(&file.path) {
                log_remove_failure(&file, &e);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
