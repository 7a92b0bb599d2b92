use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Extension marking a replay that is still being processed
const PENDING_EXTENSION: &str = "rep.pending";
/// Extension of the locally written derived JSON
const DERIVED_EXTENSION: &str = "rep.json";

/// Staging errors
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Failed to create staging file: {0}")]
    Create(#[source] io::Error),

    #[error("Failed to write staging file: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to read staging file: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to remove staging file: {0}")]
    Remove(#[source] io::Error),

    #[error("Upload exceeds maximum size of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Failed to read upload body: {0}")]
    Body(String),
}

impl StagingError {
    /// Whether the failure came from local disk rather than the request
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            StagingError::Create(_)
                | StagingError::Write(_)
                | StagingError::Read(_)
                | StagingError::Remove(_)
        )
    }
}

/// An upload held on local disk while the pipeline works on it
#[derive(Debug)]
pub struct StagedArtifact {
    handle: Uuid,
    path: PathBuf,
    derived_path: PathBuf,
    size_bytes: u64,
    removed: bool,
}

impl StagedArtifact {
    pub fn handle(&self) -> Uuid {
        self.handle
    }

    /// Local path of the staged replay bytes
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        for path in [&self.path, &self.derived_path] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed abandoned staging file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove abandoned staging file"),
            }
        }
    }
}

/// Directory of staged uploads. Files are named after a random UUID, so
/// concurrent uploads never share a path.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Create the staging area, making sure its directory exists
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(StagingError::Create)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh, empty staging file
    pub async fn create(&self) -> Result<StagedArtifact, StagingError> {
        let handle = Uuid::new_v4();
        let path = self.dir.join(format!("{}.{}", handle, PENDING_EXTENSION));
        let derived_path = self.dir.join(format!("{}.{}", handle, DERIVED_EXTENSION));

        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(StagingError::Create)?;

        debug!(handle = %handle, path = %path.display(), "Staging file created");

        Ok(StagedArtifact {
            handle,
            path,
            derived_path,
            size_bytes: 0,
            removed: false,
        })
    }

    /// Stream a request body into the staged file, refusing more than `limit` bytes.
    ///
    /// Returns the final size. On error the file may hold a partial body and
    /// must not be decoded.
    pub async fn write<S, E>(
        &self,
        staged: &mut StagedArtifact,
        mut body: S,
        limit: u64,
    ) -> Result<u64, StagingError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&staged.path)
            .await
            .map_err(StagingError::Write)?;

        let mut written = staged.size_bytes;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StagingError::Body(e.to_string()))?;
            written += chunk.len() as u64;
            if written > limit {
                return Err(StagingError::TooLarge { limit });
            }
            file.write_all(&chunk).await.map_err(StagingError::Write)?;
            staged.size_bytes = written;
        }

        file.flush().await.map_err(StagingError::Write)?;
        file.sync_all().await.map_err(StagingError::Write)?;

        Ok(written)
    }

    /// Read back the staged replay bytes
    pub async fn read(&self, staged: &StagedArtifact) -> Result<Bytes, StagingError> {
        fs::read(&staged.path)
            .await
            .map(Bytes::from)
            .map_err(StagingError::Read)
    }

    /// Write the derived JSON next to the staged replay
    pub async fn write_derived(
        &self,
        staged: &StagedArtifact,
        json: &[u8],
    ) -> Result<(), StagingError> {
        fs::write(&staged.derived_path, json)
            .await
            .map_err(StagingError::Write)
    }

    /// Delete the staged files. Removing twice is not an error.
    pub async fn remove(&self, staged: &mut StagedArtifact) -> Result<(), StagingError> {
        for path in [&staged.path, &staged.derived_path] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StagingError::Remove(e)),
            }
        }
        staged.removed = true;
        debug!(handle = %staged.handle, "Staging files removed");
        Ok(())
    }
}
