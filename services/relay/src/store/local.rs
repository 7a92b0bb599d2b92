use super::{ArtifactStore, Object, RelayError};
use crate::keys::RemoteKey;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

/// Filesystem writer for relayed replays.
///
/// Objects land at `{root}/{key}`; with the default layout that is the
/// directory served under `/replays`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, RelayError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Convert an object key to a path below the root
    fn key_to_path(&self, key: &RemoteKey) -> Result<PathBuf, RelayError> {
        let key = key.as_str();
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|segment| segment.is_empty() || segment == "..")
        {
            return Err(RelayError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

/// Temporary sibling of an object being written. Removed on drop unless
/// renamed into place, so a cancelled put leaves nothing in the served tree.
struct TempFile {
    path: PathBuf,
    persisted: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(mut self, target: &Path) -> std::io::Result<()> {
        fs::rename(&self.path, target).await?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, key: &RemoteKey, object: Object) -> Result<(), RelayError> {
        let path = self.key_to_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write a sibling first so readers never see a half-written object
        let tmp = TempFile::new(path.with_file_name(format!(
            ".{}.{}.tmp",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Uuid::new_v4()
        )));

        let mut file = fs::File::create(tmp.path()).await?;
        file.write_all(&object.body).await?;
        file.sync_all().await?;
        drop(file);
        tmp.persist(&path).await?;

        info!(
            key = %key,
            path = %path.display(),
            size_bytes = object.body.len(),
            "Object written to local store"
        );
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
