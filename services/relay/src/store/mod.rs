mod local;
mod s3;

pub use local::LocalArtifactStore;
pub use s3::S3ArtifactStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::keys::RemoteKey;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const REPLAY_CONTENT_TYPE: &str = "application/octet-stream";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Object store errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to store {key}: {message}")]
    Upload { key: String, message: String },

    #[error("Storing {key} timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },

    #[error("Invalid object key {0}")]
    InvalidKey(String),

    #[error("Local store IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An object to relay
#[derive(Debug, Clone)]
pub struct Object {
    pub body: Bytes,
    pub content_type: &'static str,
    pub metadata: Vec<(String, String)>,
}

impl Object {
    /// The uploaded replay, stored byte for byte
    pub fn replay(body: Bytes) -> Self {
        Self {
            body,
            content_type: REPLAY_CONTENT_TYPE,
            metadata: Vec::new(),
        }
    }

    /// Derived JSON of a replay
    pub fn derived(body: Bytes) -> Self {
        Self {
            body,
            content_type: JSON_CONTENT_TYPE,
            metadata: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Destination of relayed replays
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `object` under `key`, replacing any previous object
    async fn put(&self, key: &RemoteKey, object: Object) -> Result<(), RelayError>;

    /// Backend name for logs
    fn backend(&self) -> &'static str;
}

/// Build the configured store backend
pub async fn from_config(config: &StoreConfig) -> anyhow::Result<Arc<dyn ArtifactStore>> {
    let store: Arc<dyn ArtifactStore> = match config.backend {
        StoreBackend::S3 => Arc::new(S3ArtifactStore::new(config).await?),
        StoreBackend::Local => Arc::new(LocalArtifactStore::new(&config.local_root).await?),
    };
    Ok(store)
}
