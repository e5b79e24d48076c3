use crate::ingress::IngressList;
use crate::types::Snapshot;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum IntentError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("API server responded with {0}")]
    Status(StatusCode),
    #[error("API server unavailable after retries")]
    RetriesExceeded,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not decode ingress list: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Supplies the current routing intent as one consistent snapshot.
#[async_trait]
pub trait IntentSource: Send + Sync {
    async fn list_rules(&self) -> Result<Snapshot, IntentError>;
}

/// Reads an ingress list (as returned by the API server) from a file.
pub struct FilesystemIntentSource {
    path: PathBuf,
}

impl FilesystemIntentSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FilesystemIntentSource { path: path.into() }
    }
}

#[async_trait]
impl IntentSource for FilesystemIntentSource {
    async fn list_rules(&self) -> Result<Snapshot, IntentError> {
        let data = tokio::fs::read(&self.path).await?;
        let list: IngressList = serde_json::from_slice(&data)?;
        Ok(Snapshot::new(list.routing_rules()))
    }
}
