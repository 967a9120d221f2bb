pub mod github_api;
pub mod memory_store;

pub use github_api::GitHubStore;
pub use memory_store::MemoryStore;

use crate::models::VersionToken;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Failures of the remote document store.
///
/// A missing document is not an error: reads return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write was based on a stale version, or omitted the version of an existing document
    #[error("Version conflict writing '{path}': {message}")]
    Conflict { path: String, message: String },

    #[error("Document at '{path}' is corrupt: {details}")]
    CorruptDocument { path: String, details: String },

    #[error("GitHub API Error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// Connection failure or timeout; the request never got an answer
    #[error("Document store unreachable: {0}")]
    Unreachable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, StoreError::Unreachable(_))
    }

    fn corrupt(path: &str, details: impl ToString) -> Self {
        StoreError::CorruptDocument {
            path: path.to_string(),
            details: details.to_string(),
        }
    }
}

/// A decoded document together with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub content: Value,
    pub version: VersionToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    /// Version of the document after the write
    pub version: VersionToken,
    /// Revision id in the store's history, when the store reports one
    pub commit: Option<String>,
}

/// Versioned key-value document store addressed by path
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_document(&self, path: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Write `content` at `path`.
    ///
    /// `version` must be the token from the latest read of an existing document and
    /// `None` only when creating it.
    async fn write_document(
        &self,
        path: &str,
        content: &Value,
        message: &str,
        version: Option<&VersionToken>,
    ) -> Result<WriteResult, StoreError>;

    /// Current version of `path` without validating its content
    async fn read_version(&self, path: &str) -> Result<Option<VersionToken>, StoreError> {
        Ok(self.read_document(path).await?.map(|doc| doc.version))
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.read_document(path).await?.is_some())
    }
}

/// Encode a JSON document the way the store keeps it: pretty JSON, UTF-8, base64
pub fn encode_content(path: &str, content: &Value) -> Result<String, StoreError> {
    let json = serde_json::to_string_pretty(content).map_err(|e| StoreError::corrupt(path, e))?;
    Ok(STANDARD.encode(json.as_bytes()))
}

/// Inverse of [`encode_content`]. Line breaks inside the base64 payload are ignored.
pub fn decode_content(path: &str, encoded: &str) -> Result<Value, StoreError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| StoreError::corrupt(path, format!("invalid base64: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::corrupt(path, format!("invalid JSON: {}", e)))
}

/// Read a document and validate it against the schema `T`
pub async fn read_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &str,
) -> Result<Option<(T, VersionToken)>, StoreError> {
    let Some(doc) = store.read_document(path).await? else {
        return Ok(None);
    };
    let typed = serde_json::from_value(doc.content).map_err(|e| StoreError::corrupt(path, e))?;
    Ok(Some((typed, doc.version)))
}
