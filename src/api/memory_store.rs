use super::{decode_content, encode_content, DocumentStore, StoreError, StoredDocument, WriteResult};
use crate::models::VersionToken;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// In-process document store with the same version rules as the hosted one.
///
/// Content is kept base64-encoded so reads go through the same decode path.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, (String, VersionToken)>>,
    next_version: AtomicU64,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`StoreError::Unreachable`]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Store an already-encoded payload as-is, bypassing validation
    pub fn insert_raw(&self, path: &str, encoded: &str) -> VersionToken {
        let version = self.bump();
        self.lock()
            .insert(path.to_string(), (encoded.to_string(), version.clone()));
        version
    }

    fn bump(&self) -> VersionToken {
        let n = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        VersionToken::new(format!("v{:08x}", n))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, VersionToken)>> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read_document(&self, path: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.check_online()?;
        let entry = self.lock().get(path).cloned();
        match entry {
            Some((encoded, version)) => Ok(Some(StoredDocument {
                content: decode_content(path, &encoded)?,
                version,
            })),
            None => Ok(None),
        }
    }

    async fn read_version(&self, path: &str) -> Result<Option<VersionToken>, StoreError> {
        self.check_online()?;
        Ok(self.lock().get(path).map(|(_, version)| version.clone()))
    }

    async fn write_document(
        &self,
        path: &str,
        content: &Value,
        _message: &str,
        version: Option<&VersionToken>,
    ) -> Result<WriteResult, StoreError> {
        self.check_online()?;
        let encoded = encode_content(path, content)?;

        let mut documents = self.lock();
        match (documents.get(path), version) {
            (Some(_), None) => {
                return Err(StoreError::Conflict {
                    path: path.to_string(),
                    message: "version wasn't supplied for an existing document".to_string(),
                })
            }
            (Some((_, current)), Some(given)) if current != given => {
                return Err(StoreError::Conflict {
                    path: path.to_string(),
                    message: format!("{} does not match {}", path, given),
                })
            }
            (None, Some(given)) => {
                return Err(StoreError::Conflict {
                    path: path.to_string(),
                    message: format!("{} does not exist at version {}", path, given),
                })
            }
            _ => {}
        }

        let new_version = self.bump();
        documents.insert(path.to_string(), (encoded, new_version.clone()));
        Ok(WriteResult {
            version: new_version,
            commit: None,
        })
    }
}
