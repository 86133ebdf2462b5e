//! Document storage port
//!
//! Uploaded bill documents are written once and referenced by locator (URL)
//! from the entry. The extractor receives that locator, never the bytes.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Storage error
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid document name: {0}")]
    InvalidName(String),
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    /// Locator handed to the field extractor
    pub url: String,
    /// Store-relative key (`<folder>/<file>`)
    pub key: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist `content` under `folder` and return its locator
    async fn put(
        &self,
        content: &[u8],
        file_name: &str,
        folder: &str,
    ) -> Result<StoredDocument, StorageError>;

    /// Remove a document by its store-relative key; a missing document is not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Filesystem store under `<root>/documents`
///
/// Files are named `<uuid>-<sanitized name>` so repeated names never clash.
pub struct LocalDocumentStore {
    base_dir: PathBuf,
    public_base_url: Option<String>,
}

impl LocalDocumentStore {
    pub fn new(base_dir: PathBuf, public_base_url: Option<String>) -> Self {
        Self {
            base_dir,
            public_base_url,
        }
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(
        &self,
        content: &[u8],
        file_name: &str,
        folder: &str,
    ) -> Result<StoredDocument, StorageError> {
        let folder = sanitize_component(folder);
        if folder.is_empty() {
            return Err(StorageError::InvalidName("empty folder".to_string()));
        }
        let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize_file_name(file_name));

        let dir = self.base_dir.join(&folder);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(&stored_name);
        tokio::fs::write(&path, content).await?;

        let key = format!("{}/{}", folder, stored_name);
        let url = match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => {
                let absolute = tokio::fs::canonicalize(&path).await?;
                format!("file://{}", absolute.display())
            }
        };

        tracing::debug!(key = %key, size = content.len(), "Stored document");
        Ok(StoredDocument { url, key })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut path = self.base_dir.clone();
        for component in key.split('/') {
            if component.is_empty() || sanitize_component(component) != component {
                return Err(StorageError::InvalidName(key.to_string()));
            }
            path.push(component);
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key = %key, "Removed document");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

fn sanitize_file_name(raw: &str) -> String {
    // Drop any client-side directory part
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned = sanitize_component(base);
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}
