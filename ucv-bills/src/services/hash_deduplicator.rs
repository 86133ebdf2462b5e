//! Content fingerprints and duplicate detection
//!
//! A fingerprint is the base64 (standard alphabet) SHA-256 digest of the
//! document bytes. Duplicates are scoped to one owner: the same bill uploaded
//! by two different owners produces two entries.

use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;
use ucv_common::{Error, Result};

use crate::db::entries;

/// Base64 SHA-256 of `content` (44 characters)
pub fn fingerprint(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    general_purpose::STANDARD.encode(digest)
}

/// Fingerprint of a declared record without a document
///
/// Hashes the canonical JSON encoding, so equal field values give equal
/// fingerprints regardless of how the client ordered its JSON.
pub fn fingerprint_declared<T: Serialize>(record: &T) -> String {
    match serde_json::to_vec(record) {
        Ok(encoded) => fingerprint(&encoded),
        Err(e) => {
            tracing::warn!(error = %e, "Declared record not serializable, using random fingerprint");
            fallback_fingerprint()
        }
    }
}

/// Random fingerprint for content that cannot be digested
///
/// Never collides, so the record is never treated as a duplicate.
pub fn fallback_fingerprint() -> String {
    Uuid::new_v4().to_string()
}

/// Hash deduplication result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashResult {
    /// No entry of this owner has the fingerprint
    Unique(String),
    /// The owner already submitted this content
    Duplicate { hash: String, original_entry_id: Uuid },
}

/// Owner-scoped duplicate detection against stored entries
pub struct HashDeduplicator {
    db: SqlitePool,
}

impl HashDeduplicator {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Fingerprint document bytes off the async executor
    pub async fn calculate_hash(&self, content: Arc<[u8]>) -> Result<String> {
        let size = content.len();
        let hash = tokio::task::spawn_blocking(move || fingerprint(&content))
            .await
            .map_err(|e| Error::Internal(format!("Hash calculation task failed: {}", e)))?;

        tracing::debug!(size, hash = %hash, "Calculated content hash");
        Ok(hash)
    }

    /// Check whether `owner_id` already has an entry with `hash`
    pub async fn check_owner_duplicate(&self, owner_id: Uuid, hash: &str) -> Result<HashResult> {
        match entries::find_by_owner_and_hash(&self.db, owner_id, hash).await? {
            None => Ok(HashResult::Unique(hash.to_string())),
            Some(original_entry_id) => {
                tracing::info!(
                    owner_id = %owner_id,
                    original_entry_id = %original_entry_id,
                    "Duplicate content hash detected"
                );
                Ok(HashResult::Duplicate {
                    hash: hash.to_string(),
                    original_entry_id,
                })
            }
        }
    }

    /// Start a batch seeded with the owner's stored fingerprints
    pub async fn batch_for_owner(&self, owner_id: Uuid) -> Result<BatchDeduplicator> {
        let history = entries::load_owner_hashes(&self.db, owner_id).await?;
        Ok(BatchDeduplicator::new(history))
    }
}

/// Duplicate tracking across one batch
///
/// An item is a duplicate when its fingerprint is in the owner's history or
/// was accepted earlier in the same batch.
#[derive(Debug, Default)]
pub struct BatchDeduplicator {
    history: HashSet<String>,
    seen: HashSet<String>,
}

impl BatchDeduplicator {
    pub fn new(history: HashSet<String>) -> Self {
        Self {
            history,
            seen: HashSet::new(),
        }
    }

    pub fn is_duplicate(&self, hash: &str) -> bool {
        self.history.contains(hash) || self.seen.contains(hash)
    }

    /// Record an accepted fingerprint; returns false if it was already known
    pub fn accept(&mut self, hash: &str) -> bool {
        if self.is_duplicate(hash) {
            return false;
        }
        self.seen.insert(hash.to_string())
    }
}
