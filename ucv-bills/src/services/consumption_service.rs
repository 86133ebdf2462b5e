//! Consumption entry service
//!
//! Synchronous side of the pipeline: validates uploads, fingerprints them,
//! rejects duplicates, stores the document, creates the `PENDING` entry and
//! hands it to the [`VerificationOrchestrator`]. Also owns the owner-scoped
//! reads, manual review and the offline sync path.

use base64::{engine::general_purpose, Engine as _};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::entries::{self, EntrySearch};
use crate::db::retry_on_lock;
use crate::models::{ConsumptionEntry, DataSource, VerificationStatus};
use crate::services::document_store::{DocumentStore, StorageError};
use crate::services::hash_deduplicator::{fingerprint_declared, HashDeduplicator, HashResult};
use crate::services::verification_orchestrator::VerificationOrchestrator;

/// Accepted document types (detected from content, not from the file name)
pub const ALLOWED_MIME_TYPES: [&str; 5] = [
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/tiff",
    "image/bmp",
];

/// Store folder for uploaded bills
const BILLS_FOLDER: &str = "bills";

const DEFAULT_FILE_NAME: &str = "bill";

#[derive(Debug, Error)]
pub enum ConsumptionError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("File size {size} exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Duplicate submission of entry {original_entry_id}")]
    Duplicate { original_entry_id: Uuid },

    #[error("Entry not found: {0}")]
    NotFound(Uuid),

    #[error("{0}")]
    Forbidden(String),

    #[error("Document storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] ucv_common::Error),
}

pub type ConsumptionResult<T> = Result<T, ConsumptionError>;

/// Single document upload
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    pub data_source: String,
    pub billing_amount: Option<f64>,
    pub billing_date: Option<NaiveDate>,
    pub units_consumed: Option<f64>,
    pub file_name: Option<String>,
    pub content_base64: String,
}

/// One file of a batch upload
#[derive(Debug, Clone, Deserialize)]
pub struct BatchFile {
    pub file_name: Option<String>,
    pub content_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchUploadRequest {
    pub data_source: String,
    pub files: Vec<BatchFile>,
}

/// Declared record synced from an offline client (no document)
#[derive(Debug, Clone, Deserialize)]
pub struct OfflineRecord {
    pub data_source: String,
    pub billing_amount: Option<f64>,
    pub billing_date: Option<NaiveDate>,
    pub units_consumed: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfflineSyncRequest {
    pub entries: Vec<OfflineRecord>,
}

/// Fingerprinted form of an offline record
///
/// The parsed data source keeps `"water"` and `"WATER"` from producing
/// different fingerprints.
#[derive(Debug, Serialize)]
struct DeclaredRecord {
    data_source: DataSource,
    billing_amount: Option<f64>,
    billing_date: Option<NaiveDate>,
    units_consumed: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchItemStatus {
    Created,
    SkippedDuplicate,
    Failed,
}

/// Per-item outcome of a batch upload or offline sync
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub status: BatchItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<ConsumptionEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    fn created(index: usize, file_name: Option<String>, entry: ConsumptionEntry) -> Self {
        Self {
            index,
            file_name,
            status: BatchItemStatus::Created,
            entry: Some(entry),
            error: None,
        }
    }

    fn skipped(index: usize, file_name: Option<String>) -> Self {
        Self {
            index,
            file_name,
            status: BatchItemStatus::SkippedDuplicate,
            entry: None,
            error: None,
        }
    }

    fn failed(index: usize, file_name: Option<String>, error: String) -> Self {
        Self {
            index,
            file_name,
            status: BatchItemStatus::Failed,
            entry: None,
            error: Some(error),
        }
    }
}

/// Owner totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionSummary {
    pub total_entries: u64,
    pub verified_entries: u64,
    pub pending_entries: u64,
    pub total_amount: f64,
    /// `total_amount / total_entries`, two decimals
    pub average_amount: f64,
    pub entries_by_source: BTreeMap<DataSource, u64>,
    pub amount_by_source: BTreeMap<DataSource, f64>,
}

impl ConsumptionSummary {
    pub fn from_entries(items: &[ConsumptionEntry]) -> Self {
        let mut summary = Self {
            total_entries: items.len() as u64,
            verified_entries: 0,
            pending_entries: 0,
            total_amount: 0.0,
            average_amount: 0.0,
            entries_by_source: BTreeMap::new(),
            amount_by_source: BTreeMap::new(),
        };

        for entry in items {
            match entry.verification_status {
                VerificationStatus::Verified => summary.verified_entries += 1,
                VerificationStatus::Pending => summary.pending_entries += 1,
                _ => {}
            }
            *summary.entries_by_source.entry(entry.data_source).or_insert(0) += 1;
            if let Some(amount) = entry.billing_amount {
                summary.total_amount += amount;
                *summary.amount_by_source.entry(entry.data_source).or_insert(0.0) += amount;
            }
        }

        if summary.total_entries > 0 {
            let average = summary.total_amount / summary.total_entries as f64;
            summary.average_amount = (average * 100.0).round() / 100.0;
        }
        summary
    }
}

/// A validated upload, ready to fingerprint
struct ValidatedDocument {
    content: Arc<[u8]>,
    mime_type: &'static str,
}

pub struct ConsumptionService {
    db: SqlitePool,
    store: Arc<dyn DocumentStore>,
    dedup: HashDeduplicator,
    orchestrator: VerificationOrchestrator,
    max_file_size: usize,
    db_lock_wait_ms: u64,
}

impl ConsumptionService {
    pub fn new(
        db: SqlitePool,
        store: Arc<dyn DocumentStore>,
        orchestrator: VerificationOrchestrator,
        max_file_size: usize,
        db_lock_wait_ms: u64,
    ) -> Self {
        Self {
            dedup: HashDeduplicator::new(db.clone()),
            db,
            store,
            orchestrator,
            max_file_size,
            db_lock_wait_ms,
        }
    }

    /// Accept one document and start its verification run
    ///
    /// # Errors
    /// - `InvalidInput`: unknown data source, empty or undecodable content, unsupported type
    /// - `PayloadTooLarge`: decoded content over the configured limit
    /// - `Duplicate`: the owner already submitted identical bytes
    pub async fn upload_entry(
        &self,
        owner_id: Uuid,
        request: UploadRequest,
    ) -> ConsumptionResult<ConsumptionEntry> {
        let data_source = parse_data_source(&request.data_source)?;
        validate_amount("billing_amount", request.billing_amount)?;
        validate_amount("units_consumed", request.units_consumed)?;
        let document = self.validate_document(&request.content_base64)?;

        let hash = self.dedup.calculate_hash(document.content.clone()).await?;
        if let HashResult::Duplicate { original_entry_id, .. } =
            self.dedup.check_owner_duplicate(owner_id, &hash).await?
        {
            return Err(ConsumptionError::Duplicate { original_entry_id });
        }

        let mut entry = ConsumptionEntry::new(owner_id, data_source, hash);
        entry.billing_amount = request.billing_amount;
        entry.billing_date = request.billing_date;
        entry.units_consumed = request.units_consumed;

        let file_name = request.file_name.as_deref().unwrap_or(DEFAULT_FILE_NAME);
        self.store_and_save(&mut entry, &document, file_name).await?;

        self.orchestrator.dispatch(entry.entry_id);
        info!(
            entry_id = %entry.entry_id,
            owner_id = %owner_id,
            data_source = %data_source,
            "Entry created, verification dispatched"
        );
        Ok(entry)
    }

    /// Accept several documents; each is validated and deduplicated on its own
    pub async fn upload_batch(
        &self,
        owner_id: Uuid,
        request: BatchUploadRequest,
    ) -> ConsumptionResult<Vec<BatchItemResult>> {
        let data_source = parse_data_source(&request.data_source)?;
        let mut batch = self.dedup.batch_for_owner(owner_id).await?;
        let mut results = Vec::with_capacity(request.files.len());

        for (index, file) in request.files.into_iter().enumerate() {
            let file_name = file.file_name;

            let document = match self.validate_document(&file.content_base64) {
                Ok(document) => document,
                Err(e) => {
                    results.push(BatchItemResult::failed(index, file_name, e.to_string()));
                    continue;
                }
            };

            let hash = match self.dedup.calculate_hash(document.content.clone()).await {
                Ok(hash) => hash,
                Err(e) => {
                    results.push(BatchItemResult::failed(index, file_name, e.to_string()));
                    continue;
                }
            };
            if batch.is_duplicate(&hash) {
                info!(owner_id = %owner_id, index, "Batch item skipped as duplicate");
                results.push(BatchItemResult::skipped(index, file_name));
                continue;
            }

            let mut entry = ConsumptionEntry::new(owner_id, data_source, hash.clone());
            let name = file_name.as_deref().unwrap_or(DEFAULT_FILE_NAME);
            match self.store_and_save(&mut entry, &document, name).await {
                Ok(()) => {
                    batch.accept(&hash);
                    self.orchestrator.dispatch(entry.entry_id);
                    results.push(BatchItemResult::created(index, file_name, entry));
                }
                Err(ConsumptionError::Duplicate { .. }) => {
                    batch.accept(&hash);
                    results.push(BatchItemResult::skipped(index, file_name));
                }
                Err(e) => {
                    warn!(owner_id = %owner_id, index, error = %e, "Batch item failed");
                    results.push(BatchItemResult::failed(index, file_name, e.to_string()));
                }
            }
        }

        info!(
            owner_id = %owner_id,
            items = results.len(),
            created = results.iter().filter(|r| r.status == BatchItemStatus::Created).count(),
            "Batch upload processed"
        );
        Ok(results)
    }

    /// Store declared records from an offline client
    ///
    /// Entries are imputed, carry no document and are not verified
    /// automatically; they wait in `PENDING` for manual review.
    pub async fn sync_offline(
        &self,
        owner_id: Uuid,
        request: OfflineSyncRequest,
    ) -> ConsumptionResult<Vec<BatchItemResult>> {
        let mut batch = self.dedup.batch_for_owner(owner_id).await?;
        let mut results = Vec::with_capacity(request.entries.len());

        for (index, record) in request.entries.into_iter().enumerate() {
            let declared = match declared_record(&record) {
                Ok(declared) => declared,
                Err(e) => {
                    results.push(BatchItemResult::failed(index, None, e.to_string()));
                    continue;
                }
            };

            let hash = fingerprint_declared(&declared);
            if batch.is_duplicate(&hash) {
                results.push(BatchItemResult::skipped(index, None));
                continue;
            }

            let mut entry = ConsumptionEntry::new(owner_id, declared.data_source, hash.clone());
            entry.billing_amount = declared.billing_amount;
            entry.billing_date = declared.billing_date;
            entry.units_consumed = declared.units_consumed;
            entry.is_imputed = true;

            match self.save(&entry).await {
                Ok(()) => {
                    batch.accept(&hash);
                    results.push(BatchItemResult::created(index, None, entry));
                }
                Err(ConsumptionError::Duplicate { .. }) => {
                    batch.accept(&hash);
                    results.push(BatchItemResult::skipped(index, None));
                }
                Err(e) => results.push(BatchItemResult::failed(index, None, e.to_string())),
            }
        }

        info!(owner_id = %owner_id, items = results.len(), "Offline records synced");
        Ok(results)
    }

    /// Owner's entries, optionally limited to a billing date range
    pub async fn list_entries(
        &self,
        owner_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> ConsumptionResult<Vec<ConsumptionEntry>> {
        if from.is_none() && to.is_none() {
            return Ok(entries::load_entries_by_owner(&self.db, owner_id).await?);
        }

        let start = from.unwrap_or_else(first_storable_date);
        let end = to.unwrap_or_else(last_storable_date);
        if start > end {
            return Err(ConsumptionError::InvalidInput(format!(
                "Range start {} is after range end {}",
                start, end
            )));
        }
        Ok(entries::load_entries_by_owner_between(&self.db, owner_id, start, end).await?)
    }

    pub async fn get_entry_for_owner(
        &self,
        owner_id: Uuid,
        entry_id: Uuid,
    ) -> ConsumptionResult<ConsumptionEntry> {
        let entry = self.load(entry_id).await?;
        ensure_owner(&entry, owner_id)?;
        Ok(entry)
    }

    /// Owner-initiated, unconditional removal of the record
    pub async fn delete_entry(&self, owner_id: Uuid, entry_id: Uuid) -> ConsumptionResult<()> {
        let entry = self.load(entry_id).await?;
        ensure_owner(&entry, owner_id)?;

        if !entries::delete_entry(&self.db, entry_id).await? {
            return Err(ConsumptionError::NotFound(entry_id));
        }
        info!(entry_id = %entry_id, owner_id = %owner_id, "Entry deleted");
        Ok(())
    }

    pub async fn summary(&self, owner_id: Uuid) -> ConsumptionResult<ConsumptionSummary> {
        let items = entries::load_entries_by_owner(&self.db, owner_id).await?;
        Ok(ConsumptionSummary::from_entries(&items))
    }

    /// Manual review; applies at any state, terminal ones included
    pub async fn review_entry(
        &self,
        entry_id: Uuid,
        reviewer_id: Uuid,
        verified: bool,
    ) -> ConsumptionResult<ConsumptionEntry> {
        let mut entry = self.load(entry_id).await?;
        entry.apply_review(reviewer_id, verified);

        let db = &self.db;
        let entry_ref = &entry;
        let written = retry_on_lock("manual review", self.db_lock_wait_ms, || {
            entries::update_entry(db, entry_ref)
        })
        .await?;
        if !written {
            return Err(ConsumptionError::NotFound(entry_id));
        }

        info!(
            entry_id = %entry_id,
            reviewer_id = %reviewer_id,
            status = %entry.verification_status,
            "Manual review applied"
        );
        Ok(entry)
    }

    pub async fn search(&self, search: &EntrySearch) -> ConsumptionResult<Vec<ConsumptionEntry>> {
        Ok(entries::search_entries(&self.db, search).await?)
    }

    pub async fn entries_by_status(
        &self,
        status: VerificationStatus,
    ) -> ConsumptionResult<Vec<ConsumptionEntry>> {
        Ok(entries::load_entries_by_status(&self.db, status).await?)
    }

    pub async fn tampered_entries(&self) -> ConsumptionResult<Vec<ConsumptionEntry>> {
        Ok(entries::load_tampered_entries(&self.db).await?)
    }

    async fn load(&self, entry_id: Uuid) -> ConsumptionResult<ConsumptionEntry> {
        entries::load_entry(&self.db, entry_id)
            .await?
            .ok_or(ConsumptionError::NotFound(entry_id))
    }

    fn validate_document(&self, content_base64: &str) -> ConsumptionResult<ValidatedDocument> {
        let encoded = content_base64.trim();
        if encoded.is_empty() {
            return Err(ConsumptionError::InvalidInput("File content is empty".to_string()));
        }

        let content = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ConsumptionError::InvalidInput(format!("File content is not valid base64: {}", e)))?;
        if content.is_empty() {
            return Err(ConsumptionError::InvalidInput("File content is empty".to_string()));
        }
        if content.len() > self.max_file_size {
            return Err(ConsumptionError::PayloadTooLarge {
                size: content.len(),
                limit: self.max_file_size,
            });
        }

        let mime_type = infer::get(&content)
            .map(|kind| kind.mime_type())
            .filter(|mime| ALLOWED_MIME_TYPES.contains(mime))
            .ok_or_else(|| {
                ConsumptionError::InvalidInput(format!(
                    "Unsupported file type (allowed: {})",
                    ALLOWED_MIME_TYPES.join(", ")
                ))
            })?;

        Ok(ValidatedDocument {
            content: Arc::from(content),
            mime_type,
        })
    }

    async fn store_and_save(
        &self,
        entry: &mut ConsumptionEntry,
        document: &ValidatedDocument,
        file_name: &str,
    ) -> ConsumptionResult<()> {
        let stored = self.store.put(&document.content, file_name, BILLS_FOLDER).await?;
        entry.document_url = Some(stored.url);
        entry.file_mime_type = Some(document.mime_type.to_string());
        entry.file_size = Some(document.content.len() as i64);

        let saved = self.save(entry).await;
        if saved.is_err() {
            // No entry references the document
            if let Err(e) = self.store.delete(&stored.key).await {
                warn!(key = %stored.key, error = %e, "Failed to remove unreferenced document");
            }
            entry.document_url = None;
        }
        saved
    }

    /// Insert; a concurrent insert of the same owner and hash surfaces as `Duplicate`
    async fn save(&self, entry: &ConsumptionEntry) -> ConsumptionResult<()> {
        let db = &self.db;
        match retry_on_lock("entry insert", self.db_lock_wait_ms, || entries::save_entry(db, entry)).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_unique_violation() => {
                let original_entry_id =
                    entries::find_by_owner_and_hash(&self.db, entry.owner_id, &entry.content_hash)
                        .await?
                        .unwrap_or(entry.entry_id);
                Err(ConsumptionError::Duplicate { original_entry_id })
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_data_source(raw: &str) -> ConsumptionResult<DataSource> {
    raw.parse::<DataSource>()
        .map_err(|e| ConsumptionError::InvalidInput(e.to_string()))
}

fn validate_amount(field: &str, value: Option<f64>) -> ConsumptionResult<()> {
    match value {
        Some(v) if !v.is_finite() => Err(ConsumptionError::InvalidInput(format!(
            "{} must be a finite number",
            field
        ))),
        _ => Ok(()),
    }
}

fn declared_record(record: &OfflineRecord) -> ConsumptionResult<DeclaredRecord> {
    let data_source = parse_data_source(&record.data_source)?;
    validate_amount("billing_amount", record.billing_amount)?;
    validate_amount("units_consumed", record.units_consumed)?;
    Ok(DeclaredRecord {
        data_source,
        billing_amount: record.billing_amount,
        billing_date: record.billing_date,
        units_consumed: record.units_consumed,
    })
}

fn ensure_owner(entry: &ConsumptionEntry, owner_id: Uuid) -> ConsumptionResult<()> {
    if entry.owner_id != owner_id {
        warn!(entry_id = %entry.entry_id, caller = %owner_id, "Access to another owner's entry refused");
        return Err(ConsumptionError::Forbidden(format!(
            "Entry {} belongs to another owner",
            entry.entry_id
        )));
    }
    Ok(())
}

/// Bounds of the `YYYY-MM-DD` text range used by the date columns
fn first_storable_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn last_storable_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::StubFieldExtractor;
    use crate::services::document_store::LocalDocumentStore;
    use crate::services::verification_orchestrator::OrchestratorSettings;
    use crate::validators::StubTamperVerifier;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;
    use ucv_common::db::init_in_memory_database;

    /// Minimal PDF header, enough for content sniffing
    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n";

    fn encode(bytes: &[u8]) -> String {
        general_purpose::STANDARD.encode(bytes)
    }

    fn pdf(marker: &str) -> String {
        let mut bytes = PDF.to_vec();
        bytes.extend_from_slice(marker.as_bytes());
        encode(&bytes)
    }

    async fn service(max_file_size: usize) -> (ConsumptionService, TempDir) {
        let pool = init_in_memory_database().await.unwrap();
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalDocumentStore::new(dir.path().to_path_buf(), None));
        let orchestrator = VerificationOrchestrator::new(
            pool.clone(),
            Arc::new(StubFieldExtractor::new()),
            Arc::new(StubTamperVerifier::new(1.0, StdRng::seed_from_u64(11))),
            OrchestratorSettings::default(),
        );
        (
            ConsumptionService::new(pool, store, orchestrator, max_file_size, 100),
            dir,
        )
    }

    fn upload(content_base64: String) -> UploadRequest {
        UploadRequest {
            data_source: "electricity".to_string(),
            billing_amount: Some(1450.0),
            billing_date: None,
            units_consumed: Some(212.0),
            file_name: Some("march.pdf".to_string()),
            content_base64,
        }
    }

    #[tokio::test]
    async fn test_upload_creates_pending_entry_with_document() {
        let (service, _dir) = service(1024 * 1024).await;
        let owner = Uuid::new_v4();

        let entry = service.upload_entry(owner, upload(pdf("a"))).await.unwrap();

        assert_eq!(entry.verification_status, VerificationStatus::Pending);
        assert_eq!(entry.data_source, DataSource::Electricity);
        assert_eq!(entry.file_mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(entry.content_hash.len(), 44);
        assert!(entry.document_url.as_deref().unwrap().starts_with("file://"));
        assert!(!entry.is_imputed);
    }

    #[tokio::test]
    async fn test_identical_upload_is_rejected_as_duplicate() {
        let (service, _dir) = service(1024 * 1024).await;
        let owner = Uuid::new_v4();

        let first = service.upload_entry(owner, upload(pdf("same"))).await.unwrap();
        let err = service.upload_entry(owner, upload(pdf("same"))).await.unwrap_err();

        match err {
            ConsumptionError::Duplicate { original_entry_id } => {
                assert_eq!(original_entry_id, first.entry_id)
            }
            other => panic!("expected duplicate, got {:?}", other),
        }

        // Another owner may submit the same bytes
        assert!(service.upload_entry(Uuid::new_v4(), upload(pdf("same"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let (service, _dir) = service(64).await;
        let owner = Uuid::new_v4();

        let empty = service.upload_entry(owner, upload(String::new())).await;
        assert!(matches!(empty, Err(ConsumptionError::InvalidInput(_))));

        let garbage = service.upload_entry(owner, upload("not base64!!".to_string())).await;
        assert!(matches!(garbage, Err(ConsumptionError::InvalidInput(_))));

        let text = service.upload_entry(owner, upload(encode(b"plain text bill"))).await;
        assert!(matches!(text, Err(ConsumptionError::InvalidInput(_))));

        let large = service.upload_entry(owner, upload(pdf(&"x".repeat(100)))).await;
        assert!(matches!(large, Err(ConsumptionError::PayloadTooLarge { limit: 64, .. })));

        let mut unknown_source = upload(pdf("b"));
        unknown_source.data_source = "CABLE_TV".to_string();
        let unknown = service.upload_entry(owner, unknown_source).await;
        assert!(matches!(unknown, Err(ConsumptionError::InvalidInput(_))));

        assert!(service.list_entries(owner, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_skips_repeats_and_history() {
        let (service, _dir) = service(1024 * 1024).await;
        let owner = Uuid::new_v4();
        service.upload_entry(owner, upload(pdf("old"))).await.unwrap();

        let file = |marker: &str| BatchFile {
            file_name: Some(format!("{}.pdf", marker)),
            content_base64: pdf(marker),
        };
        let request = BatchUploadRequest {
            data_source: "WATER".to_string(),
            files: vec![
                file("new"),
                file("new"),
                file("old"),
                BatchFile {
                    file_name: None,
                    content_base64: "???".to_string(),
                },
            ],
        };

        let results = service.upload_batch(owner, request).await.unwrap();
        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                BatchItemStatus::Created,
                BatchItemStatus::SkippedDuplicate,
                BatchItemStatus::SkippedDuplicate,
                BatchItemStatus::Failed,
            ]
        );
        assert_eq!(service.list_entries(owner, None, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_offline_sync_is_imputed_and_deduplicated() {
        let (service, _dir) = service(1024).await;
        let owner = Uuid::new_v4();
        let record = |source: &str| OfflineRecord {
            data_source: source.to_string(),
            billing_amount: Some(300.0),
            billing_date: NaiveDate::from_ymd_opt(2026, 8, 1),
            units_consumed: None,
        };

        let results = service
            .sync_offline(
                owner,
                OfflineSyncRequest {
                    entries: vec![record("water"), record("WATER"), record("gas"), record("cable")],
                },
            )
            .await
            .unwrap();

        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                BatchItemStatus::Created,
                BatchItemStatus::SkippedDuplicate,
                BatchItemStatus::Created,
                BatchItemStatus::Failed,
            ]
        );

        let stored = service.list_entries(owner, None, None).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|e| e.is_imputed && e.document_url.is_none()));
        assert!(stored.iter().all(|e| e.verification_status == VerificationStatus::Pending));

        // A second sync of the same record hits the stored history
        let again = service
            .sync_offline(owner, OfflineSyncRequest { entries: vec![record("Water")] })
            .await
            .unwrap();
        assert_eq!(again[0].status, BatchItemStatus::SkippedDuplicate);
    }

    #[tokio::test]
    async fn test_owner_checks_on_read_and_delete() {
        let (service, _dir) = service(1024 * 1024).await;
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let entry = service.upload_entry(owner, upload(pdf("c"))).await.unwrap();

        assert!(matches!(
            service.get_entry_for_owner(stranger, entry.entry_id).await,
            Err(ConsumptionError::Forbidden(_))
        ));
        assert!(matches!(
            service.delete_entry(stranger, entry.entry_id).await,
            Err(ConsumptionError::Forbidden(_))
        ));

        service.delete_entry(owner, entry.entry_id).await.unwrap();
        assert!(matches!(
            service.get_entry_for_owner(owner, entry.entry_id).await,
            Err(ConsumptionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_review_is_idempotent() {
        let (service, _dir) = service(1024).await;
        let owner = Uuid::new_v4();
        let reviewer = Uuid::new_v4();
        let created = service
            .sync_offline(
                owner,
                OfflineSyncRequest {
                    entries: vec![OfflineRecord {
                        data_source: "MOBILE".to_string(),
                        billing_amount: Some(499.0),
                        billing_date: None,
                        units_consumed: None,
                    }],
                },
            )
            .await
            .unwrap();
        let entry_id = created[0].entry.as_ref().unwrap().entry_id;

        let first = service.review_entry(entry_id, reviewer, false).await.unwrap();
        let second = service.review_entry(entry_id, reviewer, false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.verification_status, VerificationStatus::Rejected);
        assert_eq!(second.verification_confidence, 100.0);
        assert_eq!(second.verified_by, Some(reviewer));

        let verified = service.review_entry(entry_id, reviewer, true).await.unwrap();
        assert_eq!(verified.verification_status, VerificationStatus::Verified);

        assert!(matches!(
            service.review_entry(Uuid::new_v4(), reviewer, true).await,
            Err(ConsumptionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_by_billing_date_range() {
        let (service, _dir) = service(1024).await;
        let owner = Uuid::new_v4();
        let record = |month: u32| OfflineRecord {
            data_source: "GAS".to_string(),
            billing_amount: Some(100.0 * month as f64),
            billing_date: NaiveDate::from_ymd_opt(2026, month, 10),
            units_consumed: None,
        };
        service
            .sync_offline(owner, OfflineSyncRequest { entries: vec![record(1), record(4), record(7)] })
            .await
            .unwrap();

        let spring = service
            .list_entries(owner, NaiveDate::from_ymd_opt(2026, 3, 1), NaiveDate::from_ymd_opt(2026, 5, 31))
            .await
            .unwrap();
        assert_eq!(spring.len(), 1);
        assert_eq!(spring[0].billing_amount, Some(400.0));

        let since_april = service
            .list_entries(owner, NaiveDate::from_ymd_opt(2026, 4, 1), None)
            .await
            .unwrap();
        assert_eq!(since_april.len(), 2);

        let inverted = service
            .list_entries(owner, NaiveDate::from_ymd_opt(2026, 5, 1), NaiveDate::from_ymd_opt(2026, 4, 1))
            .await;
        assert!(matches!(inverted, Err(ConsumptionError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_failed_insert_removes_stored_document() {
        let (service, dir) = service(1024 * 1024).await;
        sqlx::query(
            "CREATE TRIGGER block_entry_insert BEFORE INSERT ON consumption_entries \
             BEGIN SELECT RAISE(ABORT, 'insert blocked'); END",
        )
        .execute(&service.db)
        .await
        .unwrap();
        let owner = Uuid::new_v4();

        let single = service.upload_entry(owner, upload(pdf("single"))).await;
        assert!(matches!(single, Err(ConsumptionError::Store(_))));

        let results = service
            .upload_batch(
                owner,
                BatchUploadRequest {
                    data_source: "electricity".to_string(),
                    files: vec![BatchFile {
                        file_name: Some("april.pdf".to_string()),
                        content_base64: pdf("batch"),
                    }],
                },
            )
            .await
            .unwrap();
        assert_eq!(results[0].status, BatchItemStatus::Failed);

        let bills_dir = dir.path().join(BILLS_FOLDER);
        let leftover = std::fs::read_dir(&bills_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0, "stored documents left behind in {}", bills_dir.display());
    }

    #[test]
    fn test_summary_totals() {
        let owner = Uuid::new_v4();
        let entry = |source: DataSource, amount: Option<f64>, status: VerificationStatus| {
            let mut e = ConsumptionEntry::new(owner, source, Uuid::new_v4().to_string());
            e.billing_amount = amount;
            e.verification_status = status;
            e
        };
        let items = vec![
            entry(DataSource::Electricity, Some(100.0), VerificationStatus::Verified),
            entry(DataSource::Electricity, Some(50.5), VerificationStatus::Pending),
            entry(DataSource::Water, None, VerificationStatus::Rejected),
        ];

        let summary = ConsumptionSummary::from_entries(&items);

        assert_eq!(summary.total_entries, 3);
        assert_eq!(summary.verified_entries, 1);
        assert_eq!(summary.pending_entries, 1);
        assert_eq!(summary.total_amount, 150.5);
        assert_eq!(summary.average_amount, 50.17);
        assert_eq!(summary.entries_by_source[&DataSource::Electricity], 2);
        assert_eq!(summary.amount_by_source[&DataSource::Electricity], 150.5);
        // Entries without an amount are counted but contribute no amount bucket
        assert_eq!(summary.entries_by_source[&DataSource::Water], 1);
        assert!(!summary.amount_by_source.contains_key(&DataSource::Water));
    }

    #[test]
    fn test_empty_summary() {
        let summary = ConsumptionSummary::from_entries(&[]);
        assert_eq!(summary.total_entries, 0);
        assert_eq!(summary.average_amount, 0.0);
    }
}
