//! Consumption entry API handlers
//!
//! Owner routes identify the caller through `X-Owner-Id`; review and admin
//! routes through `X-Reviewer-Id`.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ucv_common::config::UploadConfig;
use uuid::Uuid;

use crate::api::identity::{OwnerId, ReviewerId};
use crate::db::entries::EntrySearch;
use crate::error::{ApiError, ApiResult};
use crate::models::{ConsumptionEntry, DataSource, VerificationStatus};
use crate::services::consumption_service::{
    BatchUploadRequest, OfflineSyncRequest, UploadRequest,
};
use crate::services::{BatchItemResult, BatchItemStatus, ConsumptionSummary};
use crate::AppState;

/// Room for the JSON fields around the encoded document
const ENVELOPE_BYTES: usize = 64 * 1024;

/// Request body caps for the document routes
///
/// The file size limit applies to decoded bytes; the body carries them base64
/// encoded, so the body cap is the encoded length plus the JSON envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_file_size: usize,
    pub max_batch_files: usize,
}

impl UploadLimits {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_file_size: config.max_file_size_bytes,
            max_batch_files: config.max_batch_files,
        }
    }

    pub fn upload_body_bytes(&self) -> usize {
        base64_len(self.max_file_size).saturating_add(ENVELOPE_BYTES)
    }

    pub fn batch_body_bytes(&self) -> usize {
        self.upload_body_bytes().saturating_mul(self.max_batch_files)
    }
}

fn base64_len(bytes: usize) -> usize {
    bytes.div_ceil(3).saturating_mul(4)
}

/// GET /api/v1/consumption query
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// PUT /api/v1/consumption/:id/verify query
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub verified: bool,
}

/// GET /api/v1/consumption/admin/search query
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub owner_id: Option<Uuid>,
    pub data_source: Option<String>,
    pub status: Option<String>,
}

/// Batch upload and offline sync response
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub created: usize,
    pub skipped_duplicates: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
}

impl From<Vec<BatchItemResult>> for BatchResponse {
    fn from(results: Vec<BatchItemResult>) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        Self {
            created: count(BatchItemStatus::Created),
            skipped_duplicates: count(BatchItemStatus::SkippedDuplicate),
            failed: count(BatchItemStatus::Failed),
            results,
        }
    }
}

/// POST /api/v1/consumption/upload
///
/// Returns the `PENDING` entry as soon as it is stored; verification runs in
/// the background and the caller polls the entry for the outcome.
pub async fn upload(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    request: Result<Json<UploadRequest>, JsonRejection>,
) -> ApiResult<Json<ConsumptionEntry>> {
    let Json(request) = request?;
    let entry = state.service.upload_entry(owner_id, request).await?;
    Ok(Json(entry))
}

/// POST /api/v1/consumption/upload-batch
pub async fn upload_batch(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    request: Result<Json<BatchUploadRequest>, JsonRejection>,
) -> ApiResult<Json<BatchResponse>> {
    let Json(request) = request?;
    if request.files.is_empty() {
        return Err(ApiError::BadRequest("Batch contains no files".to_string()));
    }
    if request.files.len() > state.upload_limits.max_batch_files {
        return Err(ApiError::BadRequest(format!(
            "Batch contains {} files (limit {})",
            request.files.len(),
            state.upload_limits.max_batch_files
        )));
    }
    let results = state.service.upload_batch(owner_id, request).await?;
    Ok(Json(results.into()))
}

/// POST /api/v1/consumption/sync/offline-data
pub async fn sync_offline(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    request: Result<Json<OfflineSyncRequest>, JsonRejection>,
) -> ApiResult<Json<BatchResponse>> {
    let Json(request) = request?;
    let results = state.service.sync_offline(owner_id, request).await?;
    Ok(Json(results.into()))
}

/// GET /api/v1/consumption?from=YYYY-MM-DD&to=YYYY-MM-DD
pub async fn list(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ConsumptionEntry>>> {
    let items = state.service.list_entries(owner_id, query.from, query.to).await?;
    Ok(Json(items))
}

/// GET /api/v1/consumption/summary
pub async fn summary(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
) -> ApiResult<Json<ConsumptionSummary>> {
    Ok(Json(state.service.summary(owner_id).await?))
}

/// GET /api/v1/consumption/:id
pub async fn get_entry(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(entry_id): Path<Uuid>,
) -> ApiResult<Json<ConsumptionEntry>> {
    Ok(Json(state.service.get_entry_for_owner(owner_id, entry_id).await?))
}

/// DELETE /api/v1/consumption/:id
pub async fn delete_entry(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(entry_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.service.delete_entry(owner_id, entry_id).await?;
    Ok(Json(serde_json::json!({ "deleted": entry_id })))
}

/// PUT /api/v1/consumption/:id/verify?verified=true|false
pub async fn verify(
    State(state): State<AppState>,
    ReviewerId(reviewer_id): ReviewerId,
    Path(entry_id): Path<Uuid>,
    Query(query): Query<VerifyQuery>,
) -> ApiResult<Json<ConsumptionEntry>> {
    let entry = state
        .service
        .review_entry(entry_id, reviewer_id, query.verified)
        .await?;
    Ok(Json(entry))
}

/// GET /api/v1/consumption/admin/search
pub async fn search(
    State(state): State<AppState>,
    ReviewerId(_): ReviewerId,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<ConsumptionEntry>>> {
    let search = EntrySearch {
        owner_id: query.owner_id,
        data_source: query
            .data_source
            .as_deref()
            .map(str::parse::<DataSource>)
            .transpose()?,
        status: query
            .status
            .as_deref()
            .map(str::parse::<VerificationStatus>)
            .transpose()?,
    };
    Ok(Json(state.service.search(&search).await?))
}

/// GET /api/v1/consumption/admin/status/:status
pub async fn by_status(
    State(state): State<AppState>,
    ReviewerId(_): ReviewerId,
    Path(status): Path<String>,
) -> ApiResult<Json<Vec<ConsumptionEntry>>> {
    let status: VerificationStatus = status.parse()?;
    Ok(Json(state.service.entries_by_status(status).await?))
}

/// GET /api/v1/consumption/admin/tampered
pub async fn tampered(
    State(state): State<AppState>,
    ReviewerId(_): ReviewerId,
) -> ApiResult<Json<Vec<ConsumptionEntry>>> {
    Ok(Json(state.service.tampered_entries().await?))
}

/// Build consumption entry routes
pub fn entry_routes(limits: UploadLimits) -> Router<AppState> {
    Router::new()
        .route("/api/v1/consumption", get(list))
        .route(
            "/api/v1/consumption/upload",
            post(upload).layer(DefaultBodyLimit::max(limits.upload_body_bytes())),
        )
        .route(
            "/api/v1/consumption/upload-batch",
            post(upload_batch).layer(DefaultBodyLimit::max(limits.batch_body_bytes())),
        )
        .route("/api/v1/consumption/sync/offline-data", post(sync_offline))
        .route("/api/v1/consumption/summary", get(summary))
        .route("/api/v1/consumption/admin/search", get(search))
        .route("/api/v1/consumption/admin/status/:status", get(by_status))
        .route("/api/v1/consumption/admin/tampered", get(tampered))
        .route(
            "/api/v1/consumption/:id",
            get(get_entry).delete(delete_entry),
        )
        .route("/api/v1/consumption/:id/verify", put(verify))
}
