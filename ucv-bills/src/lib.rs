//! ucv-bills library interface
//!
//! Bill verification service: upload, fingerprint, extract, verify.
//! Exposes the router and state builders for the binary and integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod models;
pub mod services;
pub mod types;
pub mod validators;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::api::UploadLimits;
use crate::config::ServiceConfig;
use crate::services::{
    ConsumptionService, LocalDocumentStore, OrchestratorSettings, VerificationOrchestrator,
};
use crate::types::{FieldExtractor, TamperVerifier};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub service: Arc<ConsumptionService>,
    pub extractor_name: &'static str,
    pub verifier_name: &'static str,
    pub upload_limits: UploadLimits,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        service: ConsumptionService,
        extractor_name: &'static str,
        verifier_name: &'static str,
        upload_limits: UploadLimits,
    ) -> Self {
        Self {
            db,
            service: Arc::new(service),
            extractor_name,
            verifier_name,
            upload_limits,
            startup_time: Utc::now(),
        }
    }

    /// Wire store, providers and orchestrator from resolved configuration
    pub fn from_config(
        db: SqlitePool,
        config: &ServiceConfig,
        extractor: Arc<dyn FieldExtractor>,
        verifier: Arc<dyn TamperVerifier>,
    ) -> Self {
        let extractor_name = extractor.name();
        let verifier_name = verifier.name();

        let settings = OrchestratorSettings {
            extractor_timeout: Duration::from_millis(config.extractor.timeout_ms),
            verifier_timeout: Duration::from_millis(config.verifier.timeout_ms),
            max_concurrent_runs: config.pipeline.max_concurrent_runs,
            db_lock_wait_ms: config.pipeline.db_lock_wait_ms,
        };
        let orchestrator = VerificationOrchestrator::new(db.clone(), extractor, verifier, settings);

        let store = Arc::new(LocalDocumentStore::new(
            config.documents_path(),
            config.uploads.public_base_url.clone(),
        ));
        let service = ConsumptionService::new(
            db.clone(),
            store,
            orchestrator,
            config.uploads.max_file_size_bytes,
            config.pipeline.db_lock_wait_ms,
        );

        Self::new(
            db,
            service,
            extractor_name,
            verifier_name,
            UploadLimits::from_config(&config.uploads),
        )
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let limits = state.upload_limits;
    Router::new()
        .merge(api::entry_routes(limits))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
