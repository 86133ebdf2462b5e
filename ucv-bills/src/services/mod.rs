//! Service layer
//!
//! - [`hash_deduplicator`]: content fingerprints and owner-scoped duplicate detection
//! - [`document_store`]: document storage port and local filesystem store
//! - [`verification_orchestrator`]: detached extraction and verification runs
//! - [`consumption_service`]: uploads, batch and offline sync, reads and manual review

pub mod consumption_service;
pub mod document_store;
pub mod hash_deduplicator;
pub mod verification_orchestrator;

pub use consumption_service::{
    BatchItemResult, BatchItemStatus, ConsumptionError, ConsumptionService, ConsumptionSummary,
};
pub use document_store::{DocumentStore, LocalDocumentStore, StorageError, StoredDocument};
pub use hash_deduplicator::{fingerprint, BatchDeduplicator, HashDeduplicator, HashResult};
pub use verification_orchestrator::{
    OrchestratorSettings, PipelineError, RunOutcome, VerificationOrchestrator,
};
