//! Verification orchestrator
//!
//! Drives one entry through extraction and tamper verification in a detached
//! task. The creating insert is always awaited before [`VerificationOrchestrator::dispatch`],
//! so the task observes the committed row.
//!
//! # Stages
//! 0. Load the entry; terminal entries are left untouched
//! 1. Extract fields (bounded by the extractor timeout); merge what was read
//! 2. Verify the merged fields (bounded by the verifier timeout)
//! 3. Persist the outcome with a conditional update
//!
//! # Degradation
//! - Extractor failure: continue with declared values; never auto-accept
//! - Verifier unavailable (timeout, network, HTTP status): `PENDING` for manual review
//! - Anything else: `ERROR` with source `SYSTEM`
//!
//! No retries and no cancellation: a failed run is resolved by manual review
//! or re-submission.

use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{entries, retry_on_lock};
use crate::models::{ConsumptionEntry, VerificationSource, VerificationStatus};
use crate::types::{FieldExtractor, TamperVerifier, VerificationError};

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub extractor_timeout: Duration,
    pub verifier_timeout: Duration,
    pub max_concurrent_runs: usize,
    pub db_lock_wait_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            extractor_timeout: Duration::from_secs(30),
            verifier_timeout: Duration::from_secs(10),
            max_concurrent_runs: 8,
            db_lock_wait_ms: 5_000,
        }
    }
}

/// Failure that ends a run in `ERROR`
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] ucv_common::Error),

    #[error(transparent)]
    Verification(VerificationError),
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Outcome persisted
    Completed(VerificationStatus, VerificationSource),
    /// Entry was (or became) terminal; nothing written
    Skipped(VerificationStatus),
}

#[derive(Clone)]
pub struct VerificationOrchestrator {
    db: SqlitePool,
    extractor: Arc<dyn FieldExtractor>,
    verifier: Arc<dyn TamperVerifier>,
    permits: Arc<Semaphore>,
    settings: OrchestratorSettings,
}

impl VerificationOrchestrator {
    pub fn new(
        db: SqlitePool,
        extractor: Arc<dyn FieldExtractor>,
        verifier: Arc<dyn TamperVerifier>,
        settings: OrchestratorSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_runs.max(1)));
        Self {
            db,
            extractor,
            verifier,
            permits,
            settings,
        }
    }

    /// Spawn a detached verification run for a committed entry
    pub fn dispatch(&self, entry_id: Uuid) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let _permit = match orchestrator.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!(entry_id = %entry_id, "Verification semaphore closed, run dropped");
                    return;
                }
            };
            orchestrator.run(entry_id).await;
        })
    }

    /// Run the pipeline; failures are recorded on the entry, never returned
    pub async fn run(&self, entry_id: Uuid) {
        info!(entry_id = %entry_id, "Verification run started");

        match self.process(entry_id).await {
            Ok(RunOutcome::Completed(status, source)) => {
                info!(entry_id = %entry_id, status = %status, source = %source, "Verification run completed");
            }
            Ok(RunOutcome::Skipped(status)) => {
                info!(entry_id = %entry_id, status = %status, "Entry is terminal, verification run skipped");
            }
            Err(e) => {
                error!(entry_id = %entry_id, error = %e, "Verification run failed");
                if let Err(record_error) = self.record_failure(entry_id, &e).await {
                    error!(
                        entry_id = %entry_id,
                        error = %record_error,
                        "Failed to record verification failure"
                    );
                }
            }
        }
    }

    /// Stages 0-3
    pub async fn process(&self, entry_id: Uuid) -> Result<RunOutcome, PipelineError> {
        let mut entry = entries::load_entry(&self.db, entry_id)
            .await?
            .ok_or(PipelineError::EntryNotFound(entry_id))?;

        if entry.is_terminal() {
            return Ok(RunOutcome::Skipped(entry.verification_status));
        }

        let document_read = self.extract_into(&mut entry).await;
        if !self.persist(&entry).await? {
            return Ok(self.skipped(entry_id).await);
        }

        let input = entry.verification_input();
        let verification = match timeout(self.settings.verifier_timeout, self.verifier.verify(&input)).await {
            Ok(result) => result,
            Err(_) => Err(VerificationError::Timeout(format!(
                "no answer within {} ms",
                self.settings.verifier_timeout.as_millis()
            ))),
        };

        let inconclusive_source = if document_read {
            VerificationSource::AggregatorFailed
        } else {
            VerificationSource::ExtractorFailed
        };

        match verification {
            Ok(outcome) => {
                entry.verifier_response = Some(serde_json::to_value(&outcome).map_err(|e| {
                    ucv_common::Error::Internal(format!("Failed to serialize verifier response: {}", e))
                })?);

                if outcome.tampered {
                    let mut reasons = outcome.reasons;
                    if reasons.is_empty() {
                        reasons.push(outcome.message);
                    }
                    entry.mark_tampered(outcome.source, outcome.confidence, reasons);
                } else if outcome.verified && document_read {
                    entry.mark_verified(outcome.source, outcome.confidence);
                } else {
                    if outcome.verified {
                        info!(
                            entry_id = %entry_id,
                            "Verifier accepted an unread document, holding for manual review"
                        );
                    }
                    entry.mark_pending_review(inconclusive_source, outcome.confidence);
                }
            }
            Err(e) if e.is_dependency_failure() => {
                warn!(
                    entry_id = %entry_id,
                    verifier = self.verifier.name(),
                    error = %e,
                    "Tamper verifier unavailable, holding for manual review"
                );
                entry.verifier_response = Some(json!({
                    "verifier": self.verifier.name(),
                    "error": e.to_string(),
                }));
                entry.mark_pending_review(inconclusive_source, 0.0);
            }
            Err(e) => return Err(PipelineError::Verification(e)),
        }

        if !self.persist(&entry).await? {
            return Ok(self.skipped(entry_id).await);
        }

        Ok(RunOutcome::Completed(entry.verification_status, entry.verification_source))
    }

    /// Stage 1; returns whether any field was read from the document
    async fn extract_into(&self, entry: &mut ConsumptionEntry) -> bool {
        let extractor = self.extractor.name();

        let Some(document_url) = entry.document_url.clone() else {
            warn!(entry_id = %entry.entry_id, "Entry has no document, verifying declared values");
            entry.extraction_raw = Some(json!({"extractor": extractor, "error": "no document"}));
            return false;
        };

        let result = timeout(self.settings.extractor_timeout, self.extractor.extract(&document_url)).await;
        let failure = match result {
            Ok(Ok(fields)) if fields.is_empty() => {
                warn!(entry_id = %entry.entry_id, extractor, "Extractor returned no fields");
                entry.apply_extraction(&fields);
                return false;
            }
            Ok(Ok(fields)) => {
                debug!(entry_id = %entry.entry_id, extractor, "Extraction succeeded");
                entry.apply_extraction(&fields);
                return true;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "Extraction timed out after {} ms",
                self.settings.extractor_timeout.as_millis()
            ),
        };

        warn!(
            entry_id = %entry.entry_id,
            extractor,
            error = %failure,
            "Field extraction failed, continuing with declared values"
        );
        entry.extraction_raw = Some(json!({"extractor": extractor, "error": failure}));
        false
    }

    /// Conditional write; `false` when the entry became terminal meanwhile
    async fn persist(&self, entry: &ConsumptionEntry) -> Result<bool, PipelineError> {
        let db = &self.db;
        let written = retry_on_lock("verification update", self.settings.db_lock_wait_ms, || {
            entries::update_entry_unless_terminal(db, entry)
        })
        .await?;
        Ok(written)
    }

    async fn skipped(&self, entry_id: Uuid) -> RunOutcome {
        let status = match entries::load_entry(&self.db, entry_id).await {
            Ok(Some(entry)) => entry.verification_status,
            _ => VerificationStatus::Pending,
        };
        RunOutcome::Skipped(status)
    }

    async fn record_failure(&self, entry_id: Uuid, failure: &PipelineError) -> ucv_common::Result<()> {
        let Some(mut entry) = entries::load_entry(&self.db, entry_id).await? else {
            return Ok(());
        };
        if entry.is_terminal() {
            return Ok(());
        }

        entry.mark_error(format!("Verification failed: {}", failure));
        let db = &self.db;
        retry_on_lock("verification failure update", self.settings.db_lock_wait_ms, || {
            entries::update_entry_unless_terminal(db, &entry)
        })
        .await?;
        Ok(())
    }
}
