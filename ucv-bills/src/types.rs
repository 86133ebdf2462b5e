//! Core types and provider ports for the verification pipeline
//!
//! Two ports are resolved at startup from configuration:
//! - [`FieldExtractor`]: reads bill fields from a stored document ("OCR")
//! - [`TamperVerifier`]: independently checks those fields ("billing aggregator")
//!
//! Both ports have a deterministic stub and a remote HTTP implementation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::VerificationSource;

// ============================================================================
// Extracted fields
// ============================================================================

/// Confidence-scored field value
///
/// Confidence is a fraction in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue<T> {
    pub value: T,
    pub confidence: f64,
}

impl<T> FieldValue<T> {
    /// Create a field value with clamped confidence (0.0-1.0)
    pub fn new(value: T, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self { value, confidence }
    }

    /// Value reported by the owner rather than read from the document
    pub fn declared(value: T) -> Self {
        Self::new(value, 1.0)
    }
}

/// Fields read from a bill document
///
/// Every field is optional: extractors return only what they could read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub billing_amount: Option<FieldValue<f64>>,
    pub billing_date: Option<FieldValue<NaiveDate>>,
    pub due_date: Option<FieldValue<NaiveDate>>,
    pub units_consumed: Option<FieldValue<f64>>,
    pub bill_number: Option<FieldValue<String>>,
    pub consumer_number: Option<FieldValue<String>>,
    pub biller_name: Option<FieldValue<String>>,
    pub biller_category: Option<FieldValue<String>>,
    /// Overall extraction confidence (0.0-1.0)
    pub overall_confidence: Option<f64>,
    /// Provider payload kept for audit
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl ExtractedFields {
    /// True when no field was read
    pub fn is_empty(&self) -> bool {
        self.billing_amount.is_none()
            && self.billing_date.is_none()
            && self.due_date.is_none()
            && self.units_consumed.is_none()
            && self.bill_number.is_none()
            && self.consumer_number.is_none()
            && self.biller_name.is_none()
            && self.biller_category.is_none()
    }

    pub fn amount(&self) -> Option<f64> {
        self.billing_amount.as_ref().map(|f| f.value)
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.billing_date.as_ref().map(|f| f.value)
    }

    pub fn bill_number_str(&self) -> Option<&str> {
        self.bill_number.as_ref().map(|f| f.value.as_str())
    }

    pub fn biller_category_str(&self) -> Option<&str> {
        self.biller_category.as_ref().map(|f| f.value.as_str())
    }
}

/// Extraction error
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Provider did not answer within the configured timeout
    #[error("Extraction timed out: {0}")]
    Timeout(String),

    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Provider answered with a non-success HTTP status
    #[error("API error: {0}")]
    Api(String),

    /// Provider answered but reported that it could not read the document
    #[error("Extraction rejected: {0}")]
    Rejected(String),

    /// Failed to parse the provider response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Internal processing error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Field extraction port
///
/// # Example
/// ```rust,ignore
/// let fields = extractor.extract("file:///var/lib/ucv/documents/bills/a.pdf").await?;
/// if let Some(amount) = fields.billing_amount {
///     println!("amount {} (confidence {})", amount.value, amount.confidence);
/// }
/// ```
#[async_trait::async_trait]
pub trait FieldExtractor: Send + Sync {
    /// Provider name for logs and audit payloads
    fn name(&self) -> &'static str;

    /// Read bill fields from the document at `document_url`
    ///
    /// # Errors
    /// Returns `ExtractionError` when the document cannot be read. The
    /// pipeline continues with declared values in that case.
    async fn extract(&self, document_url: &str) -> Result<ExtractedFields, ExtractionError>;
}

// ============================================================================
// Tamper verification
// ============================================================================

/// Per-check results; `None` when the check did not apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub amount_valid: Option<bool>,
    pub date_valid: Option<bool>,
    pub bill_number_valid: Option<bool>,
    pub biller_valid: Option<bool>,
}

impl CheckReport {
    /// (passed, applicable)
    pub fn tally(&self) -> (usize, usize) {
        let checks = [
            self.amount_valid,
            self.date_valid,
            self.bill_number_valid,
            self.biller_valid,
        ];
        let applicable = checks.iter().filter(|c| c.is_some()).count();
        let passed = checks.iter().filter(|c| **c == Some(true)).count();
        (passed, applicable)
    }
}

/// Result of a tamper verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub tampered: bool,
    pub reasons: Vec<String>,
    /// Confidence in the outcome (0-100)
    pub confidence: f64,
    pub source: VerificationSource,
    pub message: String,
    #[serde(default)]
    pub checks: CheckReport,
}

/// Verification error
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Verification timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VerificationError {
    /// Verifier unreachable or unhealthy; the entry waits for manual review
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            VerificationError::Timeout(_) | VerificationError::Network(_) | VerificationError::Api(_)
        )
    }
}

/// Tamper verification port
#[async_trait::async_trait]
pub trait TamperVerifier: Send + Sync {
    /// Provider name for logs and audit payloads
    fn name(&self) -> &'static str;

    /// Check the given fields for signs of tampering
    async fn verify(
        &self,
        fields: &ExtractedFields,
    ) -> Result<VerificationOutcome, VerificationError>;
}
