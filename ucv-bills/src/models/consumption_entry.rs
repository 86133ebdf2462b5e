//! Consumption entry and its verification state machine
//!
//! An entry is created `PENDING` and moves through the pipeline to one of:
//! `VERIFIED` | `REJECTED` (terminal) | `PENDING` (awaiting manual review) | `ERROR`.
//! Manual review may force `VERIFIED` or `REJECTED` at any time.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::types::{ExtractedFields, FieldValue};

/// Verification status of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Created, being processed, or awaiting manual review
    Pending,
    /// Accepted (terminal)
    Verified,
    /// Tampering detected or rejected by a reviewer (terminal)
    Rejected,
    /// Pipeline failed internally
    Error,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "PENDING",
            VerificationStatus::Verified => "VERIFIED",
            VerificationStatus::Rejected => "REJECTED",
            VerificationStatus::Error => "ERROR",
        }
    }

    /// Terminal entries are never touched by automated processing
    pub fn is_terminal(&self) -> bool {
        matches!(self, VerificationStatus::Verified | VerificationStatus::Rejected)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = ucv_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(VerificationStatus::Pending),
            "VERIFIED" => Ok(VerificationStatus::Verified),
            "REJECTED" => Ok(VerificationStatus::Rejected),
            "ERROR" => Ok(VerificationStatus::Error),
            other => Err(ucv_common::Error::InvalidInput(format!(
                "Unknown verification status: {}",
                other
            ))),
        }
    }
}

/// Who decided the current verification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationSource {
    /// Not yet verified
    None,
    /// In-process stub verifier
    AggregatorMock,
    /// Remote billing aggregator
    Aggregator,
    /// Verifier unavailable or inconclusive
    AggregatorFailed,
    /// Document could not be read; automated acceptance withheld
    ExtractorFailed,
    /// Human reviewer
    Manual,
    /// Pipeline failure
    System,
}

impl VerificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationSource::None => "NONE",
            VerificationSource::AggregatorMock => "AGGREGATOR_MOCK",
            VerificationSource::Aggregator => "AGGREGATOR",
            VerificationSource::AggregatorFailed => "AGGREGATOR_FAILED",
            VerificationSource::ExtractorFailed => "EXTRACTOR_FAILED",
            VerificationSource::Manual => "MANUAL",
            VerificationSource::System => "SYSTEM",
        }
    }
}

impl fmt::Display for VerificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationSource {
    type Err = ucv_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(VerificationSource::None),
            "AGGREGATOR_MOCK" => Ok(VerificationSource::AggregatorMock),
            "AGGREGATOR" => Ok(VerificationSource::Aggregator),
            "AGGREGATOR_FAILED" => Ok(VerificationSource::AggregatorFailed),
            "EXTRACTOR_FAILED" => Ok(VerificationSource::ExtractorFailed),
            "MANUAL" => Ok(VerificationSource::Manual),
            "SYSTEM" => Ok(VerificationSource::System),
            other => Err(ucv_common::Error::InvalidInput(format!(
                "Unknown verification source: {}",
                other
            ))),
        }
    }
}

/// Declared utility category of a bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSource {
    Electricity,
    Water,
    Mobile,
    Gas,
    Telecom,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Electricity => "ELECTRICITY",
            DataSource::Water => "WATER",
            DataSource::Mobile => "MOBILE",
            DataSource::Gas => "GAS",
            DataSource::Telecom => "TELECOM",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSource {
    type Err = ucv_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ELECTRICITY" => Ok(DataSource::Electricity),
            "WATER" => Ok(DataSource::Water),
            "MOBILE" => Ok(DataSource::Mobile),
            "GAS" => Ok(DataSource::Gas),
            "TELECOM" => Ok(DataSource::Telecom),
            other => Err(ucv_common::Error::InvalidInput(format!(
                "Unknown data source: {}",
                other
            ))),
        }
    }
}

/// Clamp a percentage confidence into `0..=100`
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// One submitted bill with its declared, extracted and verification data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionEntry {
    pub entry_id: Uuid,
    pub owner_id: Uuid,
    pub data_source: DataSource,

    pub billing_amount: Option<f64>,
    pub billing_date: Option<NaiveDate>,
    pub units_consumed: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub biller_name: Option<String>,
    pub biller_category: Option<String>,
    pub bill_number: Option<String>,
    pub consumer_number: Option<String>,
    /// Overall extraction confidence (0-100)
    pub extraction_confidence: Option<f64>,
    pub extraction_raw: Option<serde_json::Value>,

    /// Base64 SHA-256 of the document bytes (or of the declared fields when imputed)
    pub content_hash: String,
    pub document_url: Option<String>,
    pub file_mime_type: Option<String>,
    pub file_size: Option<i64>,

    /// Synced from an offline client without a document
    pub is_imputed: bool,

    pub is_tampered: bool,
    pub tamper_reasons: Vec<String>,
    /// Reasons joined with "; " or a pipeline diagnostic
    pub tamper_reason: Option<String>,
    pub verification_status: VerificationStatus,
    pub verification_source: VerificationSource,
    /// Confidence in the verification outcome (0-100)
    pub verification_confidence: f64,
    pub verified_by: Option<Uuid>,
    pub verifier_response: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

impl ConsumptionEntry {
    /// Create a new `PENDING` entry
    pub fn new(owner_id: Uuid, data_source: DataSource, content_hash: String) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            owner_id,
            data_source,
            billing_amount: None,
            billing_date: None,
            units_consumed: None,
            due_date: None,
            biller_name: None,
            biller_category: None,
            bill_number: None,
            consumer_number: None,
            extraction_confidence: None,
            extraction_raw: None,
            content_hash,
            document_url: None,
            file_mime_type: None,
            file_size: None,
            is_imputed: false,
            is_tampered: false,
            tamper_reasons: Vec::new(),
            tamper_reason: None,
            verification_status: VerificationStatus::Pending,
            verification_source: VerificationSource::None,
            verification_confidence: 0.0,
            verified_by: None,
            verifier_response: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.verification_status.is_terminal()
    }

    /// Merge extraction output
    ///
    /// Present fields overwrite; absent fields keep the declared values.
    pub fn apply_extraction(&mut self, fields: &ExtractedFields) {
        if let Some(f) = &fields.billing_amount {
            self.billing_amount = Some(f.value);
        }
        if let Some(f) = &fields.billing_date {
            self.billing_date = Some(f.value);
        }
        if let Some(f) = &fields.units_consumed {
            self.units_consumed = Some(f.value);
        }
        if let Some(f) = &fields.due_date {
            self.due_date = Some(f.value);
        }
        if let Some(f) = &fields.biller_name {
            self.biller_name = Some(f.value.clone());
        }
        if let Some(f) = &fields.biller_category {
            self.biller_category = Some(f.value.clone());
        }
        if let Some(f) = &fields.bill_number {
            self.bill_number = Some(f.value.clone());
        }
        if let Some(f) = &fields.consumer_number {
            self.consumer_number = Some(f.value.clone());
        }
        if let Some(overall) = fields.overall_confidence {
            self.extraction_confidence = Some(clamp_confidence(overall * 100.0));
        }
        self.extraction_raw = Some(fields.raw.clone());
    }

    /// Current field values as verifier input
    pub fn verification_input(&self) -> ExtractedFields {
        ExtractedFields {
            billing_amount: self.billing_amount.map(FieldValue::declared),
            billing_date: self.billing_date.map(FieldValue::declared),
            due_date: self.due_date.map(FieldValue::declared),
            units_consumed: self.units_consumed.map(FieldValue::declared),
            bill_number: self.bill_number.clone().map(FieldValue::declared),
            consumer_number: self.consumer_number.clone().map(FieldValue::declared),
            biller_name: self.biller_name.clone().map(FieldValue::declared),
            biller_category: self.biller_category.clone().map(FieldValue::declared),
            overall_confidence: self.extraction_confidence.map(|c| c / 100.0),
            raw: serde_json::Value::Null,
        }
    }

    /// Automated acceptance
    pub fn mark_verified(&mut self, source: VerificationSource, confidence: f64) {
        self.verification_status = VerificationStatus::Verified;
        self.verification_source = source;
        self.verification_confidence = clamp_confidence(confidence);
        self.is_tampered = false;
        self.tamper_reasons.clear();
        self.tamper_reason = None;
    }

    /// Automated rejection; `reasons` must be non-empty
    pub fn mark_tampered(&mut self, source: VerificationSource, confidence: f64, reasons: Vec<String>) {
        self.verification_status = VerificationStatus::Rejected;
        self.verification_source = source;
        self.verification_confidence = clamp_confidence(confidence);
        self.is_tampered = true;
        self.tamper_reason = Some(reasons.join("; "));
        self.tamper_reasons = reasons;
    }

    /// Left for manual review
    pub fn mark_pending_review(&mut self, source: VerificationSource, confidence: f64) {
        self.verification_status = VerificationStatus::Pending;
        self.verification_source = source;
        self.verification_confidence = clamp_confidence(confidence);
    }

    /// Pipeline failure
    pub fn mark_error(&mut self, diagnostic: String) {
        self.verification_status = VerificationStatus::Error;
        self.verification_source = VerificationSource::System;
        self.tamper_reason = Some(diagnostic);
    }

    /// Reviewer decision; applying the same decision twice changes nothing
    pub fn apply_review(&mut self, reviewer_id: Uuid, verified: bool) {
        self.verification_status = if verified {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Rejected
        };
        self.verification_source = VerificationSource::Manual;
        self.verification_confidence = 100.0;
        self.verified_by = Some(reviewer_id);
        if verified {
            self.is_tampered = false;
            self.tamper_reasons.clear();
            self.tamper_reason = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ConsumptionEntry {
        ConsumptionEntry::new(Uuid::new_v4(), DataSource::Electricity, "hash".to_string())
    }

    #[test]
    fn test_new_entry_is_pending() {
        let entry = entry();
        assert_eq!(entry.verification_status, VerificationStatus::Pending);
        assert_eq!(entry.verification_source, VerificationSource::None);
        assert_eq!(entry.verification_confidence, 0.0);
        assert!(!entry.is_tampered);
        assert!(!entry.is_terminal());
    }

    #[test]
    fn test_enum_string_forms_match_serde() {
        assert_eq!(
            serde_json::to_value(VerificationSource::AggregatorMock).unwrap(),
            serde_json::json!("AGGREGATOR_MOCK")
        );
        assert_eq!(
            "AGGREGATOR_FAILED".parse::<VerificationSource>().unwrap(),
            VerificationSource::AggregatorFailed
        );
        assert_eq!("water".parse::<DataSource>().unwrap(), DataSource::Water);
        assert!("SOLAR".parse::<DataSource>().is_err());
        assert_eq!("rejected".parse::<VerificationStatus>().unwrap(), VerificationStatus::Rejected);
    }

    #[test]
    fn test_extraction_merge_keeps_declared_values() {
        let mut entry = entry();
        entry.billing_amount = Some(500.0);
        entry.units_consumed = Some(120.0);

        let fields = ExtractedFields {
            billing_amount: Some(FieldValue::new(512.5, 0.9)),
            bill_number: Some(FieldValue::new("EB-12345".to_string(), 0.8)),
            overall_confidence: Some(1.4),
            raw: serde_json::json!({"text": "bill"}),
            ..Default::default()
        };
        entry.apply_extraction(&fields);

        assert_eq!(entry.billing_amount, Some(512.5));
        assert_eq!(entry.units_consumed, Some(120.0));
        assert_eq!(entry.bill_number.as_deref(), Some("EB-12345"));
        assert_eq!(entry.extraction_confidence, Some(100.0));
        assert_eq!(entry.extraction_raw, Some(serde_json::json!({"text": "bill"})));
    }

    #[test]
    fn test_tampered_sets_joined_reason() {
        let mut entry = entry();
        entry.mark_tampered(
            VerificationSource::AggregatorMock,
            50.0,
            vec!["a".to_string(), "b".to_string()],
        );

        assert_eq!(entry.verification_status, VerificationStatus::Rejected);
        assert!(entry.is_tampered);
        assert_eq!(entry.tamper_reason.as_deref(), Some("a; b"));
        assert!(entry.is_terminal());
    }

    #[test]
    fn test_review_is_idempotent_and_clears_tamper() {
        let reviewer = Uuid::new_v4();
        let mut entry = entry();
        entry.mark_tampered(VerificationSource::AggregatorMock, 25.0, vec!["x".to_string()]);

        entry.apply_review(reviewer, true);
        let once = entry.clone();
        entry.apply_review(reviewer, true);

        assert_eq!(entry, once);
        assert_eq!(entry.verification_status, VerificationStatus::Verified);
        assert_eq!(entry.verification_source, VerificationSource::Manual);
        assert_eq!(entry.verification_confidence, 100.0);
        assert!(!entry.is_tampered);
        assert!(entry.tamper_reasons.is_empty());
        assert_eq!(entry.verified_by, Some(reviewer));
    }

    #[test]
    fn test_confidence_clamped() {
        let mut entry = entry();
        entry.mark_pending_review(VerificationSource::AggregatorFailed, 250.0);
        assert_eq!(entry.verification_confidence, 100.0);
        entry.mark_verified(VerificationSource::Aggregator, -3.0);
        assert_eq!(entry.verification_confidence, 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }
}
