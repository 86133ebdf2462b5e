//! Stub tamper verifier (offline billing-aggregator check)
//!
//! Runs four plausibility checks over the bill fields. A check that has no
//! input is not applicable and does not count towards the score.
//!
//! # Checks
//! 1. **Amount**: `> 0`, `<= 100000`, `>= 10`
//! 2. **Billing date**: not in the future, not older than 24 months
//! 3. **Bill number**: at least 5 characters from `[A-Z0-9-/]`
//! 4. **Biller category**: one of ELECTRICITY, WATER, MOBILE, GAS, TELECOM
//!
//! # Scoring
//! - `tampered` when any check fails (every failure adds a reason)
//! - confidence = `100 * passed / applicable`, 50 when nothing was applicable
//! - `verified` when untampered and an acceptance draw falls under
//!   `acceptance_rate`, modelling an aggregator that cannot always confirm
//!
//! # Example
//! ```rust,ignore
//! let verifier = StubTamperVerifier::new(0.9, StdRng::seed_from_u64(7));
//! let outcome = verifier.verify(&fields).await?;
//! assert_eq!(outcome.tampered, !outcome.reasons.is_empty());
//! ```

use async_trait::async_trait;
use chrono::{Months, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::models::VerificationSource;
use crate::types::{CheckReport, ExtractedFields, TamperVerifier, VerificationError, VerificationOutcome};

const MIN_REASONABLE_AMOUNT: f64 = 10.0;
const MAX_REASONABLE_AMOUNT: f64 = 100_000.0;
const MAX_BILL_AGE_MONTHS: u32 = 24;
const MIN_BILL_NUMBER_LEN: usize = 5;
const KNOWN_BILLERS: [&str; 5] = ["ELECTRICITY", "WATER", "MOBILE", "GAS", "TELECOM"];

/// Confidence when no check was applicable
const NEUTRAL_CONFIDENCE: f64 = 50.0;

pub const MSG_VERIFIED: &str = "Bill verified successfully";
pub const MSG_TAMPERED: &str = "Bill verification failed - potential tampering detected";
pub const MSG_FAILED: &str = "Bill verification failed";

/// In-process tamper verifier with an injected random source
pub struct StubTamperVerifier {
    acceptance_rate: f64,
    rng: Mutex<StdRng>,
    latency: Duration,
    today: Option<NaiveDate>,
}

impl StubTamperVerifier {
    pub fn new(acceptance_rate: f64, rng: StdRng) -> Self {
        Self {
            acceptance_rate: acceptance_rate.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
            latency: Duration::ZERO,
            today: None,
        }
    }

    /// Seeded when `seed` is given, otherwise from OS entropy
    pub fn from_seed(acceptance_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(acceptance_rate, rng)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Pin the reference date for the billing date check
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn draw(&self) -> Result<f64, VerificationError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| VerificationError::Internal("Random source poisoned".to_string()))?;
        Ok(rng.gen::<f64>())
    }
}

fn check_amount(amount: Option<f64>, reasons: &mut Vec<String>) -> Option<bool> {
    let amount = amount?;
    if amount <= 0.0 {
        reasons.push("Amount is zero or negative".to_string());
        return Some(false);
    }
    if amount > MAX_REASONABLE_AMOUNT {
        reasons.push("Amount exceeds reasonable limit".to_string());
        return Some(false);
    }
    if amount < MIN_REASONABLE_AMOUNT {
        reasons.push("Amount is suspiciously low".to_string());
        return Some(false);
    }
    Some(true)
}

fn check_date(date: Option<NaiveDate>, today: NaiveDate, reasons: &mut Vec<String>) -> Option<bool> {
    let date = date?;
    if date > today {
        reasons.push("Billing date is in the future".to_string());
        return Some(false);
    }
    let oldest = today
        .checked_sub_months(Months::new(MAX_BILL_AGE_MONTHS))
        .unwrap_or(NaiveDate::MIN);
    if date < oldest {
        reasons.push("Billing date is too old".to_string());
        return Some(false);
    }
    Some(true)
}

fn check_bill_number(bill_number: Option<&str>, reasons: &mut Vec<String>) -> Option<bool> {
    let bill_number = bill_number.filter(|b| !b.trim().is_empty())?;
    if bill_number.chars().count() < MIN_BILL_NUMBER_LEN {
        reasons.push("Bill number format is invalid (too short)".to_string());
        return Some(false);
    }
    let allowed = |c: char| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '/';
    if !bill_number.chars().all(allowed) {
        reasons.push("Bill number contains invalid characters".to_string());
        return Some(false);
    }
    Some(true)
}

fn check_biller(category: Option<&str>, reasons: &mut Vec<String>) -> Option<bool> {
    let category = category.filter(|c| !c.trim().is_empty())?;
    if !KNOWN_BILLERS.contains(&category.to_uppercase().as_str()) {
        reasons.push(format!("Unknown biller category: {}", category));
        return Some(false);
    }
    Some(true)
}

/// Run all checks without the acceptance draw
pub fn run_checks(fields: &ExtractedFields, today: NaiveDate) -> (CheckReport, Vec<String>) {
    let mut reasons = Vec::new();
    let report = CheckReport {
        amount_valid: check_amount(fields.amount(), &mut reasons),
        date_valid: check_date(fields.date(), today, &mut reasons),
        bill_number_valid: check_bill_number(fields.bill_number_str(), &mut reasons),
        biller_valid: check_biller(fields.biller_category_str(), &mut reasons),
    };
    (report, reasons)
}

#[async_trait]
impl TamperVerifier for StubTamperVerifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn verify(&self, fields: &ExtractedFields) -> Result<VerificationOutcome, VerificationError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let (checks, reasons) = run_checks(fields, self.today());
        let tampered = !reasons.is_empty();

        let (passed, applicable) = checks.tally();
        let confidence = if applicable == 0 {
            NEUTRAL_CONFIDENCE
        } else {
            100.0 * passed as f64 / applicable as f64
        };

        let verified = !tampered && self.draw()? < self.acceptance_rate;

        let message = if verified {
            MSG_VERIFIED
        } else if tampered {
            MSG_TAMPERED
        } else {
            MSG_FAILED
        };

        debug!(?checks, tampered, verified, confidence, "Stub verification complete");

        Ok(VerificationOutcome {
            verified,
            tampered,
            reasons,
            confidence,
            source: VerificationSource::AggregatorMock,
            message: message.to_string(),
            checks,
        })
    }
}
