//! Tamper verifier implementations
//!
//! - [`StubTamperVerifier`]: local plausibility checks plus a seeded acceptance draw
//! - [`AggregatorClient`]: remote billing aggregator

pub mod aggregator_client;
pub mod stub_verifier;

pub use aggregator_client::AggregatorClient;
pub use stub_verifier::StubTamperVerifier;

use std::sync::Arc;
use std::time::Duration;
use ucv_common::config::{ProviderMode, VerifierConfig};

use crate::types::{TamperVerifier, VerificationError};

/// Build the configured verifier
pub fn from_config(config: &VerifierConfig) -> Result<Arc<dyn TamperVerifier>, VerificationError> {
    let verifier: Arc<dyn TamperVerifier> = match config.mode {
        ProviderMode::Stub => Arc::new(
            StubTamperVerifier::from_seed(config.acceptance_rate, config.seed)
                .with_latency(Duration::from_millis(config.simulated_latency_ms)),
        ),
        ProviderMode::Remote => Arc::new(AggregatorClient::new(
            config.aggregator_url.clone(),
            Duration::from_millis(config.timeout_ms),
        )?),
    };

    tracing::info!(verifier = verifier.name(), "Tamper verifier selected");
    Ok(verifier)
}
