//! Field extractor implementations
//!
//! - [`StubFieldExtractor`]: deterministic, in-process
//! - [`RemoteFieldExtractor`]: HTTP extraction service

pub mod remote_extractor;
pub mod stub_extractor;

pub use remote_extractor::RemoteFieldExtractor;
pub use stub_extractor::StubFieldExtractor;

use std::sync::Arc;
use std::time::Duration;
use ucv_common::config::{ExtractorConfig, ProviderMode};

use crate::types::{ExtractionError, FieldExtractor};

/// Build the configured extractor
pub fn from_config(config: &ExtractorConfig) -> Result<Arc<dyn FieldExtractor>, ExtractionError> {
    let extractor: Arc<dyn FieldExtractor> = match config.mode {
        ProviderMode::Stub => Arc::new(
            StubFieldExtractor::new()
                .with_latency(Duration::from_millis(config.simulated_latency_ms)),
        ),
        ProviderMode::Remote => Arc::new(RemoteFieldExtractor::new(
            config.service_url.clone(),
            Duration::from_millis(config.timeout_ms),
            config.use_easyocr,
            config.enabled,
        )?),
    };

    tracing::info!(extractor = extractor.name(), "Field extractor selected");
    Ok(extractor)
}
