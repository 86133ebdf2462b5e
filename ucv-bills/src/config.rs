//! Configuration resolution for ucv-bills
//!
//! Tiers, highest priority first: command line -> environment -> TOML -> compiled default.
//! The root folder and bind address follow all four tiers; provider settings
//! accept environment overrides on top of the TOML file.

use std::path::{Path, PathBuf};
use tracing::info;
use ucv_common::config::{
    default_config_path, load_toml_config, CompiledDefaults, ExtractorConfig, PipelineConfig,
    RootFolderResolver, TomlConfig, UploadConfig, VerifierConfig,
};
use ucv_common::{Error, Result};

pub const MODULE_NAME: &str = "ucv-bills";

pub const EXTRACTOR_MODE_ENV: &str = "UCV_EXTRACTOR_MODE";
pub const EXTRACTOR_URL_ENV: &str = "UCV_EXTRACTOR_URL";
pub const VERIFIER_MODE_ENV: &str = "UCV_VERIFIER_MODE";
pub const AGGREGATOR_URL_ENV: &str = "UCV_AGGREGATOR_URL";
pub const VERIFIER_SEED_ENV: &str = "UCV_VERIFIER_SEED";

/// Command-line values that take precedence over everything else
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub root_folder: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub bind_address: Option<String>,
}

/// Fully resolved service settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub root_folder: PathBuf,
    pub bind_address: String,
    pub log_level: String,
    pub extractor: ExtractorConfig,
    pub verifier: VerifierConfig,
    pub uploads: UploadConfig,
    pub pipeline: PipelineConfig,
}

impl ServiceConfig {
    /// Load the TOML file (explicit path or platform default) and resolve all tiers
    pub fn load(cli: &CliOverrides) -> Result<Self> {
        let toml_config = match cli.config_path.clone().or_else(|| default_config_path(MODULE_NAME)) {
            Some(path) => load_toml_config(&path)?,
            None => TomlConfig::default(),
        };
        Self::resolve(cli, toml_config)
    }

    /// Resolve from an already loaded TOML config
    pub fn resolve(cli: &CliOverrides, mut toml_config: TomlConfig) -> Result<Self> {
        apply_env_overrides(&mut toml_config)?;

        let root_folder = RootFolderResolver::new(MODULE_NAME)
            .with_cli_override(cli.root_folder.clone())
            .resolve(&toml_config);

        let defaults = CompiledDefaults::for_current_platform();
        let bind_address = cli
            .bind_address
            .clone()
            .or(toml_config.bind_address)
            .unwrap_or(defaults.bind_address);

        let config = Self {
            root_folder,
            bind_address,
            log_level: toml_config.logging.level,
            extractor: toml_config.extractor,
            verifier: toml_config.verifier,
            uploads: toml_config.uploads,
            pipeline: toml_config.pipeline,
        };
        config.validate()?;

        info!(
            root_folder = %config.root_folder.display(),
            bind_address = %config.bind_address,
            extractor_mode = ?config.extractor.mode,
            verifier_mode = ?config.verifier.mode,
            "Configuration resolved"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.verifier.acceptance_rate) {
            return Err(Error::Config(format!(
                "verifier.acceptance_rate must be within 0..=1, got {}",
                self.verifier.acceptance_rate
            )));
        }
        if self.extractor.timeout_ms == 0 || self.verifier.timeout_ms == 0 {
            return Err(Error::Config("Provider timeouts must be greater than zero".to_string()));
        }
        if self.pipeline.max_concurrent_runs == 0 {
            return Err(Error::Config(
                "pipeline.max_concurrent_runs must be greater than zero".to_string(),
            ));
        }
        if self.uploads.max_file_size_bytes == 0 {
            return Err(Error::Config(
                "uploads.max_file_size_bytes must be greater than zero".to_string(),
            ));
        }
        if self.uploads.max_batch_files == 0 {
            return Err(Error::Config(
                "uploads.max_batch_files must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(ucv_common::config::DATABASE_FILE)
    }

    pub fn documents_path(&self) -> PathBuf {
        self.root_folder.join(ucv_common::config::DOCUMENTS_DIR)
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Apply `UCV_*` provider overrides onto the TOML values
pub fn apply_env_overrides(config: &mut TomlConfig) -> Result<()> {
    if let Some(mode) = env_value(EXTRACTOR_MODE_ENV) {
        config.extractor.mode = mode.parse()?;
        info!("Extractor mode from {}", EXTRACTOR_MODE_ENV);
    }
    if let Some(url) = env_value(EXTRACTOR_URL_ENV) {
        config.extractor.service_url = url;
        info!("Extractor URL from {}", EXTRACTOR_URL_ENV);
    }
    if let Some(mode) = env_value(VERIFIER_MODE_ENV) {
        config.verifier.mode = mode.parse()?;
        info!("Verifier mode from {}", VERIFIER_MODE_ENV);
    }
    if let Some(url) = env_value(AGGREGATOR_URL_ENV) {
        config.verifier.aggregator_url = url;
        info!("Aggregator URL from {}", AGGREGATOR_URL_ENV);
    }
    if let Some(seed) = env_value(VERIFIER_SEED_ENV) {
        let seed = seed.trim().parse::<u64>().map_err(|e| {
            Error::Config(format!("{} must be an unsigned integer: {}", VERIFIER_SEED_ENV, e))
        })?;
        config.verifier.seed = Some(seed);
    }
    Ok(())
}
