//! Configuration loading and root folder resolution
//!
//! Resolution order for every setting, highest priority first:
//! 1. Command-line argument
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default
//!
//! A missing TOML file is not an error: the service logs a warning and starts
//! with compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "UCV_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "ucv.db";

/// Stored documents directory inside the root folder
pub const DOCUMENTS_DIR: &str = "documents";

/// Which implementation backs a provider port (field extractor, tamper verifier)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// Deterministic in-process implementation
    #[default]
    Stub,
    /// Remote HTTP service
    Remote,
}

impl FromStr for ProviderMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stub" | "mock" => Ok(ProviderMode::Stub),
            "remote" | "http" => Ok(ProviderMode::Remote),
            other => Err(Error::Config(format!(
                "Unknown provider mode '{}' (expected 'stub' or 'remote')",
                other
            ))),
        }
    }
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Field extraction ("OCR") provider section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub mode: ProviderMode,
    /// Base URL of the remote extraction service
    pub service_url: String,
    /// When false the remote extractor returns empty fields without calling out
    pub enabled: bool,
    /// Strategy flag forwarded to the remote service
    pub use_easyocr: bool,
    pub timeout_ms: u64,
    /// Artificial delay for the stub extractor
    pub simulated_latency_ms: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Stub,
            service_url: "http://localhost:5000".to_string(),
            enabled: true,
            use_easyocr: false,
            timeout_ms: 30_000,
            simulated_latency_ms: 0,
        }
    }
}

/// Tamper verification (billing aggregator) provider section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub mode: ProviderMode,
    /// Base URL of the remote billing aggregator
    pub aggregator_url: String,
    pub timeout_ms: u64,
    /// Probability that an untampered bill is accepted by the stub verifier
    pub acceptance_rate: f64,
    /// Seed for the stub verifier's acceptance draw (entropy when unset)
    pub seed: Option<u64>,
    /// Artificial delay for the stub verifier
    pub simulated_latency_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Stub,
            aggregator_url: "http://localhost:5001".to_string(),
            timeout_ms: 10_000,
            acceptance_rate: 0.9,
            seed: None,
            simulated_latency_ms: 0,
        }
    }
}

/// Upload limits and document locator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size_bytes: usize,
    /// Upper bound on files in one batch upload
    pub max_batch_files: usize,
    /// Public base URL under which stored documents are reachable by the extractor
    pub public_base_url: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            max_batch_files: 20,
            public_base_url: None,
        }
    }
}

/// Verification pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on concurrently running verification tasks
    pub max_concurrent_runs: usize,
    /// Maximum total wait when SQLite reports the database as locked
    pub db_lock_wait_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 8,
            db_lock_wait_ms: 5_000,
        }
    }
}

/// Contents of `ucv-bills.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub logging: LoggingConfig,
    pub extractor: ExtractorConfig,
    pub verifier: VerifierConfig,
    pub uploads: UploadConfig,
    pub pipeline: PipelineConfig,
}

/// Compiled fallbacks used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub bind_address: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = dirs::data_local_dir()
            .map(|d| d.join("ucv"))
            .unwrap_or_else(|| PathBuf::from("./ucv_data"));

        Self {
            root_folder,
            log_level: "info".to_string(),
            bind_address: "127.0.0.1:5740".to_string(),
        }
    }
}

/// Default TOML location: `<config_dir>/ucv/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ucv").join(format!("{}.toml", module_name)))
}

/// Load a TOML config file
///
/// A missing file yields defaults with a warning; a malformed file is an error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "Config file not found, using compiled defaults"
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    info!(path = %path.display(), "Loaded config file");
    Ok(config)
}

/// Resolves the root folder holding the database and stored documents
pub struct RootFolderResolver {
    module_name: String,
    cli_override: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_override: None,
        }
    }

    pub fn with_cli_override(mut self, path: Option<PathBuf>) -> Self {
        self.cli_override = path;
        self
    }

    /// CLI -> `UCV_ROOT_FOLDER` -> TOML `root_folder` -> compiled default
    pub fn resolve(&self, toml_config: &TomlConfig) -> PathBuf {
        if let Some(path) = &self.cli_override {
            info!(module = %self.module_name, "Root folder from command line");
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!(module = %self.module_name, "Root folder from {}", ROOT_FOLDER_ENV);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &toml_config.root_folder {
            info!(module = %self.module_name, "Root folder from TOML config");
            return path.clone();
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder layout on first start
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            info!(path = %self.root_folder.display(), "Creating root folder");
        }
        std::fs::create_dir_all(self.documents_path())?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn documents_path(&self) -> PathBuf {
        self.root_folder.join(DOCUMENTS_DIR)
    }
}
