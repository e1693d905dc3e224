//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML file and `SCANFLOW__*`
//! environment variables, then validates the merged result.

use super::error::{ConfigResult, ConfigurationError};
use super::ScanflowConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "SCANFLOW_CONFIG";

/// Default file looked up relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config/scanflow.toml";

const ENV_PREFIX: &str = "SCANFLOW";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: ScanflowConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load using `SCANFLOW_CONFIG`, falling back to `config/scanflow.toml` if it exists
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let path = env::var(CONFIG_PATH_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            });
        Self::load_from_file(path.as_deref())
    }

    /// Load from an explicit file; a given path must exist
    pub fn load_from_file(path: Option<&Path>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let config = Self::build(path, true)?;
        Self::finish(config, environment, path.map(Path::to_path_buf))
    }

    /// Load from a file without consulting environment variables
    pub fn load_file_only(path: &Path) -> ConfigResult<Arc<ConfigManager>> {
        let config = Self::build(Some(path), false)?;
        Self::finish(config, Self::detect_environment(), Some(path.to_path_buf()))
    }

    /// Wrap an in-memory configuration, validating it first
    pub fn from_config(config: ScanflowConfig) -> ConfigResult<Arc<ConfigManager>> {
        Self::finish(config, Self::detect_environment(), None)
    }

    fn build(path: Option<&Path>, with_env: bool) -> ConfigResult<ScanflowConfig> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigurationError::load_failed(
                    path.display().to_string(),
                    "configuration file does not exist",
                ));
            }
            debug!(path = %path.display(), "Reading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        if with_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let source_name = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string());

        builder
            .build()
            .and_then(|c| c.try_deserialize::<ScanflowConfig>())
            .map_err(|e| ConfigurationError::load_failed(source_name, e.to_string()))
    }

    fn finish(
        config: ScanflowConfig,
        environment: String,
        source: Option<PathBuf>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;

        let source_name = source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string());
        info!(
            environment = %environment,
            source = %source_name,
            pools = config.resources.pools.len(),
            max_concurrent_scans_limit = config.orchestration.max_concurrent_scans_limit,
            "⚙️ CONFIG: Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source,
        }))
    }

    pub fn config(&self) -> &ScanflowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Configuration rendered as JSON for diagnostics
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }

    /// `SCANFLOW_ENV`, then `APP_ENV`, defaulting to `development`
    pub fn detect_environment() -> String {
        env::var("SCANFLOW_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }
}
