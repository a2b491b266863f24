//! Configuration loader with layered sources.

use crate::{AppConfig, ConfigValidator};
use config::{Config, ConfigError, Environment, File};
use crawlq_core::CrawlqError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable selecting the config directory.
pub const CONFIG_DIR_ENV: &str = "CRAWLQ_CONFIG_DIR";

/// Environment variable selecting the environment overlay file.
pub const ENVIRONMENT_ENV: &str = "CRAWLQ_ENVIRONMENT";

/// Loads [`AppConfig`] from a config directory plus the process environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a loader rooted at `config_dir`.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `{config_dir}/default.toml` - Default values
    /// 2. `{config_dir}/{environment}.toml` - Environment-specific overrides
    /// 3. `{config_dir}/local.toml` - Local overrides
    /// 4. Environment variables like `CRAWLQ__REDIS__HOST`
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Uses `$CRAWLQ_CONFIG_DIR`, or `./config` when unset.
    pub fn from_default_location() -> Self {
        let dir = std::env::var(CONFIG_DIR_ENV).unwrap_or_else(|_| "./config".to_string());
        Self::new(dir)
    }

    /// Returns the directory this loader reads from.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Loads and validates the configuration.
    pub fn load(&self) -> Result<AppConfig, CrawlqError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var(ENVIRONMENT_ENV).unwrap_or_else(|_| "development".to_string());
        self.load_for(&environment)
    }

    /// Loads configuration using `environment` to pick the overlay file.
    pub fn load_for(&self, environment: &str) -> Result<AppConfig, CrawlqError> {
        info!(
            config_dir = %self.config_dir.display(),
            environment = %environment,
            "Loading configuration"
        );

        let mut builder = Config::builder();

        for name in ["default", environment, "local"] {
            let path = self.config_dir.join(format!("{}.toml", name));
            if path.exists() {
                debug!("Loading config from: {}", path.display());
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CRAWLQ")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_crawlq_error)?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_crawlq_error)?;
        app_config.app.environment = environment.to_string();

        ConfigValidator::validate(&app_config).map_err(|errors| {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            CrawlqError::Configuration(joined)
        })?;

        Ok(app_config)
    }
}

fn config_error_to_crawlq_error(err: ConfigError) -> CrawlqError {
    CrawlqError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path().join("absent"));
        let config = loader.load_for("test").unwrap();
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.app.environment, "test");
    }

    #[test]
    fn test_environment_file_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[worker]\nconcurrency = 4\n\n[redis]\nqueue_name = \"crawl\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("staging.toml"), "[worker]\nconcurrency = 8\n").unwrap();

        let config = ConfigLoader::new(dir.path()).load_for("staging").unwrap();
        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.redis.queue_name, "crawl");
        // Untouched keys keep their defaults.
        assert_eq!(config.redis.port, 6379);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[worker]\nconcurrency = 0\n\n[retry]\nmax_attempts = 0\n",
        )
        .unwrap();

        let err = ConfigLoader::new(dir.path()).load_for("test").unwrap_err();
        match err {
            CrawlqError::Configuration(msg) => {
                assert!(msg.contains("concurrency"));
                assert!(msg.contains("max_attempts"));
            }
            other => panic!("Expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "[worker\nconcurrency = ").unwrap();

        let err = ConfigLoader::new(dir.path()).load_for("test").unwrap_err();
        assert!(matches!(err, CrawlqError::Configuration(_)));
    }
}
