//! Configuration management for the inference tester

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Prefix for environment overrides, e.g. `INFERENCE_TESTER__REMOTE__ENDPOINT_URL`
const ENV_PREFIX: &str = "INFERENCE_TESTER";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub data: DataConfig,
    pub local: LocalConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

/// Reference dataset configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// CSV file with the reference records
    pub dataset_path: String,
    /// Label column dropped at load time
    pub target_column: String,
    /// Number of records sampled when none is requested
    #[serde(default = "default_records")]
    pub default_records: usize,
    /// Seed used for sampling
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_records() -> usize {
    1000
}

fn default_seed() -> u64 {
    42
}

/// Local scoring artifact configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    /// Path to the ONNX scoring artifact
    pub model_path: String,
    /// Expected feature columns, in model input order. Empty accepts any table.
    #[serde(default)]
    pub feature_columns: Vec<String>,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_onnx_threads() -> usize {
    1
}

/// Remote prediction API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Full prediction endpoint URL
    pub endpoint_url: String,
    /// Name of the routing key header
    pub routing_key_header: String,
    /// Value of the routing key header
    pub routing_key: String,
    /// Environment variable holding the bearer credential
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Request timeout; the HTTP client default applies when unset
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Reuse predictions for identical rows within one scorer (opt-in; skews
    /// request counts and per-record timing)
    #[serde(default = "default_memoize")]
    pub memoize: bool,
}

fn default_token_env() -> String {
    "DATAROBOT_API_TOKEN".to_string()
}

fn default_memoize() -> bool {
    false
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from the default file
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific path, with environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl RemoteConfig {
    /// Read the bearer credential from the configured environment variable
    pub fn api_token(&self) -> Result<String> {
        let token = std::env::var(&self.token_env)
            .with_context(|| format!("Environment variable {} is not set", self.token_env))?;
        if token.trim().is_empty() {
            anyhow::bail!("Environment variable {} is empty", self.token_env);
        }
        Ok(token.trim().to_string())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig {
                dataset_path: "data/bleedout_train.csv".to_string(),
                target_column: "Bleedout".to_string(),
                default_records: default_records(),
                seed: default_seed(),
            },
            local: LocalConfig {
                model_path: "models/model.onnx".to_string(),
                feature_columns: Vec::new(),
                onnx_threads: default_onnx_threads(),
            },
            remote: RemoteConfig {
                endpoint_url: concat!(
                    "https://cfds-ccm-prod.orm.datarobot.com",
                    "/predApi/v1.0/deployments/644ffa6467e8bb38ba6370b4/predictions"
                )
                .to_string(),
                routing_key_header: "DataRobot-Key".to_string(),
                routing_key: "544ec55f-61bf-f6ee-0caf-15c7f919a45d".to_string(),
                token_env: default_token_env(),
                timeout_secs: None,
                memoize: default_memoize(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.data.target_column, "Bleedout");
        assert_eq!(config.data.default_records, 1000);
        assert_eq!(config.data.seed, 42);
        assert_eq!(config.remote.routing_key_header, "DataRobot-Key");
        assert!(config.remote.timeout_secs.is_none());
        assert!(config.local.feature_columns.is_empty());
        assert!(!config.remote.memoize);
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = AppConfig::load_from_path(path).unwrap();
        assert_eq!(config.data.dataset_path, "data/bleedout_train.csv");
        assert_eq!(config.local.onnx_threads, 1);
        assert!(!config.remote.memoize);
    }

    #[test]
    fn test_missing_token_is_an_error() {
        let mut remote = AppConfig::default().remote;
        remote.token_env = "INFERENCE_TESTER_TEST_TOKEN_THAT_IS_NEVER_SET".to_string();
        assert!(remote.api_token().is_err());
    }
}
