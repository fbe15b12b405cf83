//! Loader configuration, read from TOML.
//!
//! ```toml
//! default_provider = "network"
//!
//! [network]
//! base_url = "https://query2.finance.yahoo.com"
//! max_retries = 2
//!
//! [[file_providers]]
//! name = "file"
//! directory = "data"
//! ```

use crate::data::provider::DataError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Registry name of the network provider present in every loader.
pub const NETWORK_PROVIDER: &str = "network";

/// Default registry name for a file provider.
pub const FILE_PROVIDER: &str = "file";

/// Top-level loader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Provider used when a call does not name one.
    pub default_provider: String,
    pub network: NetworkConfig,
    pub file_providers: Vec<FileProviderConfig>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            default_provider: NETWORK_PROVIDER.to_string(),
            network: NetworkConfig::default(),
            file_providers: Vec::new(),
        }
    }
}

impl LoaderConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, DataError> {
        toml::from_str(content).map_err(|e| DataError::Config(format!("parse loader TOML: {e}")))
    }

    pub fn from_path(path: &Path) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DataError::Config(format!("read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, DataError> {
        toml::to_string_pretty(self).map_err(|e| DataError::Config(format!("serialize config: {e}")))
    }
}

/// Settings for the HTTP quote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Request timeout. `None` leaves the HTTP client's default in place.
    pub timeout_secs: Option<u64>,
    /// Extra attempts after a transient failure (connect error, timeout,
    /// 429, 5xx). Zero disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_base_delay_ms: u64,
    /// Span fetched when a request has no start date.
    pub default_lookback_days: i64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query2.finance.yahoo.com".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            timeout_secs: None,
            max_retries: 0,
            retry_base_delay_ms: 500,
            default_lookback_days: 365,
        }
    }
}

/// A named file provider rooted at a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProviderConfig {
    #[serde(default = "default_file_provider_name")]
    pub name: String,
    pub directory: PathBuf,
}

fn default_file_provider_name() -> String {
    FILE_PROVIDER.to_string()
}
