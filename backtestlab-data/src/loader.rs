//! StockDataLoader: named-provider registry plus save/load helpers.
//!
//! The loader owns every provider it routes to. A fresh loader always has
//! the network provider registered under [`NETWORK_PROVIDER`]; file
//! providers are added per directory. Calls never fall back from one
//! provider to another.

use crate::config::{LoaderConfig, FILE_PROVIDER, NETWORK_PROVIDER};
use crate::data::naming::{data_path, FileFormat};
use crate::data::provider::{DataError, DataProvider};
use crate::data::storage::{load_market_data, write_market_data};
use crate::data::{FileProvider, NetworkProvider};
use crate::domain::{normalize_symbol, DataFrequency, MarketData, MarketDataRequest};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a multi-symbol fetch. Failures are per symbol.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub data: BTreeMap<String, MarketData>,
    pub errors: Vec<(String, DataError)>,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct StockDataLoader {
    providers: HashMap<String, Box<dyn DataProvider>>,
    default_provider: String,
}

impl StockDataLoader {
    /// Loader with the network provider in its default configuration.
    pub fn new() -> Result<Self, DataError> {
        Ok(Self::with_network(NetworkProvider::new()?))
    }

    /// Loader whose `"network"` entry is the given provider.
    pub fn with_network(network: NetworkProvider) -> Self {
        let mut providers: HashMap<String, Box<dyn DataProvider>> = HashMap::new();
        providers.insert(NETWORK_PROVIDER.to_string(), Box::new(network));
        Self {
            providers,
            default_provider: NETWORK_PROVIDER.to_string(),
        }
    }

    /// Build the registry described by `config`.
    pub fn from_config(config: &LoaderConfig) -> Result<Self, DataError> {
        let mut loader = Self::with_network(NetworkProvider::with_config(config.network.clone())?);
        for file in &config.file_providers {
            loader.add_file_provider(&file.directory, &file.name);
        }
        loader.set_default_provider(&config.default_provider)?;
        Ok(loader)
    }

    /// Register `provider` under `name`, replacing any existing entry.
    pub fn add_provider(&mut self, name: impl Into<String>, provider: Box<dyn DataProvider>) {
        let name = name.into();
        if self.providers.insert(name.clone(), provider).is_some() {
            debug!(provider = %name, "replaced registered provider");
        } else {
            debug!(provider = %name, "registered provider");
        }
    }

    /// Register a [`FileProvider`] rooted at `directory` under `name`.
    pub fn add_file_provider(&mut self, directory: impl Into<PathBuf>, name: &str) {
        let name = if name.trim().is_empty() { FILE_PROVIDER } else { name };
        self.add_provider(name, Box::new(FileProvider::with_name(directory, name)));
    }

    pub fn set_default_provider(&mut self, name: &str) -> Result<(), DataError> {
        self.provider(name)?;
        self.default_provider = name.to_string();
        Ok(())
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Registered provider names, sorted.
    pub fn available_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fetch `request` from the named provider (the default when `None`).
    pub fn get_data(
        &self,
        request: &MarketDataRequest,
        provider: Option<&str>,
    ) -> Result<MarketData, DataError> {
        let name = provider.unwrap_or(self.default_provider.as_str());
        let source = self.provider(name)?;
        debug!(
            symbol = request.symbol(),
            frequency = %request.frequency(),
            provider = name,
            "routing request"
        );
        source.fetch(request)
    }

    /// Fetch each symbol with `template`'s range, frequency and params.
    ///
    /// Only an unknown provider fails the whole call.
    pub fn get_multiple_symbols(
        &self,
        symbols: &[&str],
        template: &MarketDataRequest,
        provider: Option<&str>,
    ) -> Result<BatchResult, DataError> {
        let name = provider.unwrap_or(self.default_provider.as_str());
        let source = self.provider(name)?;

        let mut batch = BatchResult::default();
        for &symbol in symbols {
            let result = template
                .with_symbol(symbol)
                .and_then(|request| source.fetch(&request));
            match result {
                Ok(data) => {
                    batch.data.insert(data.symbol().to_string(), data);
                }
                Err(e) => {
                    warn!(symbol, provider = name, error = %e, "symbol failed in batch");
                    batch.errors.push((symbol.to_string(), e));
                }
            }
        }

        info!(
            provider = name,
            succeeded = batch.data.len(),
            failed = batch.errors.len(),
            "batch fetch complete"
        );
        Ok(batch)
    }

    /// Ask the named provider whether it can serve `symbol` at `frequency`.
    pub fn validate_symbol(
        &self,
        symbol: &str,
        frequency: DataFrequency,
        provider: Option<&str>,
    ) -> Result<bool, DataError> {
        let name = provider.unwrap_or(self.default_provider.as_str());
        let symbol = normalize_symbol(symbol)?;
        Ok(self.provider(name)?.validate_symbol(&symbol, frequency))
    }

    /// Write `data` to `path` as `format` (plus its metadata sidecar).
    /// Returns the path written.
    pub fn save_data(
        &self,
        data: &MarketData,
        path: impl AsRef<Path>,
        format: FileFormat,
    ) -> Result<PathBuf, DataError> {
        write_market_data(data, path.as_ref(), format)
    }

    /// Write `data` under `directory` using the `{symbol}_{code}.{ext}` name.
    pub fn save_data_with_timeframe(
        &self,
        data: &MarketData,
        directory: impl AsRef<Path>,
        format: FileFormat,
    ) -> Result<PathBuf, DataError> {
        let path = data_path(directory.as_ref(), data.symbol(), data.frequency(), format);
        write_market_data(data, &path, format)
    }

    /// Load a parquet/csv file, recovering identity from the file itself,
    /// its sidecar or its name.
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<MarketData, DataError> {
        load_market_data(path.as_ref(), None)
    }

    /// Load a file under an explicit symbol.
    pub fn load_from_file_as(
        &self,
        path: impl AsRef<Path>,
        symbol: &str,
    ) -> Result<MarketData, DataError> {
        let symbol = normalize_symbol(symbol)?;
        load_market_data(path.as_ref(), Some(&symbol))
    }

    fn provider(&self, name: &str) -> Result<&dyn DataProvider, DataError> {
        self.providers
            .get(name)
            .map(|p| &**p)
            .ok_or_else(|| DataError::UnknownProvider {
                name: name.to_string(),
                available: self.available_providers().join(", "),
            })
    }
}
