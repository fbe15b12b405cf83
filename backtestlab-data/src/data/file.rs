//! File data provider: serves market data from a local directory laid out
//! by the naming convention (`{symbol}_{code}.{ext}`).

use super::naming::{discover, data_path, legacy_filename, FileFormat, ParsedFileName};
use super::provider::{DataError, DataProvider};
use super::storage::read_table;
use crate::config::FILE_PROVIDER;
use crate::domain::{DataFrequency, MarketData, MarketDataRequest};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Provider rooted at a directory of parquet/csv files.
#[derive(Debug, Clone)]
pub struct FileProvider {
    directory: PathBuf,
    name: String,
}

impl FileProvider {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_name(directory, FILE_PROVIDER)
    }

    pub fn with_name(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file that would serve `symbol` at `frequency`.
    ///
    /// Tries `{symbol}_{code}.parquet`, `{symbol}_{code}.csv`, then the
    /// legacy `{symbol}.parquet` and `{symbol}.csv`.
    pub fn resolve(&self, symbol: &str, frequency: DataFrequency) -> Result<PathBuf, DataError> {
        let convention = FileFormat::ALL
            .into_iter()
            .map(|format| data_path(&self.directory, symbol, frequency, format));
        let legacy = FileFormat::ALL
            .into_iter()
            .map(|format| self.directory.join(legacy_filename(symbol, format)));

        for path in convention.chain(legacy) {
            if path.is_file() {
                debug!(symbol, %frequency, path = %path.display(), "resolved data file");
                return Ok(path);
            }
        }

        Err(DataError::FileNotFound {
            path: data_path(&self.directory, symbol, frequency, FileFormat::Parquet),
        })
    }

    /// Convention-compliant files grouped by format.
    pub fn list_files(&self) -> Result<BTreeMap<FileFormat, Vec<PathBuf>>, DataError> {
        let mut by_format: BTreeMap<FileFormat, Vec<PathBuf>> =
            FileFormat::ALL.into_iter().map(|f| (f, Vec::new())).collect();
        for (path, parsed) in discover(&self.directory)? {
            by_format.entry(parsed.format).or_default().push(path);
        }
        Ok(by_format)
    }

    /// Frequencies stored for `symbol`, in frequency order.
    pub fn available_frequencies(&self, symbol: &str) -> Vec<DataFrequency> {
        let symbol = symbol.trim().to_uppercase();
        let frequencies: BTreeSet<DataFrequency> = self
            .discovered()
            .into_iter()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.frequency)
            .collect();
        frequencies.into_iter().collect()
    }

    /// Every stored `(symbol, frequency)` pair, deduplicated across formats.
    pub fn symbol_frequency_combinations(&self) -> Vec<(String, DataFrequency)> {
        let pairs: BTreeSet<(String, DataFrequency)> = self
            .discovered()
            .into_iter()
            .map(|p| (p.symbol, p.frequency))
            .collect();
        pairs.into_iter().collect()
    }

    /// Listing helper: an unreadable directory is logged and treated as empty.
    fn discovered(&self) -> Vec<ParsedFileName> {
        match discover(&self.directory) {
            Ok(found) => found.into_iter().map(|(_, parsed)| parsed).collect(),
            Err(e) => {
                warn!(dir = %self.directory.display(), error = %e, "failed to scan data directory");
                Vec::new()
            }
        }
    }
}

impl DataProvider for FileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, request: &MarketDataRequest) -> Result<MarketData, DataError> {
        let path = self.resolve(request.symbol(), request.frequency())?;
        let table = read_table(&path)?;
        let original_rows = table.bars.len();

        // Identity comes from the request, not the file
        let data = MarketData::from_unsorted(
            request.symbol(),
            request.frequency(),
            self.name.as_str(),
            table.bars,
            Default::default(),
        )?
        .with_metadata("provider", self.name.as_str())
        .with_metadata("source_file", path.display().to_string())
        .with_metadata("frequency", request.frequency().code())
        .with_metadata("original_rows", original_rows);

        let data = if request.has_date_range() {
            let filtered = data.filter_date_range(request.start_date(), request.end_date())?;
            let rows = filtered.len();
            filtered.with_metadata("filtered_rows", json!(rows))
        } else {
            data
        };

        info!(
            symbol = data.symbol(),
            frequency = %data.frequency(),
            rows = data.len(),
            path = %path.display(),
            "loaded market data from file"
        );
        Ok(data)
    }

    fn validate_symbol(&self, symbol: &str, frequency: DataFrequency) -> bool {
        self.resolve(&symbol.trim().to_uppercase(), frequency).is_ok()
    }

    fn available_symbols(&self) -> Vec<String> {
        let symbols: BTreeSet<String> = self.discovered().into_iter().map(|p| p.symbol).collect();
        symbols.into_iter().collect()
    }
}
