//! File naming convention for persisted market data.
//!
//! Layout: `{dir}/{symbol}_{frequency_code}.{ext}` with the symbol
//! lower-cased, e.g. `aapl_1d.parquet`, `petr3.sa_1wk.csv`.
//!
//! Discovery splits the file stem on its last underscore, so symbols may
//! themselves contain underscores. Files that do not fit the pattern are
//! skipped, never reported as errors.

use super::provider::DataError;
use crate::domain::DataFrequency;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// On-disk table format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Parquet,
    Csv,
}

impl FileFormat {
    /// Lookup order when more than one format exists for a symbol.
    pub const ALL: [FileFormat; 2] = [FileFormat::Parquet, FileFormat::Csv];

    pub const fn extension(self) -> &'static str {
        match self {
            FileFormat::Parquet => "parquet",
            FileFormat::Csv => "csv",
        }
    }

    /// Format for a bare extension (case-insensitive, leading dot allowed).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }

    /// Format inferred from a path's extension.
    pub fn from_path(path: &Path) -> Result<Self, DataError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::from_extension(ext).ok_or_else(|| DataError::UnsupportedFormat(ext.to_string()))
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FileFormat {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| DataError::UnsupportedFormat(s.to_string()))
    }
}

/// A file name that matched the convention.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParsedFileName {
    /// Upper-cased symbol.
    pub symbol: String,
    pub frequency: DataFrequency,
    pub format: FileFormat,
}

/// Symbol as it appears in a file name: path separators and `:` become
/// `_`, then lower-cased.
pub fn file_symbol(symbol: &str) -> String {
    symbol
        .trim()
        .replace(['/', '\\', ':'], "_")
        .to_lowercase()
}

/// `{symbol}_{code}.{ext}`
pub fn generate_filename(symbol: &str, frequency: DataFrequency, format: FileFormat) -> String {
    format!(
        "{}_{}.{}",
        file_symbol(symbol),
        frequency.code(),
        format.extension()
    )
}

/// Full path for a symbol/frequency under `dir`.
pub fn data_path(
    dir: &Path,
    symbol: &str,
    frequency: DataFrequency,
    format: FileFormat,
) -> PathBuf {
    dir.join(generate_filename(symbol, frequency, format))
}

/// Legacy name without a frequency segment: `{symbol}.{ext}`.
pub fn legacy_filename(symbol: &str, format: FileFormat) -> String {
    format!("{}.{}", file_symbol(symbol), format.extension())
}

/// Recover `(symbol, frequency, format)` from a file name.
///
/// Returns `None` for unsupported extensions, stems without an underscore,
/// unknown frequency codes, or an empty symbol segment.
pub fn parse_filename(file_name: &str) -> Option<ParsedFileName> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    let format = FileFormat::from_extension(ext)?;
    let (symbol, code) = stem.rsplit_once('_')?;
    let frequency = DataFrequency::from_code(code)?;
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return None;
    }
    Some(ParsedFileName {
        symbol: symbol.to_uppercase(),
        frequency,
        format,
    })
}

/// Scan `dir` (non-recursively) for convention-compliant data files.
///
/// A missing directory yields an empty list. Results are sorted by symbol,
/// then frequency, then format.
pub fn discover(dir: &Path) -> Result<Vec<(PathBuf, ParsedFileName)>, DataError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match parse_filename(name) {
            Some(parsed) => found.push((path, parsed)),
            None => debug!(file = %path.display(), "skipping file outside naming convention"),
        }
    }

    found.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(found)
}
