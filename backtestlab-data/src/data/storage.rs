//! Parquet/CSV persistence for market data tables.
//!
//! Table layout: `timestamp` (Datetime ns) followed by `open`, `high`, `low`,
//! `close`, `volume` (Float64). Timestamps round-trip at full precision in
//! both formats.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Parquet files carry `symbol`/`frequency`/`provider` as key/value
//!   metadata in the file footer
//! - Metadata sidecar per file (`{file}.meta.json`: identity, hash, free-form map)
//! - Schema validation on load (required columns, numeric types, parseable
//!   timestamps)
//!
//! Identity precedence on load: embedded footer metadata, then sidecar,
//! then the file name convention.

use super::naming::{parse_filename, FileFormat};
use super::provider::DataError;
use crate::domain::{Bar, DataFrequency, MarketData, Metadata};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use polars_parquet::write::KeyValue;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const OHLCV_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Parquet footer keys for the table identity.
pub const SYMBOL_KEY: &str = "symbol";
pub const FREQUENCY_KEY: &str = "frequency";
pub const PROVIDER_KEY: &str = "provider";

/// Alternative names accepted for the time index when reading foreign files.
const TIMESTAMP_ALIASES: [&str; 3] = ["timestamp", "datetime", "date"];

/// Written CSV timestamp format. `%.f` adds a fraction only when the
/// timestamp has one.
const CSV_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Metadata sidecar written next to every data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarMeta {
    pub symbol: String,
    pub frequency: DataFrequency,
    pub provider: String,
    pub format: FileFormat,
    pub row_count: usize,
    pub first_timestamp: NaiveDateTime,
    pub last_timestamp: NaiveDateTime,
    pub data_hash: String,
    pub saved_at: NaiveDateTime,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Identity values embedded in the data file itself (parquet footer).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedIdentity {
    pub symbol: Option<String>,
    pub frequency: Option<DataFrequency>,
    pub provider: Option<String>,
}

/// Raw result of reading a data file, before it is wrapped as MarketData.
#[derive(Debug, Clone)]
pub struct StoredTable {
    pub path: PathBuf,
    pub format: FileFormat,
    /// Rows in file order.
    pub bars: Vec<Bar>,
    pub embedded: EmbeddedIdentity,
    pub sidecar: Option<SidecarMeta>,
}

/// Path to the metadata sidecar for a data file.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.meta.json"))
}

/// Deterministic BLAKE3 hash over timestamps and OHLCV values.
pub fn data_hash(bars: &[Bar]) -> String {
    let mut hasher = blake3::Hasher::new();
    for bar in bars {
        let ts = bar.timestamp.and_utc();
        hasher.update(&ts.timestamp().to_le_bytes());
        hasher.update(&ts.timestamp_subsec_nanos().to_le_bytes());
        hasher.update(&bar.open.to_le_bytes());
        hasher.update(&bar.high.to_le_bytes());
        hasher.update(&bar.low.to_le_bytes());
        hasher.update(&bar.close.to_le_bytes());
        hasher.update(&bar.volume.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Write `data` to `path` in `format`, plus its sidecar.
///
/// If `path` has no extension the format's extension is appended; an
/// extension naming the other supported format is rejected. Returns the path
/// actually written.
pub fn write_market_data(
    data: &MarketData,
    path: &Path,
    format: FileFormat,
) -> Result<PathBuf, DataError> {
    let path = resolve_write_path(path, format)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| DataError::Storage(format!("failed to create dir: {e}")))?;
    }

    let tmp_path = path.with_extension(format!("{}.tmp", format.extension()));
    let written = match format {
        FileFormat::Parquet => {
            let mut df = to_dataframe(data)?;
            write_parquet(&mut df, &tmp_path, identity_metadata(data))
        }
        FileFormat::Csv => write_csv(&mut csv_frame(data)?, &tmp_path),
    };
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    // Atomic rename
    fs::rename(&tmp_path, &path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::Storage(format!("atomic rename failed: {e}"))
    })?;

    write_sidecar(data, &path, format)?;

    info!(
        symbol = data.symbol(),
        frequency = %data.frequency(),
        rows = data.len(),
        path = %path.display(),
        "saved market data"
    );
    Ok(path)
}

/// Read a data file and its sidecar (if any) without interpreting identity.
pub fn read_table(path: &Path) -> Result<StoredTable, DataError> {
    let format = FileFormat::from_path(path)?;
    if !path.is_file() {
        return Err(DataError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let (df, embedded) = match format {
        FileFormat::Parquet => read_parquet(path)?,
        FileFormat::Csv => (read_csv(path)?, EmbeddedIdentity::default()),
    };
    debug!(path = %path.display(), rows = df.height(), "read table");

    let bars = dataframe_to_bars(&df)?;
    let sidecar = read_sidecar(path);

    if let Some(meta) = &sidecar {
        let hash = data_hash(&bars);
        if meta.data_hash != hash {
            warn!(
                path = %path.display(),
                "sidecar data hash does not match table contents"
            );
        }
    }

    Ok(StoredTable {
        path: path.to_path_buf(),
        format,
        bars,
        embedded,
        sidecar,
    })
}

/// Read a data file into MarketData, recovering symbol, frequency and
/// provider from (in order) `symbol_override`, parquet footer metadata, the
/// sidecar and the file name.
///
/// A file outside the naming convention with no other identity source gets
/// its upper-cased stem as symbol and daily frequency.
pub fn load_market_data(path: &Path, symbol_override: Option<&str>) -> Result<MarketData, DataError> {
    let table = read_table(path)?;

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let parsed = parse_filename(file_name);
    let sidecar = table.sidecar.as_ref();

    let symbol = symbol_override
        .map(str::to_string)
        .or_else(|| table.embedded.symbol.clone())
        .or_else(|| sidecar.map(|m| m.symbol.clone()))
        .or_else(|| parsed.as_ref().map(|p| p.symbol.clone()))
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_uppercase())
                .unwrap_or_default()
        });

    let frequency = table
        .embedded
        .frequency
        .or_else(|| sidecar.map(|m| m.frequency))
        .or_else(|| parsed.as_ref().map(|p| p.frequency))
        .unwrap_or_else(|| {
            warn!(
                path = %path.display(),
                "no frequency in file or name, assuming {}",
                DataFrequency::Daily
            );
            DataFrequency::Daily
        });

    let provider = table
        .embedded
        .provider
        .clone()
        .or_else(|| sidecar.map(|m| m.provider.clone()))
        .unwrap_or_else(|| "file".to_string());

    let mut metadata = sidecar.map(|m| m.metadata.clone()).unwrap_or_default();
    metadata.insert(
        "source_file".to_string(),
        serde_json::Value::String(path.display().to_string()),
    );

    MarketData::from_unsorted(&symbol, frequency, provider, table.bars, metadata)
}

fn resolve_write_path(path: &Path, format: FileFormat) -> Result<PathBuf, DataError> {
    match path.extension().and_then(|e| e.to_str()) {
        None => Ok(path.with_extension(format.extension())),
        Some(ext) => match FileFormat::from_extension(ext) {
            Some(f) if f == format => Ok(path.to_path_buf()),
            Some(other) => Err(DataError::Config(format!(
                "path {} has .{} extension but format {format} was requested",
                path.display(),
                other
            ))),
            // e.g. `petr3.sa` with no real extension
            None => Ok(PathBuf::from(format!(
                "{}.{}",
                path.display(),
                format.extension()
            ))),
        },
    }
}

fn write_sidecar(data: &MarketData, path: &Path, format: FileFormat) -> Result<(), DataError> {
    let meta = SidecarMeta {
        symbol: data.symbol().to_string(),
        frequency: data.frequency(),
        provider: data.provider().to_string(),
        format,
        row_count: data.len(),
        first_timestamp: data.first_timestamp(),
        last_timestamp: data.last_timestamp(),
        data_hash: data_hash(data.bars()),
        saved_at: chrono::Local::now().naive_local(),
        metadata: data.metadata().clone(),
    };
    let json = serde_json::to_string_pretty(&meta)
        .map_err(|e| DataError::Storage(format!("meta serialization: {e}")))?;
    fs::write(sidecar_path(path), json)
        .map_err(|e| DataError::Storage(format!("meta write: {e}")))?;
    Ok(())
}

/// Missing or unreadable sidecars are not errors; identity falls back to
/// the file name.
fn read_sidecar(path: &Path) -> Option<SidecarMeta> {
    let meta_path = sidecar_path(path);
    let content = fs::read_to_string(&meta_path).ok()?;
    match serde_json::from_str(&content) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!(path = %meta_path.display(), error = %e, "ignoring malformed sidecar");
            None
        }
    }
}

// ── DataFrame conversion ────────────────────────────────────────────

fn ohlcv_columns(bars: &[Bar]) -> Vec<Column> {
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    vec![
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ]
}

/// Table with a Datetime(ns) index column and OHLCV columns.
pub fn to_dataframe(data: &MarketData) -> Result<DataFrame, DataError> {
    let nanos = data
        .bars()
        .iter()
        .map(|b| {
            b.timestamp.and_utc().timestamp_nanos_opt().ok_or_else(|| {
                DataError::Storage(format!(
                    "timestamp {} outside the storable range",
                    b.timestamp
                ))
            })
        })
        .collect::<Result<Vec<i64>, DataError>>()?;

    let mut columns = vec![Column::new(TIMESTAMP_COLUMN.into(), nanos)
        .cast(&DataType::Datetime(TimeUnit::Nanoseconds, None))
        .map_err(|e| DataError::Storage(format!("timestamp cast: {e}")))?];
    columns.extend(ohlcv_columns(data.bars()));

    DataFrame::new(columns).map_err(|e| DataError::Storage(format!("dataframe creation: {e}")))
}

/// Footer key/value pairs naming the table's symbol, frequency and provider.
fn identity_metadata(data: &MarketData) -> Vec<KeyValue> {
    [
        (SYMBOL_KEY, data.symbol()),
        (FREQUENCY_KEY, data.frequency().code()),
        (PROVIDER_KEY, data.provider()),
    ]
    .into_iter()
    .map(|(key, value)| KeyValue {
        key: key.to_string(),
        value: Some(value.to_string()),
    })
    .collect()
}

fn csv_frame(data: &MarketData) -> Result<DataFrame, DataError> {
    let stamps: Vec<String> = data
        .bars()
        .iter()
        .map(|b| b.timestamp.format(CSV_TIMESTAMP_FORMAT).to_string())
        .collect();

    let mut columns = vec![Column::new(TIMESTAMP_COLUMN.into(), stamps)];
    columns.extend(ohlcv_columns(data.bars()));

    DataFrame::new(columns).map_err(|e| DataError::Storage(format!("dataframe creation: {e}")))
}

/// Convert a loaded table to rows, validating the schema.
///
/// Column names are matched case-insensitively. The time index is the
/// first column named `timestamp`, `datetime` or `date`, or else the first
/// column of the table.
pub fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<Bar>, DataError> {
    if df.height() == 0 {
        return Err(DataError::validation("table has no rows"));
    }

    let timestamps = timestamp_values(find_timestamp_column(df)?)?;

    let mut values: Vec<Vec<f64>> = Vec::with_capacity(OHLCV_COLUMNS.len());
    for name in OHLCV_COLUMNS {
        let column = find_column(df, name)
            .ok_or_else(|| DataError::validation(format!("missing column '{name}'")))?;
        values.push(numeric_values(column, name)?);
    }

    Ok(timestamps
        .into_iter()
        .enumerate()
        .map(|(i, timestamp)| Bar {
            timestamp,
            open: values[0][i],
            high: values[1][i],
            low: values[2][i],
            close: values[3][i],
            volume: values[4][i],
        })
        .collect())
}

fn find_column<'a>(df: &'a DataFrame, name: &str) -> Option<&'a Column> {
    df.get_columns()
        .iter()
        .find(|c| c.name().as_str().eq_ignore_ascii_case(name))
}

fn find_timestamp_column(df: &DataFrame) -> Result<&Column, DataError> {
    if let Some(col) = TIMESTAMP_ALIASES
        .iter()
        .find_map(|alias| find_column(df, alias))
    {
        return Ok(col);
    }
    // CSVs written with an unnamed index column
    df.get_columns()
        .first()
        .filter(|c| {
            !OHLCV_COLUMNS
                .iter()
                .any(|n| c.name().as_str().eq_ignore_ascii_case(n))
        })
        .ok_or_else(|| DataError::validation("missing timestamp column"))
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float64
            | DataType::Float32
            | DataType::Int64
            | DataType::Int32
            | DataType::Int16
            | DataType::Int8
            | DataType::UInt64
            | DataType::UInt32
            | DataType::UInt16
            | DataType::UInt8
    )
}

fn numeric_values(column: &Column, name: &str) -> Result<Vec<f64>, DataError> {
    if !is_numeric(column.dtype()) {
        return Err(DataError::validation(format!(
            "column '{name}' is not numeric (found {})",
            column.dtype()
        )));
    }
    let cast = column
        .cast(&DataType::Float64)
        .map_err(|e| DataError::Storage(format!("{name} cast: {e}")))?;
    let ca = cast
        .as_materialized_series()
        .f64()
        .map_err(|e| DataError::Storage(format!("{name} column type: {e}")))?;

    (0..ca.len())
        .map(|i| {
            ca.get(i)
                .ok_or_else(|| DataError::validation(format!("null {name} at row {i}")))
        })
        .collect()
}

fn timestamp_values(column: &Column) -> Result<Vec<NaiveDateTime>, DataError> {
    let type_err = |e: PolarsError| DataError::Storage(format!("timestamp column type: {e}"));
    let null_err = |i: usize| DataError::validation(format!("null timestamp at row {i}"));

    match column.dtype() {
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let physical = column.cast(&DataType::Int64).map_err(type_err)?;
            let ca = physical.as_materialized_series().i64().map_err(type_err)?;
            (0..ca.len())
                .map(|i| {
                    let raw = ca.get(i).ok_or_else(|| null_err(i))?;
                    epoch_to_datetime(raw, unit).ok_or_else(|| {
                        DataError::validation(format!("timestamp out of range at row {i}"))
                    })
                })
                .collect()
        }
        DataType::Date => {
            let physical = column.cast(&DataType::Int32).map_err(type_err)?;
            let ca = physical.as_materialized_series().i32().map_err(type_err)?;
            let epoch = NaiveDate::default();
            (0..ca.len())
                .map(|i| {
                    let days = ca.get(i).ok_or_else(|| null_err(i))?;
                    epoch
                        .checked_add_signed(chrono::Duration::days(i64::from(days)))
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .ok_or_else(|| {
                            DataError::validation(format!("date out of range at row {i}"))
                        })
                })
                .collect()
        }
        DataType::String => {
            let ca = column.as_materialized_series().str().map_err(type_err)?;
            (0..ca.len())
                .map(|i| {
                    let raw = ca.get(i).ok_or_else(|| null_err(i))?;
                    parse_timestamp(raw).ok_or_else(|| {
                        DataError::validation(format!("unparseable timestamp '{raw}' at row {i}"))
                    })
                })
                .collect()
        }
        other => Err(DataError::validation(format!(
            "timestamp column '{}' has unsupported type {other}",
            column.name()
        ))),
    }
}

fn epoch_to_datetime(raw: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let dt = match unit {
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(raw)?,
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(raw)?,
        TimeUnit::Nanoseconds => DateTime::from_timestamp_nanos(raw),
    };
    Some(dt.naive_utc())
}

/// Parse a textual timestamp. Offsets are dropped after conversion to the
/// wall-clock time they were written in, so a daily bar keeps its date.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%dT%H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.naive_local());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn embedded_identity(pairs: &[KeyValue]) -> EmbeddedIdentity {
    let value = |key: &str| -> Option<String> {
        pairs
            .iter()
            .find(|kv| kv.key == key)?
            .value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    EmbeddedIdentity {
        symbol: value(SYMBOL_KEY),
        frequency: value(FREQUENCY_KEY).and_then(|c| DataFrequency::from_code(&c)),
        provider: value(PROVIDER_KEY),
    }
}

// ── Polars I/O helpers ──────────────────────────────────────────────

/// ParquetWriter has no footer metadata option, so the footer is closed
/// through the batched writer's underlying file writer.
fn write_parquet(
    df: &mut DataFrame,
    path: &Path,
    key_values: Vec<KeyValue>,
) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::Storage(format!("create file: {e}")))?;
    df.align_chunks();
    let mut batched = ParquetWriter::new(file)
        .batched(df.schema())
        .map_err(|e| DataError::Storage(format!("write parquet: {e}")))?;
    batched
        .write_batch(df)
        .map_err(|e| DataError::Storage(format!("write parquet: {e}")))?;
    batched
        .get_writer()
        .lock()
        .map_err(|_| DataError::Storage("parquet writer lock poisoned".into()))?
        .end(Some(key_values))
        .map_err(|e| DataError::Storage(format!("write parquet footer: {e}")))?;
    Ok(())
}

fn write_csv(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let mut file =
        fs::File::create(path).map_err(|e| DataError::Storage(format!("create file: {e}")))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .map_err(|e| DataError::Storage(format!("write csv: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<(DataFrame, EmbeddedIdentity), DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::Storage(format!("open: {e}")))?;
    let mut reader = ParquetReader::new(file);
    let identity = {
        let metadata = reader
            .get_metadata()
            .map_err(|e| DataError::Storage(format!("read parquet footer: {e}")))?;
        embedded_identity(metadata.key_value_metadata.as_deref().unwrap_or_default())
    };
    let df = reader
        .finish()
        .map_err(|e| DataError::Storage(format!("read parquet: {e}")))?;
    Ok((df, identity))
}

fn read_csv(path: &Path) -> Result<DataFrame, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::Storage(format!("open: {e}")))?;
    CsvReader::new(file)
        .finish()
        .map_err(|e| DataError::Storage(format!("read csv: {e}")))
}
