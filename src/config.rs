//! Series configuration.
//!
//! Settings can be given as TOML text when attaching a series:
//!
//! ```toml
//! backend = "parquet"
//! defer_iteration_parsing = true
//! streaming = false
//!
//! [parallel]
//! mode = "independent"
//!
//! [json]
//! pretty = false
//!
//! [parquet]
//! compression = "zstd"
//! zstd_level = 9
//! row_group_size = 200000
//! ```
//!
//! Environment variables (`PMDIO_BACKEND`, `PMDIO_PARALLEL_MODE`,
//! `PMDIO_DEFER_PARSING`) override the parsed values. They are consulted once,
//! when the series is attached, and never afterwards.

use std::collections::HashMap;
use std::path::Path;

use log::warn;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::format::KeyValue;
use serde::Deserialize;

use crate::backend::Format;
use crate::error::{PmdError, Result};

/// How a series is attached to its storage target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    /// Write-only, truncating any existing data
    #[default]
    Create,
    /// Read existing data, no mutation
    ReadOnly,
    /// Read existing data and add new iterations
    Append,
}

impl Access {
    /// Whether mutations are legal
    pub fn is_writable(self) -> bool {
        !matches!(self, Access::ReadOnly)
    }

    /// Whether existing data is parsed on attach
    pub fn reads_existing(self) -> bool {
        !matches!(self, Access::Create)
    }
}

/// Execution mode of chunk writes across ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelMode {
    /// Every rank's tasks are gathered and executed together at a flush
    #[default]
    Collective,
    /// Chunk writes execute on the issuing rank (shared-storage engines only)
    Independent,
}

/// Parallel execution settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Collective or independent chunk writes
    pub mode: ParallelMode,
}

/// JSON engine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JsonConfig {
    /// Indent written documents
    pub pretty: bool,
}

impl Default for JsonConfig {
    fn default() -> Self {
        Self { pretty: true }
    }
}

/// Compression codec of the columnar engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    /// No compression
    None,
    /// Snappy
    Snappy,
    /// ZSTD at `zstd_level`
    #[default]
    Zstd,
}

/// Columnar engine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParquetConfig {
    /// Column compression
    pub compression: ParquetCompression,

    /// ZSTD compression level (1-22)
    pub zstd_level: i32,

    /// Elements per Parquet row group
    pub row_group_size: usize,
}

impl Default for ParquetConfig {
    fn default() -> Self {
        Self {
            compression: ParquetCompression::Zstd,
            zstd_level: 3,
            row_group_size: 1024 * 1024,
        }
    }
}

impl ParquetConfig {
    /// Writer properties carrying `metadata` in the file footer
    pub(crate) fn to_writer_properties(&self, metadata: &HashMap<String, String>) -> WriterProperties {
        let compression = match self.compression {
            ParquetCompression::Zstd => Compression::ZSTD(
                ZstdLevel::try_new(self.zstd_level).unwrap_or_default(),
            ),
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::None => Compression::UNCOMPRESSED,
        };

        let kv_metadata: Vec<KeyValue> = metadata
            .iter()
            .map(|(k, v)| KeyValue {
                key: k.clone(),
                value: Some(v.clone()),
            })
            .collect();

        WriterProperties::builder()
            .set_compression(compression)
            .set_statistics_enabled(EnabledStatistics::Chunk)
            .set_max_row_group_size(self.row_group_size.max(1))
            .set_key_value_metadata(Some(kv_metadata))
            .build()
    }
}

/// Settings fixed when a series is attached
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    /// Engine override; otherwise chosen by file extension
    pub backend: Option<Format>,

    /// List iterations on open but parse their contents on first access
    pub defer_iteration_parsing: bool,

    /// Bracket every flush in a backend step
    pub streaming: bool,

    /// Parallel execution settings
    pub parallel: ParallelConfig,

    /// JSON engine settings
    pub json: JsonConfig,

    /// Columnar engine settings
    pub parquet: ParquetConfig,
}

impl SeriesConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PmdError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `PMDIO_*` environment overrides
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PMDIO_BACKEND") {
            let format = Format::from_name(value.trim()).ok_or_else(|| {
                PmdError::Config(format!("PMDIO_BACKEND: unknown engine '{value}'"))
            })?;
            warn!("PMDIO_BACKEND overrides the engine to {format:?}");
            self.backend = Some(format);
        }
        if let Some(value) = lookup("PMDIO_PARALLEL_MODE") {
            let mode = match value.trim().to_ascii_lowercase().as_str() {
                "collective" => ParallelMode::Collective,
                "independent" => ParallelMode::Independent,
                _ => {
                    return Err(PmdError::Config(format!(
                        "PMDIO_PARALLEL_MODE: expected 'collective' or 'independent', got '{value}'"
                    )))
                }
            };
            warn!("PMDIO_PARALLEL_MODE overrides the parallel mode to {mode:?}");
            self.parallel.mode = mode;
        }
        if let Some(value) = lookup("PMDIO_DEFER_PARSING") {
            let defer = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" => false,
                _ => {
                    return Err(PmdError::Config(format!(
                        "PMDIO_DEFER_PARSING: expected a boolean, got '{value}'"
                    )))
                }
            };
            warn!("PMDIO_DEFER_PARSING overrides deferred parsing to {defer}");
            self.defer_iteration_parsing = defer;
        }
        Ok(self)
    }
}
