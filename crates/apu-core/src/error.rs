use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// All errors produced by the APU anomaly analyzer.
#[derive(Error, Debug)]
pub enum ApuError {
    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A CSV record could not be decoded.
    #[error("Failed to parse CSV: {0}")]
    CsvParse(#[from] csv::Error),

    /// A timestamp string did not match any recognised format.
    #[error("Invalid timestamp format: {0}")]
    TimestampParse(String),

    /// A time zone name is not a recognised IANA identifier.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// A duration string such as `"60s"` could not be parsed.
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// A sensor channel carried a value that cannot be read as a number.
    #[error("Invalid value for channel {channel}: {value}")]
    InvalidChannel { channel: String, value: String },

    /// A reading failed construction-time validation.
    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    /// A source record is structurally broken.
    #[error("Malformed record at {location}: {reason}")]
    MalformedRecord { location: String, reason: String },

    /// The source delivered a reading older than its predecessor.
    #[error("Out-of-order timestamp: {current} arrived after {previous}")]
    OutOfOrder {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    /// The expected input path does not exist.
    #[error("Data path not found: {0}")]
    DataPathNotFound(PathBuf),

    /// No CSV or JSONL files were found under the given directory.
    #[error("No CSV or JSONL files found in {0}")]
    NoDataFiles(PathBuf),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the APU crates.
pub type Result<T> = std::result::Result<T, ApuError>;
