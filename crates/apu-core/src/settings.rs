use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use clap::{CommandFactory, FromArgMatches, Parser};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApuError, Result};
use crate::time_utils::{self, DateRange, DEFAULT_REFERENCE_TIMEZONE};

/// Accepted `--format` values.
pub const FORMATS: [&str; 2] = ["text", "json"];
/// Accepted `--log-level` values.
pub const LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Find the day and hour with the most debounced anomaly episodes in APU sensor data
#[derive(Parser, Debug, Clone)]
#[command(
    name = "apu-anomaly",
    about = "Find the day and hour with the most debounced anomaly episodes in APU sensor data",
    version
)]
pub struct Settings {
    /// CSV/JSONL file or directory of files (auto-discovered if omitted)
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Inclusive range start (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub from: Option<String>,

    /// Exclusive range end (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub to: Option<String>,

    /// Analyse one calendar month (YYYY-MM)
    #[arg(long, conflicts_with_all = ["from", "to"])]
    pub month: Option<String>,

    /// Maximum anomalous-to-anomalous gap that still extends an episode
    #[arg(long, default_value = "60s")]
    pub debounce: String,

    /// Reference timezone for day/hour attribution ("auto" = system)
    #[arg(long, default_value = DEFAULT_REFERENCE_TIMEZONE)]
    pub timezone: String,

    /// Timezone of source timestamps that carry no offset
    #[arg(long, default_value = "UTC")]
    pub source_timezone: String,

    /// Number of days in the ranked list (1-366)
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..=366))]
    pub top_n: u32,

    /// Report format
    #[arg(long, default_value = "text", value_parser = FORMATS)]
    pub format: String,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = LOG_LEVELS)]
    pub log_level: String,

    /// Log file path (stderr if omitted)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// JSON config file supplying defaults for flags not given
    #[arg(long)]
    pub config: Option<PathBuf>,
}

// ── FileConfig ─────────────────────────────────────────────────────────────────

/// Defaults read from a JSON config file.
///
/// Every field is optional; a value here only applies when the matching
/// flag was not given on the command line.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl FileConfig {
    /// `<config_dir>/apu-anomaly/config.json`.
    pub fn default_path() -> PathBuf {
        Self::path_in(&dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Config path rooted at `base_dir` (used for testing).
    pub fn path_in(base_dir: &Path) -> PathBuf {
        base_dir.join("apu-anomaly").join("config.json")
    }

    /// Read and parse a config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ApuError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content)
            .map_err(|e| ApuError::Config(format!("{}: {}", path.display(), e)))
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse process arguments and merge the config file.
    pub fn load() -> Result<Self> {
        Self::load_impl(std::env::args_os().collect(), &FileConfig::default_path())
    }

    /// Full implementation with explicit args and fallback config path, so
    /// that tests can redirect to a temporary directory.
    ///
    /// An explicit `--config` that cannot be read is an error; a missing
    /// file at `default_config` is silently ignored.
    pub fn load_impl(args: Vec<std::ffi::OsString>, default_config: &Path) -> Result<Self> {
        let matches = Settings::command().get_matches_from(args);
        let mut settings = Settings::from_arg_matches(&matches)
            .map_err(|e| ApuError::Config(e.to_string()))?;

        let file = match &settings.config {
            Some(path) => Some(FileConfig::load_from(path)?),
            None if default_config.exists() => Some(FileConfig::load_from(default_config)?),
            None => None,
        };
        if let Some(file) = file {
            debug!("Merging config file defaults");
            settings.merge_file_config(file, &matches)?;
        }

        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        Ok(settings)
    }

    /// Apply config-file values for every field not set on the command line.
    fn merge_file_config(&mut self, file: FileConfig, matches: &clap::ArgMatches) -> Result<()> {
        if !is_arg_explicitly_set(matches, "input") && file.input.is_some() {
            self.input = file.input;
        }
        if !is_arg_explicitly_set(matches, "debounce") {
            if let Some(v) = file.debounce {
                self.debounce = v;
            }
        }
        if !is_arg_explicitly_set(matches, "timezone") {
            if let Some(v) = file.timezone {
                self.timezone = v;
            }
        }
        // NOTE: clap stores the arg id using the field name (underscores).
        if !is_arg_explicitly_set(matches, "source_timezone") {
            if let Some(v) = file.source_timezone {
                self.source_timezone = v;
            }
        }
        if !is_arg_explicitly_set(matches, "top_n") {
            if let Some(v) = file.top_n {
                self.top_n = v;
            }
        }
        if !is_arg_explicitly_set(matches, "format") {
            if let Some(v) = file.format {
                self.format = one_of("format", v, &FORMATS)?;
            }
        }
        if !is_arg_explicitly_set(matches, "log_level") {
            if let Some(v) = file.log_level {
                self.log_level = one_of("log_level", v, &LOG_LEVELS)?;
            }
        }
        if !is_arg_explicitly_set(matches, "log_file") && file.log_file.is_some() {
            self.log_file = file.log_file;
        }

        // The range is taken as a unit so a file `month` never mixes with CLI `from`/`to`.
        let range_on_cli = ["from", "to", "month"]
            .iter()
            .any(|name| is_arg_explicitly_set(matches, name));
        if !range_on_cli {
            self.from = file.from;
            self.to = file.to;
            self.month = file.month;
        }
        Ok(())
    }

    /// The debounce window as a [`TimeDelta`].
    pub fn debounce_window(&self) -> Result<TimeDelta> {
        time_utils::parse_duration(&self.debounce)
    }

    /// The analysed `[from, to)` window.
    pub fn analysis_window(&self) -> Result<DateRange> {
        if let Some(month) = &self.month {
            if self.from.is_some() || self.to.is_some() {
                return Err(ApuError::Config(
                    "month cannot be combined with from/to".to_string(),
                ));
            }
            return DateRange::month(month);
        }
        let start = self
            .from
            .as_deref()
            .map(time_utils::parse_date_bound)
            .transpose()?;
        let end = self
            .to
            .as_deref()
            .map(time_utils::parse_date_bound)
            .transpose()?;
        DateRange::new(start, end)
    }

    pub fn wants_json(&self) -> bool {
        self.format == "json"
    }
}

/// Config-file values get the same closed sets as their flags.
fn one_of(key: &str, value: String, allowed: &[&str]) -> Result<String> {
    if allowed.contains(&value.as_str()) {
        Ok(value)
    } else {
        Err(ApuError::Config(format!(
            "{} must be one of {}, got \"{}\"",
            key,
            allowed.join(", "),
            value
        )))
    }
}

/// Returns `true` when `name` was supplied explicitly on the command line
/// (not via default value or environment variable).
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(clap::parser::ValueSource::CommandLine)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
