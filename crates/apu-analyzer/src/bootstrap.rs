use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ── Logging bootstrap ──────────────────────────────────────────────────────────

/// Map the user-facing level names onto `tracing` filter directives.
///
/// Unknown names are passed through so `EnvFilter` syntax such as
/// `apu_data=debug` keeps working.
pub fn normalise_level(log_level: &str) -> String {
    match log_level.to_uppercase().as_str() {
        "DEBUG" => "debug".to_string(),
        "INFO" => "info".to_string(),
        "WARNING" => "warn".to_string(),
        "ERROR" | "CRITICAL" => "error".to_string(),
        _ => log_level.to_string(),
    }
}

/// Initialise the global `tracing` subscriber.
///
/// Diagnostics go to stderr so the report on stdout stays clean. With a
/// `log_file` they are appended there instead, without ANSI colours.
pub fn setup_logging(log_level: &str, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_new(normalise_level(log_level)).unwrap_or_else(|_| EnvFilter::new("info"));

    let (stderr_layer, file_layer) = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (None, Some(layer))
        }
        None => {
            let layer = fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr);
            (Some(layer), None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

// ── Input discovery ────────────────────────────────────────────────────────────

/// Default export file, relative to the working directory.
pub const DEFAULT_INPUT_FILE: &str = "data/metropt3.csv";
/// Default export directory, relative to the working directory.
pub const DEFAULT_INPUT_DIR: &str = "data";

/// Locate the sensor export when `--input` is not given.
///
/// Checks `./data/metropt3.csv`, then `./data/`.
pub fn discover_input_path() -> Option<PathBuf> {
    discover_input_path_in(Path::new("."))
}

pub fn discover_input_path_in(base: &Path) -> Option<PathBuf> {
    let candidates = [base.join(DEFAULT_INPUT_FILE), base.join(DEFAULT_INPUT_DIR)];
    candidates.into_iter().find(|p| p.exists())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
