mod bootstrap;

use anyhow::{Context, Result};
use apu_core::formatting::format_duration;
use apu_core::settings::Settings;
use apu_data::analysis::{analyze_readings, AnalysisConfig};
use apu_data::reader::{open_readings, ReaderOptions};

fn main() -> Result<()> {
    let settings = Settings::load()?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    tracing::info!("APU anomaly analyzer v{} starting", env!("CARGO_PKG_VERSION"));

    let input = settings
        .input
        .clone()
        .or_else(bootstrap::discover_input_path)
        .context("no input given and neither ./data/metropt3.csv nor ./data exists; use --input")?;

    let range = settings.analysis_window()?;
    let debounce = settings.debounce_window()?;
    let options = ReaderOptions::new(&settings.timezone, &settings.source_timezone, range)?;
    let config = AnalysisConfig {
        debounce,
        top_n: settings.top_n as usize,
    };

    tracing::info!(
        "Analyzing {} (streaming) from {} with debounce {}, reference zone {}",
        range.label(),
        input.display(),
        format_duration(debounce),
        options.reference.tz()
    );

    let mut readings = open_readings(&input, options)?;
    let result = analyze_readings(readings.by_ref(), &config)?;
    tracing::debug!(
        "Read {} file(s); {} readings outside the window skipped",
        readings.files_opened(),
        readings.out_of_range()
    );

    if settings.wants_json() {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.report.render_text(&range.label()));
    }

    Ok(())
}
