//! Main analysis pipeline for the APU anomaly analyzer.
//!
//! Drives one forward pass over a reading stream: classify each reading,
//! feed the clusterer, count closed episodes, and build the final
//! [`AnomalyReport`] once the stream is exhausted.

use std::time::Instant;

use apu_core::classifier::classify;
use apu_core::error::Result;
use apu_core::models::Reading;
use chrono::{TimeDelta, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::clusterer::{StreamClusterer, DEFAULT_DEBOUNCE_SECS};
use crate::report::{AnomalyReport, ReportGenerator, DEFAULT_TOP_N};

// ── Public types ──────────────────────────────────────────────────────────────

/// Tunables for one run.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisConfig {
    /// Maximum anomalous-to-anomalous gap that keeps an episode open.
    pub debounce: TimeDelta,
    /// Length of the ranked-days list.
    pub top_n: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            debounce: TimeDelta::seconds(DEFAULT_DEBOUNCE_SECS),
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// Metadata produced alongside the report.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisMetadata {
    /// ISO-8601 timestamp when this result was generated.
    pub generated_at: String,
    pub readings_scanned: u64,
    pub anomalous_readings: u64,
    pub clusters_found: u64,
    pub debounce_seconds: f64,
    /// Wall-clock seconds spent on the pass.
    pub elapsed_seconds: f64,
}

/// The complete output of [`analyze_readings`].
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub report: AnomalyReport,
    pub metadata: AnalysisMetadata,
}

// ── Public function ───────────────────────────────────────────────────────────

/// Run the classify → cluster → aggregate → report pipeline.
///
/// The first error from `readings` aborts the run. The open episode is
/// still flushed into the counters so the logged partial totals cover
/// everything seen before the failure, then the error is returned.
pub fn analyze_readings<I>(readings: I, config: &AnalysisConfig) -> Result<AnalysisResult>
where
    I: IntoIterator<Item = Result<Reading>>,
{
    let started = Instant::now();
    let mut clusterer = StreamClusterer::new(config.debounce);
    let mut counters = Aggregator::new();
    let mut scanned: u64 = 0;
    let mut anomalous: u64 = 0;

    for item in readings {
        let reading = match item {
            Ok(reading) => reading,
            Err(e) => {
                if let Some(cluster) = clusterer.finish() {
                    counters.on_cluster(&cluster);
                }
                warn!(
                    "Aborting after {} readings: {} clusters counted before failure",
                    scanned,
                    counters.total_clusters()
                );
                return Err(e);
            }
        };
        scanned += 1;
        let flag = classify(&reading);
        if flag {
            anomalous += 1;
        }
        if let Some(cluster) = clusterer.push(&reading, flag) {
            counters.on_cluster(&cluster);
        }
    }
    if let Some(cluster) = clusterer.finish() {
        counters.on_cluster(&cluster);
    }

    let report = ReportGenerator::new(config.top_n).generate(&counters, scanned);
    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "Scanned {} readings ({} anomalous), {} clusters in {:.2}s",
        scanned,
        anomalous,
        counters.total_clusters(),
        elapsed
    );

    let metadata = AnalysisMetadata {
        generated_at: Utc::now().to_rfc3339(),
        readings_scanned: scanned,
        anomalous_readings: anomalous,
        clusters_found: counters.total_clusters(),
        debounce_seconds: config.debounce.num_milliseconds() as f64 / 1000.0,
        elapsed_seconds: elapsed,
    };

    Ok(AnalysisResult { report, metadata })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use apu_core::error::ApuError;
    use apu_core::models::{Channel, SensorChannels};
    use chrono::{DateTime, TimeZone};
    use pretty_assertions::assert_eq;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 2, 5, 10, 0, 0).unwrap()
    }

    fn reading(offset_secs: i64, channels: SensorChannels) -> Result<Reading> {
        let ts = base() + TimeDelta::seconds(offset_secs);
        Reading::new(ts, 5, 10, channels)
    }

    fn normal() -> SensorChannels {
        SensorChannels::default()
            .with(Channel::Lps, 0.0)
            .with(Channel::Tp2, 9.0)
            .with(Channel::OilTemperature, 60.0)
    }

    fn lps_alarm() -> SensorChannels {
        normal().with(Channel::Lps, 1.0)
    }

    #[test]
    fn test_empty_stream() {
        let empty: Vec<Result<Reading>> = Vec::new();
        let result = analyze_readings(empty, &AnalysisConfig::default()).unwrap();
        assert!(result.report.is_empty());
        assert_eq!(result.report.total_docs_scanned, 0);
        assert_eq!(result.metadata.clusters_found, 0);
    }

    #[test]
    fn test_two_clusters_same_hour() {
        let readings = vec![
            reading(0, lps_alarm()),
            reading(60, lps_alarm()),
            reading(120, lps_alarm()),
            reading(180, normal()),
            reading(210, lps_alarm()),
            reading(240, lps_alarm()),
        ];
        let result = analyze_readings(readings, &AnalysisConfig::default()).unwrap();

        let peak = result.report.peak.unwrap();
        assert_eq!(peak.day, 5);
        assert_eq!(peak.events_on_that_day, 2);
        assert_eq!(peak.hour.unwrap().hour, 10);
        assert_eq!(peak.hour.unwrap().events_in_that_hour, 2);
        assert_eq!(result.report.total_docs_scanned, 6);
        assert_eq!(result.report.total_clusters_found, 2);
        assert_eq!(result.metadata.anomalous_readings, 5);
    }

    #[test]
    fn test_no_anomalies_reports_no_clusters() {
        let readings: Vec<_> = (0..1000).map(|i| reading(i * 10, normal())).collect();
        let result = analyze_readings(readings, &AnalysisConfig::default()).unwrap();
        assert!(result.report.is_empty());
        assert_eq!(result.report.total_docs_scanned, 1000);
        assert_eq!(result.report.total_clusters_found, 0);
        assert!(result.report.note.is_some());
    }

    #[test]
    fn test_custom_debounce_merges_wider_gaps() {
        let readings = || vec![reading(0, lps_alarm()), reading(90, lps_alarm())];
        let narrow = analyze_readings(readings(), &AnalysisConfig::default()).unwrap();
        assert_eq!(narrow.report.total_clusters_found, 2);

        let wide = AnalysisConfig {
            debounce: TimeDelta::seconds(120),
            ..AnalysisConfig::default()
        };
        let merged = analyze_readings(readings(), &wide).unwrap();
        assert_eq!(merged.report.total_clusters_found, 1);
        assert_eq!(merged.metadata.debounce_seconds, 120.0);
    }

    #[test]
    fn test_conservation_of_counts() {
        let readings: Vec<_> = (0..500)
            .map(|i| {
                if i % 7 < 3 {
                    reading(i * 30, lps_alarm())
                } else {
                    reading(i * 30, normal())
                }
            })
            .collect();
        let result = analyze_readings(readings, &AnalysisConfig::default()).unwrap();
        let summed: u64 = result.report.top_days.iter().map(|d| d.count).sum();
        assert_eq!(summed, result.report.total_clusters_found);
    }

    #[test]
    fn test_repeat_runs_are_identical() {
        let make = || {
            (0..200)
                .map(|i| {
                    if i % 5 == 0 {
                        reading(i * 45, lps_alarm())
                    } else {
                        reading(i * 45, normal())
                    }
                })
                .collect::<Vec<_>>()
        };
        let first = analyze_readings(make(), &AnalysisConfig::default()).unwrap();
        let second = analyze_readings(make(), &AnalysisConfig::default()).unwrap();
        assert_eq!(first.report, second.report);
    }

    #[test]
    fn test_error_aborts_run() {
        let readings = vec![
            reading(0, lps_alarm()),
            reading(30, lps_alarm()),
            Err(ApuError::InvalidReading("bad row".to_string())),
            reading(60, lps_alarm()),
        ];
        let err = analyze_readings(readings, &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, ApuError::InvalidReading(_)));
    }

    #[test]
    fn test_json_result_carries_report_and_metadata() {
        let readings = vec![reading(0, lps_alarm())];
        let result = analyze_readings(readings, &AnalysisConfig::default()).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["report"]["dayOfMax"], 5);
        assert_eq!(json["report"]["hourOfMax"], "10");
        assert_eq!(json["metadata"]["readings_scanned"], 1);
        assert_eq!(json["metadata"]["clusters_found"], 1);
    }
}
