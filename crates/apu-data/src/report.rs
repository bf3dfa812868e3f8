//! Peak-day / peak-hour report built from the final counters.

use std::fmt::Write as _;

use apu_core::formatting::{format_count, format_hour};
use serde::{Serialize, Serializer};

use crate::aggregator::Aggregator;

/// Default size of the ranked-days list.
pub const DEFAULT_TOP_N: usize = 10;

/// Message used when the run produced no episodes at all.
pub const NO_CLUSTERS_MESSAGE: &str = "no anomaly clusters found";

// ── Report types ──────────────────────────────────────────────────────────────

/// Episode count for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub day: u32,
    pub count: u64,
}

/// The worst hour within the peak day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakHour {
    #[serde(rename = "hourOfMax", serialize_with = "serialize_hour")]
    pub hour: u32,
    pub events_in_that_hour: u64,
}

/// The day with the most episodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakDay {
    #[serde(rename = "dayOfMax")]
    pub day: u32,
    pub events_on_that_day: u64,
    #[serde(flatten)]
    pub hour: Option<PeakHour>,
}

/// Final structured result of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    #[serde(flatten)]
    pub peak: Option<PeakDay>,
    pub top_days: Vec<DayCount>,
    pub total_docs_scanned: u64,
    pub total_clusters_found: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

fn serialize_hour<S: Serializer>(hour: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_hour(*hour))
}

impl AnomalyReport {
    /// `true` when no episode was found.
    pub fn is_empty(&self) -> bool {
        self.peak.is_none()
    }

    /// Console rendering; `period` labels the analysed window.
    pub fn render_text(&self, period: &str) -> String {
        let mut out = String::new();
        match &self.peak {
            None => {
                let _ = writeln!(out, "No anomaly clusters found in {}.", period);
            }
            Some(peak) => {
                let _ = writeln!(
                    out,
                    "{}: day with most anomaly events -> {} (events: {})",
                    period,
                    peak.day,
                    format_count(peak.events_on_that_day)
                );
                match &peak.hour {
                    Some(hour) => {
                        let _ = writeln!(
                            out,
                            "On day {} the worst hour is {}:00 with {} anomaly events (debounced).",
                            peak.day,
                            format_hour(hour.hour),
                            format_count(hour.events_in_that_hour)
                        );
                    }
                    None => {
                        let _ = writeln!(out, "No per-hour events found for day {}.", peak.day);
                    }
                }

                let _ = writeln!(out, "\nTop days by anomaly event count:");
                for entry in &self.top_days {
                    let _ = writeln!(
                        out,
                        "Day {}: {} events",
                        entry.day,
                        format_count(entry.count)
                    );
                }
            }
        }
        let _ = writeln!(
            out,
            "\nTotal scanned docs: {}  total clusters found: {}",
            format_count(self.total_docs_scanned),
            format_count(self.total_clusters_found)
        );
        out
    }
}

// ── ReportGenerator ───────────────────────────────────────────────────────────

/// Builds an [`AnomalyReport`] from final counters.
///
/// Ties are broken by first-seen order everywhere: the maximum scans only
/// replace on a strictly greater count, and the ranking is a stable sort.
#[derive(Debug, Clone, Copy)]
pub struct ReportGenerator {
    top_n: usize,
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_N)
    }
}

impl ReportGenerator {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    pub fn generate(&self, counters: &Aggregator, total_docs_scanned: u64) -> AnomalyReport {
        let peak = first_max(counters.days().iter().map(|t| (t.day, t.count))).map(
            |(day, events_on_that_day)| {
                let hour = counters
                    .day(day)
                    .and_then(|tally| first_max(tally.hours().iter().copied()))
                    .map(|(hour, events_in_that_hour)| PeakHour {
                        hour,
                        events_in_that_hour,
                    });
                PeakDay {
                    day,
                    events_on_that_day,
                    hour,
                }
            },
        );

        let mut top_days: Vec<DayCount> = counters
            .days()
            .iter()
            .map(|t| DayCount {
                day: t.day,
                count: t.count,
            })
            .collect();
        // `sort_by` is stable, so equal counts stay in first-seen order.
        top_days.sort_by(|a, b| b.count.cmp(&a.count));
        top_days.truncate(self.top_n);

        let note = peak.is_none().then(|| NO_CLUSTERS_MESSAGE.to_string());

        AnomalyReport {
            peak,
            top_days,
            total_docs_scanned,
            total_clusters_found: counters.total_clusters(),
            note,
        }
    }
}

/// Linear scan keeping the first key that reaches the maximum count.
fn first_max<K: Copy>(items: impl Iterator<Item = (K, u64)>) -> Option<(K, u64)> {
    let mut best: Option<(K, u64)> = None;
    for (key, count) in items {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((key, count));
        }
    }
    best
}

// ── Tests ─────────────────────────────────────────────────────────────────────
