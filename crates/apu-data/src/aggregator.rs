//! Per-day and per-(day, hour) episode counters.
//!
//! Keys are kept in first-seen order: the report's tie-breaking depends on
//! which day (or hour) received its first episode earliest in the stream.
//! There are at most 31 days of 24 hours, so lookups are linear scans over
//! small vectors.

use apu_core::models::Cluster;

// ── DayTally ──────────────────────────────────────────────────────────────────

/// Episode counts for one day of month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayTally {
    pub day: u32,
    pub count: u64,
    /// `(hour, count)` pairs in first-seen order.
    hours: Vec<(u32, u64)>,
}

impl DayTally {
    fn new(day: u32) -> Self {
        Self {
            day,
            count: 0,
            hours: Vec::new(),
        }
    }

    fn add(&mut self, hour: u32) {
        self.count += 1;
        match self.hours.iter_mut().find(|(h, _)| *h == hour) {
            Some((_, n)) => *n += 1,
            None => self.hours.push((hour, 1)),
        }
    }

    /// `(hour, count)` pairs in first-seen order.
    pub fn hours(&self) -> &[(u32, u64)] {
        &self.hours
    }

    pub fn hour_count(&self, hour: u32) -> u64 {
        self.hours
            .iter()
            .find(|(h, _)| *h == hour)
            .map_or(0, |(_, n)| *n)
    }
}

// ── Aggregator ────────────────────────────────────────────────────────────────

/// Counters owned by one analysis run. [`Aggregator::on_cluster`] is the
/// only way counts change, and they only ever increase.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    days: Vec<DayTally>,
    total: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `cluster` under its attribution day and hour.
    pub fn on_cluster(&mut self, cluster: &Cluster) {
        let idx = match self.days.iter().position(|t| t.day == cluster.day) {
            Some(idx) => idx,
            None => {
                self.days.push(DayTally::new(cluster.day));
                self.days.len() - 1
            }
        };
        self.days[idx].add(cluster.hour);
        self.total += 1;
    }

    /// Per-day tallies in first-seen order.
    pub fn days(&self) -> &[DayTally] {
        &self.days
    }

    pub fn day(&self, day: u32) -> Option<&DayTally> {
        self.days.iter().find(|t| t.day == day)
    }

    pub fn day_count(&self, day: u32) -> u64 {
        self.day(day).map_or(0, |t| t.count)
    }

    pub fn hour_count(&self, day: u32, hour: u32) -> u64 {
        self.day(day).map_or(0, |t| t.hour_count(hour))
    }

    /// Number of clusters counted so far.
    pub fn total_clusters(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Clear all counters for a new run.
    pub fn reset(&mut self) {
        self.days.clear();
        self.total = 0;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
