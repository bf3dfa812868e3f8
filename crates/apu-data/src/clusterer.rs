//! Streaming episode detection.
//!
//! Turns the per-reading anomaly flag into a sequence of debounced
//! [`Cluster`]s in a single forward pass, keeping only the open episode and
//! the previous timestamp in memory.
//!
//! The debounce window only bridges gaps *between anomalous readings*. A
//! normal reading always closes the open episode, however short the gap.

use apu_core::classifier::{classify, first_triggered_rule};
use apu_core::formatting::format_duration;
use apu_core::models::{Cluster, Reading};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

/// Default maximum anomalous-to-anomalous gap.
pub const DEFAULT_DEBOUNCE_SECS: i64 = 60;

// ── ClusterState ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClusterState {
    Idle,
    Open(OpenCluster),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenCluster {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    day: u32,
    hour: u32,
    readings: u64,
}

impl OpenCluster {
    fn at(reading: &Reading) -> Self {
        Self {
            start: reading.timestamp(),
            end: reading.timestamp(),
            day: reading.day(),
            hour: reading.hour(),
            readings: 1,
        }
    }

    fn close(self) -> Cluster {
        Cluster {
            start: self.start,
            end: self.end,
            day: self.day,
            hour: self.hour,
            readings: self.readings,
        }
    }
}

// ── StreamClusterer ───────────────────────────────────────────────────────────

/// O(1)-memory state machine that groups anomalous readings into episodes.
#[derive(Debug, Clone)]
pub struct StreamClusterer {
    debounce: TimeDelta,
    state: ClusterState,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Default for StreamClusterer {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(DEFAULT_DEBOUNCE_SECS))
    }
}

impl StreamClusterer {
    pub fn new(debounce: TimeDelta) -> Self {
        Self {
            debounce,
            state: ClusterState::Idle,
            last_timestamp: None,
        }
    }

    pub fn debounce(&self) -> TimeDelta {
        self.debounce
    }

    /// Whether an episode is currently open.
    pub fn is_open(&self) -> bool {
        matches!(self.state, ClusterState::Open(_))
    }

    /// Classify `reading` and feed it through [`StreamClusterer::push`].
    pub fn observe(&mut self, reading: &Reading) -> Option<Cluster> {
        self.push(reading, classify(reading))
    }

    /// Advance the state machine by one reading with its anomaly flag.
    ///
    /// Returns the episode closed by this reading, if any. Readings must
    /// arrive in non-decreasing timestamp order.
    pub fn push(&mut self, reading: &Reading, anomalous: bool) -> Option<Cluster> {
        let ts = reading.timestamp();
        let previous = self.last_timestamp.replace(ts);

        match (self.state, anomalous) {
            (ClusterState::Idle, true) => {
                self.open(reading);
                None
            }
            (ClusterState::Idle, false) => None,
            (ClusterState::Open(mut open), true) => {
                let within_window = previous.is_some_and(|prev| ts - prev <= self.debounce);
                if within_window {
                    open.end = ts;
                    open.readings += 1;
                    self.state = ClusterState::Open(open);
                    None
                } else {
                    let closed = open.close();
                    debug!(
                        "Episode split on gap > {} at {} (previous lasted {})",
                        format_duration(self.debounce),
                        ts,
                        format_duration(closed.duration())
                    );
                    self.open(reading);
                    Some(closed)
                }
            }
            (ClusterState::Open(open), false) => {
                self.state = ClusterState::Idle;
                Some(open.close())
            }
        }
    }

    /// Flush the open episode at end of stream.
    ///
    /// Leaves the clusterer idle with no remembered timestamp.
    pub fn finish(&mut self) -> Option<Cluster> {
        self.last_timestamp = None;
        match std::mem::replace(&mut self.state, ClusterState::Idle) {
            ClusterState::Open(open) => Some(open.close()),
            ClusterState::Idle => None,
        }
    }

    /// Discard all state without emitting anything.
    pub fn reset(&mut self) {
        self.state = ClusterState::Idle;
        self.last_timestamp = None;
    }

    fn open(&mut self, reading: &Reading) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let rule = first_triggered_rule(reading.channels()).map(|r| r.name());
            debug!(
                "Episode opened at {} (day {}, hour {}, rule {:?})",
                reading.timestamp(),
                reading.day(),
                reading.hour(),
                rule
            );
        }
        self.state = ClusterState::Open(OpenCluster::at(reading));
    }
}

// ── ClusterIter ───────────────────────────────────────────────────────────────

/// Lazy adapter from an iterator of readings to an iterator of clusters.
///
/// Pulls readings one at a time and yields each cluster as soon as it
/// closes; the trailing open episode is flushed when the source ends.
pub struct ClusterIter<I> {
    readings: I,
    clusterer: StreamClusterer,
    done: bool,
}

impl<I> ClusterIter<I>
where
    I: Iterator<Item = Reading>,
{
    pub fn new(readings: I, debounce: TimeDelta) -> Self {
        Self {
            readings,
            clusterer: StreamClusterer::new(debounce),
            done: false,
        }
    }
}

impl<I> Iterator for ClusterIter<I>
where
    I: Iterator<Item = Reading>,
{
    type Item = Cluster;

    fn next(&mut self) -> Option<Cluster> {
        if self.done {
            return None;
        }
        for reading in self.readings.by_ref() {
            if let Some(cluster) = self.clusterer.observe(&reading) {
                return Some(cluster);
            }
        }
        self.done = true;
        self.clusterer.finish()
    }
}

/// Extension trait adding `.clusters(debounce)` to reading iterators.
pub trait ClusterExt: Iterator<Item = Reading> + Sized {
    fn clusters(self, debounce: TimeDelta) -> ClusterIter<Self> {
        ClusterIter::new(self, debounce)
    }
}

impl<I: Iterator<Item = Reading>> ClusterExt for I {}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use apu_core::models::{Channel, SensorChannels};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 2, 5, 9, 0, 0).unwrap()
    }

    /// Reading `offset_ms` after the base instant; anomalous via LPS.
    fn reading_at(offset_ms: i64, anomalous: bool, day: u32, hour: u32) -> Reading {
        let lps = if anomalous { 1.0 } else { 0.0 };
        Reading::new(
            base() + TimeDelta::milliseconds(offset_ms),
            day,
            hour,
            SensorChannels::default().with(Channel::Lps, lps),
        )
        .unwrap()
    }

    fn run(readings: &[Reading], debounce: TimeDelta) -> Vec<Cluster> {
        readings.iter().cloned().clusters(debounce).collect()
    }

    const MIN: i64 = 60_000;

    #[test]
    fn test_no_readings_no_clusters() {
        assert!(run(&[], TimeDelta::seconds(60)).is_empty());
    }

    #[test]
    fn test_all_normal_no_clusters() {
        let readings: Vec<_> = (0..5).map(|i| reading_at(i * MIN, false, 5, 9)).collect();
        assert!(run(&readings, TimeDelta::seconds(60)).is_empty());
    }

    #[test]
    fn test_example_scenario_two_clusters_same_hour() {
        // Anomalous at 0,1,2 min, normal at 3, anomalous at 3.5 and 4.
        let readings = vec![
            reading_at(0, true, 5, 10),
            reading_at(MIN, true, 5, 10),
            reading_at(2 * MIN, true, 5, 10),
            reading_at(3 * MIN, false, 5, 10),
            reading_at(3 * MIN + 30_000, true, 5, 10),
            reading_at(4 * MIN, true, 5, 10),
        ];
        let clusters = run(&readings, TimeDelta::seconds(60));

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].start, base());
        assert_eq!(clusters[0].end, base() + TimeDelta::minutes(2));
        assert_eq!(clusters[0].readings, 3);
        assert_eq!(clusters[1].start, base() + TimeDelta::seconds(210));
        assert_eq!(clusters[1].end, base() + TimeDelta::minutes(4));
        assert!(clusters.iter().all(|c| c.day == 5 && c.hour == 10));
    }

    #[test]
    fn test_gap_exceeding_window_splits() {
        let readings = vec![reading_at(0, true, 5, 9), reading_at(2 * MIN, true, 5, 9)];
        let clusters = run(&readings, TimeDelta::seconds(60));
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].start, clusters[0].end);
        assert_eq!(clusters[1].start, base() + TimeDelta::minutes(2));
    }

    #[test]
    fn test_debounce_boundary_is_inclusive() {
        let at_window = vec![reading_at(0, true, 5, 9), reading_at(MIN, true, 5, 9)];
        assert_eq!(run(&at_window, TimeDelta::seconds(60)).len(), 1);

        let past_window = vec![reading_at(0, true, 5, 9), reading_at(MIN + 1, true, 5, 9)];
        assert_eq!(run(&past_window, TimeDelta::seconds(60)).len(), 2);
    }

    #[test]
    fn test_normal_reading_closes_even_with_zero_gap() {
        let readings = vec![
            reading_at(0, true, 5, 9),
            reading_at(0, false, 5, 9),
            reading_at(0, true, 5, 9),
        ];
        let clusters = run(&readings, TimeDelta::seconds(60));
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_attribution_comes_from_opening_reading() {
        // Episode starts at 09:59:30 and runs into the next hour.
        let readings = vec![
            reading_at(0, true, 5, 9),
            reading_at(30_000, true, 5, 10),
            reading_at(60_000, true, 6, 0),
        ];
        let clusters = run(&readings, TimeDelta::seconds(60));
        assert_eq!(clusters.len(), 1);
        assert_eq!((clusters[0].day, clusters[0].hour), (5, 9));
        assert_eq!(clusters[0].readings, 3);
    }

    #[test]
    fn test_split_opens_with_new_reading_attribution() {
        let readings = vec![reading_at(0, true, 5, 9), reading_at(2 * MIN, true, 5, 10)];
        let clusters = run(&readings, TimeDelta::seconds(60));
        assert_eq!((clusters[1].day, clusters[1].hour), (5, 10));
    }

    #[test]
    fn test_flush_on_end_covers_trailing_run() {
        let readings = vec![
            reading_at(0, false, 5, 9),
            reading_at(MIN, true, 5, 9),
            reading_at(2 * MIN, true, 5, 9),
        ];
        let mut clusterer = StreamClusterer::new(TimeDelta::seconds(60));
        for r in &readings {
            assert!(clusterer.observe(r).is_none());
        }
        assert!(clusterer.is_open());
        let last = clusterer.finish().unwrap();
        assert_eq!(last.start, base() + TimeDelta::minutes(1));
        assert_eq!(last.end, base() + TimeDelta::minutes(2));
        assert!(!clusterer.is_open());
        assert!(clusterer.finish().is_none());
    }

    #[test]
    fn test_push_uses_supplied_flag() {
        let mut clusterer = StreamClusterer::default();
        let r = reading_at(0, false, 5, 9);
        assert!(clusterer.push(&r, true).is_none());
        assert!(clusterer.is_open());
        assert!(clusterer.push(&r, false).is_some());
    }

    #[test]
    fn test_reset_discards_open_episode() {
        let mut clusterer = StreamClusterer::default();
        clusterer.observe(&reading_at(0, true, 5, 9));
        clusterer.reset();
        assert!(!clusterer.is_open());
        assert!(clusterer.finish().is_none());
    }

    #[test]
    fn test_default_debounce_is_sixty_seconds() {
        assert_eq!(StreamClusterer::default().debounce(), TimeDelta::seconds(60));
    }

    #[test]
    fn test_zero_debounce_merges_only_identical_timestamps() {
        let readings = vec![
            reading_at(0, true, 5, 9),
            reading_at(0, true, 5, 9),
            reading_at(1, true, 5, 9),
        ];
        assert_eq!(run(&readings, TimeDelta::zero()).len(), 2);
    }

    /// Reference count: a new episode starts at every anomalous reading that
    /// follows a normal one, the stream start, or a gap beyond the window.
    fn expected_episodes(flags: &[(i64, bool)], window_ms: i64) -> usize {
        let mut count = 0;
        let mut prev: Option<(i64, bool)> = None;
        for &(t, f) in flags {
            if f {
                match prev {
                    Some((pt, true)) if t - pt <= window_ms => {}
                    _ => count += 1,
                }
            }
            prev = Some((t, f));
        }
        count
    }

    proptest! {
        #[test]
        fn proptest_cluster_count_matches_run_definition(
            steps in prop::collection::vec((0i64..180_000, any::<bool>()), 0..200),
            window_secs in 0i64..120,
        ) {
            let mut t = 0;
            let mut flags = Vec::with_capacity(steps.len());
            for (delta, f) in steps {
                t += delta;
                flags.push((t, f));
            }
            let readings: Vec<_> = flags
                .iter()
                .map(|&(t, f)| reading_at(t, f, 5, 9))
                .collect();
            let clusters = run(&readings, TimeDelta::seconds(window_secs));
            prop_assert_eq!(clusters.len(), expected_episodes(&flags, window_secs * 1_000));
            for c in &clusters {
                prop_assert!(c.start <= c.end);
                prop_assert!(c.readings >= 1);
            }
            let anomalous = flags.iter().filter(|(_, f)| *f).count() as u64;
            prop_assert_eq!(clusters.iter().map(|c| c.readings).sum::<u64>(), anomalous);
        }

        #[test]
        fn proptest_replay_is_idempotent(
            steps in prop::collection::vec((0i64..120_000, any::<bool>()), 0..100),
        ) {
            let mut t = 0;
            let readings: Vec<_> = steps
                .into_iter()
                .map(|(delta, f)| {
                    t += delta;
                    reading_at(t, f, 5, 9)
                })
                .collect();
            let first = run(&readings, TimeDelta::seconds(60));
            let second = run(&readings, TimeDelta::seconds(60));
            prop_assert_eq!(first, second);
        }
    }
}
