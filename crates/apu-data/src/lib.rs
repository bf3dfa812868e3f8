//! Data layer for the APU anomaly analyzer.
//!
//! Reads sensor exports, groups anomalous readings into debounced episodes,
//! counts them per day and hour, and builds the peak-day / peak-hour report.

pub mod aggregator;
pub mod analysis;
pub mod clusterer;
pub mod reader;
pub mod report;

pub use apu_core as core;
