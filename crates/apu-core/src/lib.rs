//! Core types for the APU anomaly analyzer.
//!
//! Holds the sensor data model, the per-reading anomaly classifier, the
//! error type, command-line settings and time-zone helpers shared by the
//! data and binary crates.

pub mod classifier;
pub mod error;
pub mod formatting;
pub mod models;
pub mod settings;
pub mod time_utils;

pub use error::{ApuError, Result};
