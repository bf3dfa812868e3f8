//! Per-reading anomaly classification.
//!
//! A reading is anomalous when any of six fixed rules over its sensor
//! channels holds. A rule that needs an absent channel simply does not
//! fire. Classification is total: legality of the inputs is guaranteed by
//! [`Reading`] at construction time, so there is no error path here.

use crate::models::{Reading, SensorChannels};

/// Motor current (A) above which a stalled tower switch is suspicious.
pub const MOTOR_CURRENT_LIMIT: f64 = 8.0;
/// Outlet pressure (bar) below which an idle compressor is suspicious.
pub const TP2_PRESSURE_FLOOR: f64 = 7.0;
/// Oil temperature (°C) above which the unit is overheating.
pub const OIL_TEMPERATURE_LIMIT: f64 = 80.0;

/// The individual anomaly rules, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyRule {
    /// `LPS > 0`
    LowPressureSignal,
    /// `Oil_level > 0`
    OilLevelAlarm,
    /// `Motor_current > 8` while `MPG <= 0`
    MotorOverCurrent,
    /// `TP2 < 7` while `COMP <= 0`
    OutletPressureLow,
    /// `DV_eletric > 0` while `DV_pressure != 0`
    DischargeValveMismatch,
    /// `Oil_temperature > 80`
    OilOverheat,
}

impl AnomalyRule {
    pub const ALL: [AnomalyRule; 6] = [
        AnomalyRule::LowPressureSignal,
        AnomalyRule::OilLevelAlarm,
        AnomalyRule::MotorOverCurrent,
        AnomalyRule::OutletPressureLow,
        AnomalyRule::DischargeValveMismatch,
        AnomalyRule::OilOverheat,
    ];

    /// Short identifier used in log output.
    pub fn name(self) -> &'static str {
        match self {
            AnomalyRule::LowPressureSignal => "lps",
            AnomalyRule::OilLevelAlarm => "oil_level",
            AnomalyRule::MotorOverCurrent => "motor_over_current",
            AnomalyRule::OutletPressureLow => "outlet_pressure_low",
            AnomalyRule::DischargeValveMismatch => "discharge_valve_mismatch",
            AnomalyRule::OilOverheat => "oil_overheat",
        }
    }

    /// Whether this rule fires for `channels`.
    pub fn matches(self, channels: &SensorChannels) -> bool {
        match self {
            AnomalyRule::LowPressureSignal => channels.lps.is_some_and(|v| v > 0.0),
            AnomalyRule::OilLevelAlarm => channels.oil_level.is_some_and(|v| v > 0.0),
            AnomalyRule::MotorOverCurrent => match (channels.motor_current, channels.mpg) {
                (Some(current), Some(mpg)) => current > MOTOR_CURRENT_LIMIT && mpg <= 0.0,
                _ => false,
            },
            AnomalyRule::OutletPressureLow => match (channels.tp2, channels.comp) {
                (Some(tp2), Some(comp)) => tp2 < TP2_PRESSURE_FLOOR && comp <= 0.0,
                _ => false,
            },
            AnomalyRule::DischargeValveMismatch => {
                match (channels.dv_eletric, channels.dv_pressure) {
                    (Some(electric), Some(pressure)) => electric > 0.0 && pressure != 0.0,
                    _ => false,
                }
            }
            AnomalyRule::OilOverheat => channels
                .oil_temperature
                .is_some_and(|v| v > OIL_TEMPERATURE_LIMIT),
        }
    }
}

/// First rule (in [`AnomalyRule::ALL`] order) that fires, if any.
pub fn first_triggered_rule(channels: &SensorChannels) -> Option<AnomalyRule> {
    AnomalyRule::ALL.into_iter().find(|rule| rule.matches(channels))
}

/// `true` when `reading` is anomalous under any rule.
pub fn classify(reading: &Reading) -> bool {
    first_triggered_rule(reading.channels()).is_some()
}
