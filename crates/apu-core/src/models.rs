use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApuError, Result};

/// The nine APU sensor channels the anomaly rules inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Low-pressure signal (air leak indicator).
    Lps,
    /// Oil level switch.
    OilLevel,
    /// Compressor motor current, in amperes.
    MotorCurrent,
    /// Pressure switch of the air-dryer towers.
    Mpg,
    /// Compressor outlet pressure, in bar.
    Tp2,
    /// Intake valve state of the compressor.
    Comp,
    /// Electric signal of the discharge valve.
    DvEletric,
    /// Pressure drop across the discharge valve, in bar.
    DvPressure,
    /// Oil temperature, in °C.
    OilTemperature,
}

impl Channel {
    /// Every channel, in the column order of the MetroPT export.
    pub const ALL: [Channel; 9] = [
        Channel::Tp2,
        Channel::DvPressure,
        Channel::OilTemperature,
        Channel::MotorCurrent,
        Channel::Comp,
        Channel::DvEletric,
        Channel::Mpg,
        Channel::Lps,
        Channel::OilLevel,
    ];

    /// Column / field name used by the source data.
    pub fn field_name(self) -> &'static str {
        match self {
            Channel::Lps => "LPS",
            Channel::OilLevel => "Oil_level",
            Channel::MotorCurrent => "Motor_current",
            Channel::Mpg => "MPG",
            Channel::Tp2 => "TP2",
            Channel::Comp => "COMP",
            Channel::DvEletric => "DV_eletric",
            Channel::DvPressure => "DV_pressure",
            Channel::OilTemperature => "Oil_temperature",
        }
    }

    /// Resolve a source field name back to its channel.
    pub fn from_field_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.field_name() == name)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Optional numeric value for each sensor channel.
///
/// `None` means the channel was absent (or null) in the source record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorChannels {
    pub lps: Option<f64>,
    pub oil_level: Option<f64>,
    pub motor_current: Option<f64>,
    pub mpg: Option<f64>,
    pub tp2: Option<f64>,
    pub comp: Option<f64>,
    pub dv_eletric: Option<f64>,
    pub dv_pressure: Option<f64>,
    pub oil_temperature: Option<f64>,
}

impl SensorChannels {
    /// Value of `channel`, if present.
    pub fn get(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Lps => self.lps,
            Channel::OilLevel => self.oil_level,
            Channel::MotorCurrent => self.motor_current,
            Channel::Mpg => self.mpg,
            Channel::Tp2 => self.tp2,
            Channel::Comp => self.comp,
            Channel::DvEletric => self.dv_eletric,
            Channel::DvPressure => self.dv_pressure,
            Channel::OilTemperature => self.oil_temperature,
        }
    }

    /// Set (or clear) the value of `channel`.
    pub fn set(&mut self, channel: Channel, value: Option<f64>) {
        let slot = match channel {
            Channel::Lps => &mut self.lps,
            Channel::OilLevel => &mut self.oil_level,
            Channel::MotorCurrent => &mut self.motor_current,
            Channel::Mpg => &mut self.mpg,
            Channel::Tp2 => &mut self.tp2,
            Channel::Comp => &mut self.comp,
            Channel::DvEletric => &mut self.dv_eletric,
            Channel::DvPressure => &mut self.dv_pressure,
            Channel::OilTemperature => &mut self.oil_temperature,
        };
        *slot = value;
    }

    /// Builder-style variant of [`SensorChannels::set`].
    pub fn with(mut self, channel: Channel, value: f64) -> Self {
        self.set(channel, Some(value));
        self
    }
}

/// One sensor sample, already resolved to the reference time zone.
///
/// Only constructible through [`Reading::new`], which guarantees the
/// calendar fields are in range and every present channel is finite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    timestamp: DateTime<Utc>,
    day: u32,
    hour: u32,
    channels: SensorChannels,
}

impl Reading {
    /// Validate and build a reading.
    pub fn new(
        timestamp: DateTime<Utc>,
        day: u32,
        hour: u32,
        channels: SensorChannels,
    ) -> Result<Self> {
        if !(1..=31).contains(&day) {
            return Err(ApuError::InvalidReading(format!(
                "day {} out of range 1-31",
                day
            )));
        }
        if hour > 23 {
            return Err(ApuError::InvalidReading(format!(
                "hour {} out of range 0-23",
                hour
            )));
        }
        for channel in Channel::ALL {
            if let Some(value) = channels.get(channel) {
                if !value.is_finite() {
                    return Err(ApuError::InvalidChannel {
                        channel: channel.to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(Self {
            timestamp,
            day,
            hour,
            channels,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Calendar day of month (1-31) in the reference time zone.
    pub fn day(&self) -> u32 {
        self.day
    }

    /// Hour of day (0-23) in the reference time zone.
    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn channels(&self) -> &SensorChannels {
        &self.channels
    }
}

/// A closed anomaly episode.
///
/// `day` and `hour` come from the reading that opened the episode and
/// never change afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Timestamp of the opening reading.
    pub start: DateTime<Utc>,
    /// Timestamp of the last reading merged into the episode.
    pub end: DateTime<Utc>,
    /// Attribution day of month.
    pub day: u32,
    /// Attribution hour of day.
    pub hour: u32,
    /// Number of anomalous readings that contributed.
    pub readings: u64,
}

impl Cluster {
    /// Wall-clock span between the first and last contributing reading.
    pub fn duration(&self) -> chrono::TimeDelta {
        self.end - self.start
    }
}
