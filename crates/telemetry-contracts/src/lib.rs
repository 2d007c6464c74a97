//! Telemetry snapshot contracts for the GT7 engineer.
//!
//! A [`TelemetrySnapshot`] is one immutable, fully sanitized reading of the car
//! at a single instant. Every producer (the packet decoder, the subprocess
//! bridge and the synthetic generator) builds snapshots through [`sanitize`],
//! so the domain guarantees below hold no matter where the data came from:
//!
//! - every float is finite
//! - `speed_kph` is in `[0, 400]`, `engine_rpm` in `[0, 12000]`
//! - `position` is in `[1, 20]`, laps are in `[0, 200]`
//! - lap times are either `0` (unset) or inside `[30000, 600000]` ms
//!
//! Derived fields (`fuel_percent`, `delta_ms`) are computed once by the free
//! functions [`fuel_percent`] and [`lap_delta_ms`] when the snapshot is built.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

pub mod sanitize;

pub use sanitize::{FieldAdjustment, RawTelemetry, SanitizeReason, Sanitized, sanitize};

/// Lowest race position a snapshot can report.
pub const MIN_POSITION: u16 = 1;
/// Highest race position a snapshot can report.
pub const MAX_POSITION: u16 = 20;
/// Upper bound for `current_lap` and `total_laps`.
pub const MAX_LAP: u16 = 200;
/// Upper bound for `speed_kph`.
pub const MAX_SPEED_KPH: f32 = 400.0;
/// Upper bound for `engine_rpm`.
pub const MAX_ENGINE_RPM: f32 = 12_000.0;
/// Shortest lap time accepted as a real lap (30 s).
pub const MIN_LAP_TIME_MS: u32 = 30_000;
/// Longest lap time accepted as a real lap (10 min).
pub const MAX_LAP_TIME_MS: u32 = 600_000;

pub const DEFAULT_TIRE_TEMP_C: f32 = 80.0;
pub const DEFAULT_OIL_PRESSURE_BAR: f32 = 4.5;
pub const DEFAULT_WATER_TEMP_C: f32 = 90.0;
pub const DEFAULT_OIL_TEMP_C: f32 = 100.0;
pub const DEFAULT_FUEL_CAPACITY: f32 = 100.0;
pub const DEFAULT_FUEL_LEVEL: f32 = 100.0;
pub const DEFAULT_TOTAL_CARS: u8 = 20;

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySource {
    /// Decoded from the live feed (UDP datagram or bridge process).
    Live,
    /// Produced by the synthetic generator while the live feed is silent.
    Synthetic,
}

impl TelemetrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetrySource::Live => "live",
            TelemetrySource::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for TelemetrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tire surface temperatures in °C.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TireTemps {
    pub fl: f32,
    pub fr: f32,
    pub rl: f32,
    pub rr: f32,
}

impl Default for TireTemps {
    fn default() -> Self {
        Self {
            fl: DEFAULT_TIRE_TEMP_C,
            fr: DEFAULT_TIRE_TEMP_C,
            rl: DEFAULT_TIRE_TEMP_C,
            rr: DEFAULT_TIRE_TEMP_C,
        }
    }
}

impl TireTemps {
    /// Temperatures in `[FL, FR, RL, RR]` order.
    pub fn as_array(&self) -> [f32; 4] {
        [self.fl, self.fr, self.rl, self.rr]
    }

    pub fn hottest(&self) -> f32 {
        self.as_array().into_iter().fold(f32::MIN, f32::max)
    }
}

/// One sanitized telemetry reading.
///
/// The struct is `#[non_exhaustive]`: outside this crate it can only be
/// obtained from [`sanitize`], which is what keeps the field domains honest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TelemetrySnapshot {
    pub position: u16,
    pub current_lap: u16,
    pub total_laps: u16,
    pub speed_kph: f32,
    pub engine_rpm: f32,
    pub fuel_capacity: f32,
    pub fuel_level: f32,
    pub fuel_percent: f32,
    pub last_lap_time_ms: u32,
    pub best_lap_time_ms: u32,
    /// `last_lap_time_ms - best_lap_time_ms`, or `0` when either lap is unset.
    pub delta_ms: i32,
    pub tire_temps: TireTemps,
    pub oil_pressure: f32,
    pub water_temp: f32,
    pub oil_temp: f32,
    pub total_cars: u8,
    pub timestamp: DateTime<Utc>,
    pub source: TelemetrySource,
}

impl TelemetrySnapshot {
    /// Lap delta that distinguishes "no delta available" from a zero delta.
    ///
    /// `delta_ms` keeps the wire-compatible `0` for both cases.
    pub fn lap_delta(&self) -> Option<i32> {
        if lap_time_is_set(self.last_lap_time_ms) && lap_time_is_set(self.best_lap_time_ms) {
            Some(self.delta_ms)
        } else {
            None
        }
    }

    pub fn is_live(&self) -> bool {
        self.source == TelemetrySource::Live
    }

    pub fn is_synthetic(&self) -> bool {
        self.source == TelemetrySource::Synthetic
    }
}

/// Fuel remaining as a percentage of capacity, clamped to `[0, 100]`.
///
/// A non-positive capacity cannot be divided by and reports a full tank.
pub fn fuel_percent(fuel_level: f32, fuel_capacity: f32) -> f32 {
    if fuel_capacity > 0.0 {
        let pct = fuel_level / fuel_capacity * 100.0;
        if pct.is_finite() { pct.clamp(0.0, 100.0) } else { 100.0 }
    } else {
        100.0
    }
}

/// Difference between the last and best lap, `0` unless both are set and valid.
pub fn lap_delta_ms(last_lap_time_ms: u32, best_lap_time_ms: u32) -> i32 {
    if !lap_time_is_set(last_lap_time_ms) || !lap_time_is_set(best_lap_time_ms) {
        return 0;
    }
    let delta = i64::from(last_lap_time_ms) - i64::from(best_lap_time_ms);
    i32::try_from(delta).unwrap_or(0)
}

/// A lap time counts as set when it lies inside the plausible lap window.
pub fn lap_time_is_set(lap_time_ms: u32) -> bool {
    (MIN_LAP_TIME_MS..=MAX_LAP_TIME_MS).contains(&lap_time_ms)
}
