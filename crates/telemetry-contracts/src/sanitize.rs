//! Per-field sanitization of raw telemetry values.
//!
//! Producers fill a [`RawTelemetry`] with whatever they managed to read
//! (`None` when a field yielded no value) and hand it to [`sanitize`]. Odd
//! values are never rejected: each one is clamped or replaced by its
//! documented default, and the change is recorded as a [`FieldAdjustment`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::{
    DEFAULT_FUEL_CAPACITY, DEFAULT_FUEL_LEVEL, DEFAULT_OIL_PRESSURE_BAR, DEFAULT_OIL_TEMP_C,
    DEFAULT_TIRE_TEMP_C, DEFAULT_TOTAL_CARS, DEFAULT_WATER_TEMP_C, MAX_ENGINE_RPM, MAX_LAP,
    MAX_LAP_TIME_MS, MAX_POSITION, MAX_SPEED_KPH, MIN_LAP_TIME_MS, MIN_POSITION,
    TelemetrySnapshot, TelemetrySource, TireTemps, fuel_percent, lap_delta_ms,
};

/// Highest plausible tire, water or oil temperature in °C.
const MAX_PLAUSIBLE_TEMP_C: f32 = 300.0;
/// Highest plausible oil pressure in bar.
const MAX_PLAUSIBLE_OIL_PRESSURE_BAR: f32 = 20.0;

/// Unsanitized field values as read from a packet, bridge record or generator.
///
/// Integers are widened to `i64` so every producer can hand over its values
/// without a lossy conversion; [`sanitize`] narrows them into their domains.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawTelemetry {
    pub position: Option<i64>,
    pub total_cars: Option<i64>,
    pub current_lap: Option<i64>,
    pub total_laps: Option<i64>,
    /// Speed already converted to km/h. The sign is discarded.
    pub speed_kph: Option<f32>,
    /// Engine speed. The sign is discarded.
    pub engine_rpm: Option<f32>,
    pub fuel_capacity: Option<f32>,
    pub fuel_level: Option<f32>,
    /// Lap times in milliseconds. The sign is discarded.
    pub last_lap_time_ms: Option<i64>,
    pub best_lap_time_ms: Option<i64>,
    /// `[FL, FR, RL, RR]` in °C.
    pub tire_temps: [Option<f32>; 4],
    pub oil_pressure: Option<f32>,
    pub water_temp: Option<f32>,
    pub oil_temp: Option<f32>,
}

/// Why a field was adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeReason {
    /// The field could not be read at all.
    Missing,
    /// The field was NaN or infinite.
    NonFinite,
    /// The field was zero, negative or otherwise physically implausible.
    Implausible,
    /// The field was outside its domain and clamped to the nearest bound.
    Clamped,
    /// A lap time outside the valid lap window was reset to unset.
    OutOfRange,
}

impl fmt::Display for SanitizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SanitizeReason::Missing => "missing",
            SanitizeReason::NonFinite => "non-finite",
            SanitizeReason::Implausible => "implausible",
            SanitizeReason::Clamped => "clamped",
            SanitizeReason::OutOfRange => "out of range",
        };
        f.write_str(s)
    }
}

/// A recorded substitution made while building a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldAdjustment {
    pub field: &'static str,
    /// The value that was read, if any.
    pub raw: Option<f64>,
    /// The value that ended up in the snapshot.
    pub applied: f64,
    pub reason: SanitizeReason,
}

/// A snapshot together with the adjustments needed to build it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub snapshot: TelemetrySnapshot,
    pub adjustments: Vec<FieldAdjustment>,
}

impl Sanitized {
    pub fn was_adjusted(&self, field: &str) -> bool {
        self.adjustments.iter().any(|a| a.field == field)
    }
}

struct Adjuster {
    adjustments: Vec<FieldAdjustment>,
}

impl Adjuster {
    fn record(&mut self, field: &'static str, raw: Option<f64>, applied: f64, reason: SanitizeReason) {
        self.adjustments.push(FieldAdjustment {
            field,
            raw,
            applied,
            reason,
        });
    }

    /// Magnitude clamped into `[0, max]`; unreadable values become zero.
    fn magnitude(&mut self, field: &'static str, value: Option<f32>, max: f32) -> f32 {
        match value {
            None => 0.0,
            Some(v) if !v.is_finite() => {
                self.record(field, Some(f64::from(v)), 0.0, SanitizeReason::NonFinite);
                0.0
            }
            Some(v) => {
                let abs = v.abs();
                if abs > max {
                    self.record(field, Some(f64::from(v)), f64::from(max), SanitizeReason::Clamped);
                    max
                } else {
                    abs
                }
            }
        }
    }

    /// Strictly positive reading inside `(0, max]`, otherwise `default`.
    fn positive_or_default(
        &mut self,
        field: &'static str,
        value: Option<f32>,
        max: f32,
        default: f32,
    ) -> f32 {
        match value {
            None => {
                self.record(field, None, f64::from(default), SanitizeReason::Missing);
                default
            }
            Some(v) if !v.is_finite() => {
                self.record(field, Some(f64::from(v)), f64::from(default), SanitizeReason::NonFinite);
                default
            }
            Some(v) if v <= 0.0 || v > max => {
                self.record(field, Some(f64::from(v)), f64::from(default), SanitizeReason::Implausible);
                default
            }
            Some(v) => v,
        }
    }

    fn fuel_level(&mut self, value: Option<f32>) -> f32 {
        match value {
            Some(v) if v.is_finite() && v < 0.0 => {
                self.record("fuel_level", Some(f64::from(v)), 0.0, SanitizeReason::Clamped);
                0.0
            }
            other => self.positive_or_default("fuel_level", other, f32::MAX, DEFAULT_FUEL_LEVEL),
        }
    }

    /// Integer clamped into `[min, max]`; zero or missing becomes `default`.
    fn counter(&mut self, field: &'static str, value: Option<i64>, min: i64, max: i64, default: i64) -> i64 {
        match value {
            None => {
                if default != 0 {
                    self.record(field, None, default as f64, SanitizeReason::Missing);
                }
                default
            }
            Some(0) if default != 0 => {
                self.record(field, Some(0.0), default as f64, SanitizeReason::Implausible);
                default
            }
            Some(v) if v < min || v > max => {
                let clamped = v.clamp(min, max);
                self.record(field, Some(v as f64), clamped as f64, SanitizeReason::Clamped);
                clamped
            }
            Some(v) => v,
        }
    }

    fn lap_time(&mut self, field: &'static str, value: Option<i64>) -> u32 {
        let Some(raw) = value else {
            return 0;
        };
        if raw == 0 {
            return 0;
        }
        match u32::try_from(raw.unsigned_abs()) {
            Ok(ms) if (MIN_LAP_TIME_MS..=MAX_LAP_TIME_MS).contains(&ms) => ms,
            _ => {
                self.record(field, Some(raw as f64), 0.0, SanitizeReason::OutOfRange);
                0
            }
        }
    }
}

fn narrow_u16(value: i64) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn narrow_u8(value: i64) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

/// Build a snapshot from raw field values, clamping or defaulting each field.
pub fn sanitize(raw: RawTelemetry, timestamp: DateTime<Utc>, source: TelemetrySource) -> Sanitized {
    let mut adj = Adjuster {
        adjustments: Vec::new(),
    };

    let position = adj.counter(
        "position",
        raw.position,
        i64::from(MIN_POSITION),
        i64::from(MAX_POSITION),
        i64::from(MIN_POSITION),
    );
    let total_cars = adj.counter(
        "total_cars",
        raw.total_cars,
        1,
        i64::from(u8::MAX),
        i64::from(DEFAULT_TOTAL_CARS),
    );
    let current_lap = adj.counter("current_lap", raw.current_lap, 0, i64::from(MAX_LAP), 0);
    let total_laps = adj.counter("total_laps", raw.total_laps, 0, i64::from(MAX_LAP), 0);

    let speed_kph = adj.magnitude("speed_kph", raw.speed_kph, MAX_SPEED_KPH);
    let engine_rpm = adj.magnitude("engine_rpm", raw.engine_rpm, MAX_ENGINE_RPM);

    let fuel_capacity = adj.positive_or_default(
        "fuel_capacity",
        raw.fuel_capacity,
        f32::MAX,
        DEFAULT_FUEL_CAPACITY,
    );
    let fuel_level = adj.fuel_level(raw.fuel_level);

    let last_lap_time_ms = adj.lap_time("last_lap_time_ms", raw.last_lap_time_ms);
    let best_lap_time_ms = adj.lap_time("best_lap_time_ms", raw.best_lap_time_ms);

    let [fl, fr, rl, rr] = raw.tire_temps;
    let tire_temps = TireTemps {
        fl: adj.positive_or_default("tire_temp_fl", fl, MAX_PLAUSIBLE_TEMP_C, DEFAULT_TIRE_TEMP_C),
        fr: adj.positive_or_default("tire_temp_fr", fr, MAX_PLAUSIBLE_TEMP_C, DEFAULT_TIRE_TEMP_C),
        rl: adj.positive_or_default("tire_temp_rl", rl, MAX_PLAUSIBLE_TEMP_C, DEFAULT_TIRE_TEMP_C),
        rr: adj.positive_or_default("tire_temp_rr", rr, MAX_PLAUSIBLE_TEMP_C, DEFAULT_TIRE_TEMP_C),
    };

    let oil_pressure = adj.positive_or_default(
        "oil_pressure",
        raw.oil_pressure,
        MAX_PLAUSIBLE_OIL_PRESSURE_BAR,
        DEFAULT_OIL_PRESSURE_BAR,
    );
    let water_temp = adj.positive_or_default(
        "water_temp",
        raw.water_temp,
        MAX_PLAUSIBLE_TEMP_C,
        DEFAULT_WATER_TEMP_C,
    );
    let oil_temp = adj.positive_or_default(
        "oil_temp",
        raw.oil_temp,
        MAX_PLAUSIBLE_TEMP_C,
        DEFAULT_OIL_TEMP_C,
    );

    let snapshot = TelemetrySnapshot {
        position: narrow_u16(position),
        current_lap: narrow_u16(current_lap),
        total_laps: narrow_u16(total_laps),
        speed_kph,
        engine_rpm,
        fuel_capacity,
        fuel_level,
        fuel_percent: fuel_percent(fuel_level, fuel_capacity),
        last_lap_time_ms,
        best_lap_time_ms,
        delta_ms: lap_delta_ms(last_lap_time_ms, best_lap_time_ms),
        tire_temps,
        oil_pressure,
        water_temp,
        oil_temp,
        total_cars: narrow_u8(total_cars),
        timestamp,
        source,
    };

    Sanitized {
        snapshot,
        adjustments: adj.adjustments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run(raw: RawTelemetry) -> Sanitized {
        sanitize(raw, Utc::now(), TelemetrySource::Live)
    }

    #[test]
    fn empty_record_uses_documented_defaults() {
        let out = run(RawTelemetry::default());
        let s = &out.snapshot;

        assert_eq!(s.position, 1);
        assert_eq!(s.total_cars, 20);
        assert_eq!(s.current_lap, 0);
        assert_eq!(s.total_laps, 0);
        assert!(s.speed_kph.abs() < f32::EPSILON);
        assert!(s.engine_rpm.abs() < f32::EPSILON);
        assert!((s.fuel_capacity - 100.0).abs() < f32::EPSILON);
        assert!((s.fuel_level - 100.0).abs() < f32::EPSILON);
        assert!((s.fuel_percent - 100.0).abs() < f32::EPSILON);
        assert_eq!(s.tire_temps, TireTemps::default());
        assert!((s.oil_pressure - 4.5).abs() < f32::EPSILON);
        assert!((s.water_temp - 90.0).abs() < f32::EPSILON);
        assert!((s.oil_temp - 100.0).abs() < f32::EPSILON);
        assert_eq!(s.last_lap_time_ms, 0);
        assert_eq!(s.delta_ms, 0);
        assert!(out.was_adjusted("tire_temp_rr"));
        assert!(!out.was_adjusted("speed_kph"));
    }

    #[test]
    fn speed_and_rpm_are_clamped() {
        let out = run(RawTelemetry {
            speed_kph: Some(-512.0),
            engine_rpm: Some(15_000.0),
            ..RawTelemetry::default()
        });

        assert!((out.snapshot.speed_kph - 400.0).abs() < f32::EPSILON);
        assert!((out.snapshot.engine_rpm - 12_000.0).abs() < f32::EPSILON);
        assert!(out.was_adjusted("speed_kph"));
        assert!(out.was_adjusted("engine_rpm"));
    }

    #[test]
    fn non_finite_floats_are_replaced() {
        let out = run(RawTelemetry {
            speed_kph: Some(f32::NAN),
            engine_rpm: Some(f32::INFINITY),
            water_temp: Some(f32::NEG_INFINITY),
            ..RawTelemetry::default()
        });

        assert!(out.snapshot.speed_kph.abs() < f32::EPSILON);
        assert!(out.snapshot.engine_rpm.abs() < f32::EPSILON);
        assert!((out.snapshot.water_temp - 90.0).abs() < f32::EPSILON);
        let reasons: Vec<_> = out
            .adjustments
            .iter()
            .filter(|a| a.field == "speed_kph")
            .map(|a| a.reason)
            .collect();
        assert_eq!(reasons, vec![SanitizeReason::NonFinite]);
    }

    #[test]
    fn position_and_laps_are_clamped() {
        let out = run(RawTelemetry {
            position: Some(42),
            current_lap: Some(500),
            total_laps: Some(-3),
            ..RawTelemetry::default()
        });

        assert_eq!(out.snapshot.position, 20);
        assert_eq!(out.snapshot.current_lap, 200);
        assert_eq!(out.snapshot.total_laps, 0);
    }

    #[test]
    fn lap_times_outside_window_are_unset() {
        let out = run(RawTelemetry {
            last_lap_time_ms: Some(500),
            best_lap_time_ms: Some(700_000),
            ..RawTelemetry::default()
        });

        assert_eq!(out.snapshot.last_lap_time_ms, 0);
        assert_eq!(out.snapshot.best_lap_time_ms, 0);
        assert_eq!(out.snapshot.delta_ms, 0);
        assert!(out.was_adjusted("last_lap_time_ms"));
    }

    #[test]
    fn negative_lap_times_use_magnitude() {
        let out = run(RawTelemetry {
            last_lap_time_ms: Some(-95_000),
            best_lap_time_ms: Some(93_000),
            ..RawTelemetry::default()
        });

        assert_eq!(out.snapshot.last_lap_time_ms, 95_000);
        assert_eq!(out.snapshot.delta_ms, 2_000);
    }

    #[test]
    fn negative_fuel_level_is_empty_tank() {
        let out = run(RawTelemetry {
            fuel_level: Some(-4.0),
            fuel_capacity: Some(60.0),
            ..RawTelemetry::default()
        });

        assert!(out.snapshot.fuel_level.abs() < f32::EPSILON);
        assert!(out.snapshot.fuel_percent.abs() < f32::EPSILON);
    }

    #[test]
    fn implausible_temperatures_fall_back() {
        let out = run(RawTelemetry {
            tire_temps: [Some(-12.0), Some(95.0), Some(9_999.0), Some(88.0)],
            ..RawTelemetry::default()
        });

        assert!((out.snapshot.tire_temps.fl - 80.0).abs() < f32::EPSILON);
        assert!((out.snapshot.tire_temps.fr - 95.0).abs() < f32::EPSILON);
        assert!((out.snapshot.tire_temps.rl - 80.0).abs() < f32::EPSILON);
        assert!((out.snapshot.tire_temps.rr - 88.0).abs() < f32::EPSILON);
    }

    proptest! {
        #[test]
        fn prop_snapshot_fields_stay_in_domain(
            speed in proptest::num::f32::ANY,
            rpm in proptest::num::f32::ANY,
            position in any::<i64>(),
            lap in any::<i64>(),
            last in any::<i64>(),
            best in any::<i64>(),
            level in proptest::num::f32::ANY,
            capacity in proptest::num::f32::ANY,
        ) {
            let out = run(RawTelemetry {
                speed_kph: Some(speed),
                engine_rpm: Some(rpm),
                position: Some(position),
                current_lap: Some(lap),
                last_lap_time_ms: Some(last),
                best_lap_time_ms: Some(best),
                fuel_level: Some(level),
                fuel_capacity: Some(capacity),
                ..RawTelemetry::default()
            });
            let s = out.snapshot;

            prop_assert!((0.0..=400.0).contains(&s.speed_kph));
            prop_assert!((0.0..=12_000.0).contains(&s.engine_rpm));
            prop_assert!((1..=20).contains(&s.position));
            prop_assert!(s.current_lap <= 200);
            prop_assert!(s.last_lap_time_ms == 0 || (30_000..=600_000).contains(&s.last_lap_time_ms));
            prop_assert!(s.best_lap_time_ms == 0 || (30_000..=600_000).contains(&s.best_lap_time_ms));
            prop_assert!((0.0..=100.0).contains(&s.fuel_percent));
            prop_assert!(s.fuel_level.is_finite() && s.fuel_level >= 0.0);
            prop_assert!(s.fuel_capacity.is_finite() && s.fuel_capacity > 0.0);
        }
    }
}
