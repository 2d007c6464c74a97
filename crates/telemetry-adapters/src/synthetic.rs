//! Synthetic telemetry used while the live feed is silent.
//!
//! Every value except the tire-temperature jitter is a function of the
//! wall-clock time alone, so restarting generation picks the cycle up where
//! it would have been and tests can pin exact outputs for a timestamp.

use chrono::{DateTime, Utc};
use gt7_telemetry_contracts::{RawTelemetry, TelemetrySnapshot, TelemetrySource, sanitize};
use rand::Rng;
use std::f64::consts::PI;

/// One simulated lap.
pub const LAP_DURATION_MS: i64 = 180_000;
/// Fuel drains from 100 to 20 over this cycle, then refills.
pub const RACE_CYCLE_SECS: f64 = 3_600.0;
/// Position changes on this period.
pub const POSITION_PERIOD_MS: i64 = 30_000;
pub const SIMULATED_LAPS: u16 = 20;

const SPEED_BASE_KPH: f64 = 140.0;
const SPEED_VARIATION_KPH: f64 = 60.0;
const RPM_BASE: f64 = 3_000.0;
const RPM_RANGE: f64 = 4_000.0;
const RPM_SHIFT_SWING: f64 = 500.0;
const RPM_MIN: f64 = 800.0;
const RPM_MAX: f64 = 8_500.0;
const FUEL_FLOOR: f64 = 5.0;
const FUEL_USED_PER_CYCLE: f64 = 80.0;
const TIRE_BASE_C: f64 = 75.0;
const TIRE_HEAT_C: f64 = 15.0;
const TIRE_SPEED_HEAT_C: f64 = 25.0;
const TIRE_JITTER_C: f64 = 5.0;
const BASE_LAP_MS: f64 = 174_000.0;
const LAP_VARIATION_MS: f64 = 6_000.0;
const BEST_LAP_GAIN_MS: f64 = 2_000.0;

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Fraction of the current simulated lap completed at `now_ms`, in `[0, 1)`.
pub fn lap_progress(now_ms: i64) -> f64 {
    now_ms.rem_euclid(LAP_DURATION_MS) as f64 / LAP_DURATION_MS as f64
}

/// Simulated lap number at `now_ms`, cycling through `1..=20`.
pub fn lap_number(now_ms: i64) -> i64 {
    now_ms.div_euclid(LAP_DURATION_MS).rem_euclid(i64::from(SIMULATED_LAPS)) + 1
}

/// Speed in km/h for a lap progress: two harmonics around a base speed.
pub fn speed_for_progress(progress: f64) -> f64 {
    let cycle = (progress * PI * 6.0).sin() * 0.3 + (progress * PI * 2.0).sin() * 0.7;
    (SPEED_BASE_KPH + cycle * SPEED_VARIATION_KPH).max(0.0)
}

fn rpm_for(speed_kph: f64, progress: f64) -> f64 {
    let gear_shift = (progress * PI * 8.0).sin();
    let rpm = RPM_BASE + speed_kph / 200.0 * RPM_RANGE + gear_shift * RPM_SHIFT_SWING;
    rpm.clamp(RPM_MIN, RPM_MAX).round()
}

fn fuel_level(now_ms: i64) -> f64 {
    let race_progress = (now_ms as f64 / 1000.0).rem_euclid(RACE_CYCLE_SECS);
    (100.0 - race_progress / RACE_CYCLE_SECS * FUEL_USED_PER_CYCLE).max(FUEL_FLOOR)
}

fn position(now_ms: i64) -> i64 {
    let cycle = now_ms.div_euclid(POSITION_PERIOD_MS).rem_euclid(6) as f64;
    (3.0 + cycle.sin() * 2.0).clamp(1.0, 8.0).round() as i64
}

/// Generate a synthetic snapshot for `now` using the thread-local RNG.
pub fn generate(now: DateTime<Utc>) -> TelemetrySnapshot {
    generate_with_rng(now, &mut rand::rng())
}

/// Generate a synthetic snapshot for `now`, drawing tire jitter from `rng`.
pub fn generate_with_rng<R: Rng>(now: DateTime<Utc>, rng: &mut R) -> TelemetrySnapshot {
    let now_ms = now.timestamp_millis();
    let progress = lap_progress(now_ms);
    let t = now_ms as f64;

    let speed = speed_for_progress(progress);
    let tire_heat = TIRE_BASE_C + TIRE_HEAT_C + speed / 200.0 * TIRE_SPEED_HEAT_C;
    let mut tire = || Some(round1(tire_heat + rng.random::<f64>() * TIRE_JITTER_C) as f32);

    let raw = RawTelemetry {
        position: Some(position(now_ms)),
        total_cars: Some(20),
        current_lap: Some(lap_number(now_ms)),
        total_laps: Some(i64::from(SIMULATED_LAPS)),
        speed_kph: Some(round1(speed) as f32),
        engine_rpm: Some(rpm_for(speed, progress) as f32),
        fuel_capacity: Some(100.0),
        fuel_level: Some(fuel_level(now_ms) as f32),
        last_lap_time_ms: Some((BASE_LAP_MS + (progress * PI).sin() * LAP_VARIATION_MS).round() as i64),
        best_lap_time_ms: Some((BASE_LAP_MS - BEST_LAP_GAIN_MS) as i64),
        tire_temps: [tire(), tire(), tire(), tire()],
        oil_pressure: Some(round1(4.8 + (t / 10_000.0).sin() * 0.5) as f32),
        water_temp: Some(round1(92.0 + (t / 15_000.0).sin() * 4.0) as f32),
        oil_temp: Some(round1(105.0 + (t / 20_000.0).sin() * 8.0) as f32),
    };

    sanitize(raw, now, TelemetrySource::Synthetic).snapshot
}
