//! Gran Turismo 7 telemetry packet decoder.
//!
//! GT7 datagrams are 296-byte little-endian structs. The packets handed to
//! this decoder are already plaintext (a relay on the console side forwards
//! the decrypted payload), so decoding is a pure read of fixed offsets
//! followed by per-field sanitization.
//!
//! # Offset table
//!
//! | field            | offset | type |
//! |------------------|--------|------|
//! | engine RPM       | 0x3C   | f32  |
//! | fuel level       | 0x44   | f32  |
//! | fuel capacity    | 0x48   | f32  |
//! | speed (m/s)      | 0x4C   | f32  |
//! | oil pressure     | 0x54   | f32  |
//! | water temp       | 0x58   | f32  |
//! | oil temp         | 0x5C   | f32  |
//! | tire temp FL..RR | 0x60, 0x64, 0x68, 0x6C | f32 |
//! | race position    | 0x74   | u16  |
//! | total cars       | 0x76   | u8   |
//! | current lap      | 0x78   | u16  |
//! | total laps       | 0x7A   | u16  |
//! | last lap (ms)    | 0x7C   | i32  |
//! | best lap (ms)    | 0x80   | i32  |
//!
//! Packets longer than 296 bytes are accepted; trailing bytes are ignored.

use chrono::{DateTime, Utc};
use gt7_telemetry_contracts::{RawTelemetry, Sanitized, TelemetrySnapshot, TelemetrySource, sanitize};
use gt7_telemetry_core::{GT7_PACKET_SIZE, TelemetryError};

/// Size of a GT7 telemetry packet (0x128).
pub const PACKET_SIZE: usize = GT7_PACKET_SIZE;

/// Raw speed is meters per second.
const MS_TO_KPH: f32 = 3.6;

const OFF_ENGINE_RPM: usize = 0x3C; // 60, f32
const OFF_FUEL_LEVEL: usize = 0x44; // 68, f32
const OFF_FUEL_CAPACITY: usize = 0x48; // 72, f32
const OFF_SPEED_MS: usize = 0x4C; // 76, f32
const OFF_OIL_PRESSURE: usize = 0x54; // 84, f32
const OFF_WATER_TEMP: usize = 0x58; // 88, f32
const OFF_OIL_TEMP: usize = 0x5C; // 92, f32
const OFF_TIRE_TEMP_FL: usize = 0x60; // 96, f32
const OFF_TIRE_TEMP_FR: usize = 0x64; // 100, f32
const OFF_TIRE_TEMP_RL: usize = 0x68; // 104, f32
const OFF_TIRE_TEMP_RR: usize = 0x6C; // 108, f32
const OFF_POSITION: usize = 0x74; // 116, u16
const OFF_TOTAL_CARS: usize = 0x76; // 118, u8
const OFF_CURRENT_LAP: usize = 0x78; // 120, u16
const OFF_TOTAL_LAPS: usize = 0x7A; // 122, u16
const OFF_LAST_LAP_MS: usize = 0x7C; // 124, i32
const OFF_BEST_LAP_MS: usize = 0x80; // 128, i32

/// Decode a GT7 packet into a live snapshot captured at `captured_at`.
///
/// # Errors
///
/// Returns [`TelemetryError::UndersizedPacket`] when `data` is shorter than
/// [`PACKET_SIZE`]. No other input is rejected.
pub fn decode_packet(
    data: &[u8],
    captured_at: DateTime<Utc>,
) -> Result<TelemetrySnapshot, TelemetryError> {
    decode_with_report(data, captured_at).map(|decoded| decoded.snapshot)
}

/// Like [`decode_packet`], but also returns every field adjustment made.
///
/// # Errors
///
/// Returns [`TelemetryError::UndersizedPacket`] when `data` is shorter than
/// [`PACKET_SIZE`].
pub fn decode_with_report(
    data: &[u8],
    captured_at: DateTime<Utc>,
) -> Result<Sanitized, TelemetryError> {
    let raw = read_raw(data)?;
    Ok(sanitize(raw, captured_at, TelemetrySource::Live))
}

/// Read every field at its wire offset without sanitizing it.
///
/// # Errors
///
/// Returns [`TelemetryError::UndersizedPacket`] when `data` is shorter than
/// [`PACKET_SIZE`].
pub fn read_raw(data: &[u8]) -> Result<RawTelemetry, TelemetryError> {
    if data.len() < PACKET_SIZE {
        return Err(TelemetryError::UndersizedPacket {
            expected: PACKET_SIZE,
            actual: data.len(),
        });
    }

    Ok(RawTelemetry {
        position: read_u16_le(data, OFF_POSITION).map(i64::from),
        total_cars: data.get(OFF_TOTAL_CARS).copied().map(i64::from),
        current_lap: read_u16_le(data, OFF_CURRENT_LAP).map(i64::from),
        total_laps: read_u16_le(data, OFF_TOTAL_LAPS).map(i64::from),
        speed_kph: read_f32_le(data, OFF_SPEED_MS).map(|ms| ms * MS_TO_KPH),
        engine_rpm: read_f32_le(data, OFF_ENGINE_RPM),
        fuel_capacity: read_f32_le(data, OFF_FUEL_CAPACITY),
        fuel_level: read_f32_le(data, OFF_FUEL_LEVEL),
        last_lap_time_ms: read_i32_le(data, OFF_LAST_LAP_MS).map(i64::from),
        best_lap_time_ms: read_i32_le(data, OFF_BEST_LAP_MS).map(i64::from),
        tire_temps: [
            read_f32_le(data, OFF_TIRE_TEMP_FL),
            read_f32_le(data, OFF_TIRE_TEMP_FR),
            read_f32_le(data, OFF_TIRE_TEMP_RL),
            read_f32_le(data, OFF_TIRE_TEMP_RR),
        ],
        oil_pressure: read_f32_le(data, OFF_OIL_PRESSURE),
        water_temp: read_f32_le(data, OFF_WATER_TEMP),
        oil_temp: read_f32_le(data, OFF_OIL_TEMP),
    })
}

// ---------------------------------------------------------------------------
// Low-level read helpers
// ---------------------------------------------------------------------------

fn read_f32_le(data: &[u8], offset: usize) -> Option<f32> {
    data.get(offset..offset.checked_add(4)?)
        .and_then(|b| b.try_into().ok())
        .map(f32::from_le_bytes)
}

fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset.checked_add(2)?)
        .and_then(|b| b.try_into().ok())
        .map(u16::from_le_bytes)
}

fn read_i32_le(data: &[u8], offset: usize) -> Option<i32> {
    data.get(offset..offset.checked_add(4)?)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn put_f32(buf: &mut [u8], offset: usize, value: f32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn race_packet() -> Vec<u8> {
        let mut buf = vec![0u8; PACKET_SIZE];
        put_f32(&mut buf, OFF_ENGINE_RPM, 6_250.0);
        put_f32(&mut buf, OFF_FUEL_LEVEL, 45.0);
        put_f32(&mut buf, OFF_FUEL_CAPACITY, 90.0);
        put_f32(&mut buf, OFF_SPEED_MS, 50.0);
        put_f32(&mut buf, OFF_OIL_PRESSURE, 5.2);
        put_f32(&mut buf, OFF_WATER_TEMP, 88.0);
        put_f32(&mut buf, OFF_OIL_TEMP, 104.0);
        put_f32(&mut buf, OFF_TIRE_TEMP_FL, 82.0);
        put_f32(&mut buf, OFF_TIRE_TEMP_FR, 84.0);
        put_f32(&mut buf, OFF_TIRE_TEMP_RL, 79.0);
        put_f32(&mut buf, OFF_TIRE_TEMP_RR, 81.0);
        put_u16(&mut buf, OFF_POSITION, 4);
        buf[OFF_TOTAL_CARS] = 16;
        put_u16(&mut buf, OFF_CURRENT_LAP, 7);
        put_u16(&mut buf, OFF_TOTAL_LAPS, 15);
        put_i32(&mut buf, OFF_LAST_LAP_MS, 95_400);
        put_i32(&mut buf, OFF_BEST_LAP_MS, 94_100);
        buf
    }

    #[test]
    fn test_decode_race_packet() -> TestResult {
        let snapshot = decode_packet(&race_packet(), Utc::now())?;

        assert!((snapshot.engine_rpm - 6_250.0).abs() < 0.01);
        assert!((snapshot.speed_kph - 180.0).abs() < 0.01);
        assert!((snapshot.fuel_percent - 50.0).abs() < 0.01);
        assert!((snapshot.oil_pressure - 5.2).abs() < 0.01);
        assert!((snapshot.water_temp - 88.0).abs() < 0.01);
        assert!((snapshot.oil_temp - 104.0).abs() < 0.01);
        assert!((snapshot.tire_temps.fr - 84.0).abs() < 0.01);
        assert_eq!(snapshot.position, 4);
        assert_eq!(snapshot.total_cars, 16);
        assert_eq!(snapshot.current_lap, 7);
        assert_eq!(snapshot.total_laps, 15);
        assert_eq!(snapshot.last_lap_time_ms, 95_400);
        assert_eq!(snapshot.best_lap_time_ms, 94_100);
        assert_eq!(snapshot.delta_ms, 1_300);
        assert_eq!(snapshot.source, TelemetrySource::Live);
        Ok(())
    }

    #[test]
    fn test_zero_packet_decodes_to_defaults() -> TestResult {
        let buf = [0u8; PACKET_SIZE];
        let decoded = decode_with_report(&buf, Utc::now())?;
        let snapshot = &decoded.snapshot;

        assert!((snapshot.fuel_percent - 100.0).abs() < f32::EPSILON);
        assert_eq!(snapshot.last_lap_time_ms, 0);
        assert_eq!(snapshot.delta_ms, 0);
        assert!(snapshot.speed_kph.abs() < f32::EPSILON);
        assert_eq!(snapshot.position, 1);
        assert_eq!(snapshot.total_cars, 20);
        assert!((snapshot.water_temp - 90.0).abs() < f32::EPSILON);
        assert!(decoded.was_adjusted("tire_temp_fl"));
        assert!(decoded.was_adjusted("fuel_capacity"));
        Ok(())
    }

    #[test]
    fn test_negative_speed_uses_magnitude() -> TestResult {
        let mut buf = race_packet();
        put_f32(&mut buf, OFF_SPEED_MS, -50.0);
        let snapshot = decode_packet(&buf, Utc::now())?;
        assert!((snapshot.speed_kph - 180.0).abs() < 0.01);
        Ok(())
    }

    #[test]
    fn test_short_lap_time_is_unset() -> TestResult {
        let mut buf = race_packet();
        put_i32(&mut buf, OFF_LAST_LAP_MS, 500);
        let snapshot = decode_packet(&buf, Utc::now())?;
        assert_eq!(snapshot.last_lap_time_ms, 0);
        assert_eq!(snapshot.delta_ms, 0);
        assert_eq!(snapshot.lap_delta(), None);
        Ok(())
    }

    #[test]
    fn test_undersized_packet_rejected() -> TestResult {
        let buf = [0u8; PACKET_SIZE - 1];
        match decode_packet(&buf, Utc::now()) {
            Err(TelemetryError::UndersizedPacket { expected, actual }) => {
                assert_eq!(expected, PACKET_SIZE);
                assert_eq!(actual, PACKET_SIZE - 1);
            }
            other => return Err(format!("expected UndersizedPacket, got {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn test_oversized_packet_accepted() -> TestResult {
        let mut buf = race_packet();
        buf.extend_from_slice(&[0xFF; 48]);
        let snapshot = decode_packet(&buf, Utc::now())?;
        assert_eq!(snapshot.current_lap, 7);
        Ok(())
    }

    #[test]
    fn test_nan_fields_are_replaced() -> TestResult {
        let mut buf = race_packet();
        put_f32(&mut buf, OFF_ENGINE_RPM, f32::NAN);
        put_f32(&mut buf, OFF_OIL_TEMP, f32::INFINITY);
        let decoded = decode_with_report(&buf, Utc::now())?;
        assert!(decoded.snapshot.engine_rpm.abs() < f32::EPSILON);
        assert!((decoded.snapshot.oil_temp - 100.0).abs() < f32::EPSILON);
        assert!(decoded.was_adjusted("engine_rpm"));
        assert!(decoded.was_adjusted("oil_temp"));
        Ok(())
    }

    #[test]
    fn test_decode_is_referentially_transparent() -> TestResult {
        let buf = race_packet();
        let at = Utc::now();
        assert_eq!(decode_packet(&buf, at)?, decode_packet(&buf, at)?);
        Ok(())
    }
}
