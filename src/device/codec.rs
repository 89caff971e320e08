//! The 7 byte temperatures record of the CometBlue temperatures characteristic.
//!
//! All bytes are signed. Temperatures are stored in half degrees:
//!
//! | byte | read                   | write                    |
//! |------|------------------------|--------------------------|
//! | 0    | current * 2            | `CURRENT_TEMP_UNCHANGED` |
//! | 1    | target * 2             | target * 2               |
//! | 2    | economy * 2            | economy * 2              |
//! | 3    | comfort * 2            | comfort * 2              |
//! | 4    | offset * 2             | offset * 2               |
//! | 5    | window open sensitivity| window open sensitivity  |
//! | 6    | window open duration   | window open duration     |
//!
//! The codec does not clamp; the caller is responsible for keeping the target in range.

use crate::device::constants::{CURRENT_TEMP_UNCHANGED, RECORD_LEN};
use crate::device::types::ThermostatState;
use crate::error::SessionError;

fn half_degrees_to_celsius(byte: u8) -> f32 {
    f32::from(byte as i8) / 2.0
}

fn celsius_to_half_degrees(value: f32) -> u8 {
    // `as` truncates the fraction (and saturates outside of the i8 range)
    (value * 2.0) as i8 as u8
}

pub fn decode(bytes: &[u8; RECORD_LEN]) -> ThermostatState {
    ThermostatState {
        current: half_degrees_to_celsius(bytes[0]),
        target: half_degrees_to_celsius(bytes[1]),
        economy: half_degrees_to_celsius(bytes[2]),
        comfort: half_degrees_to_celsius(bytes[3]),
        offset: half_degrees_to_celsius(bytes[4]),
        window_open_sensitivity: bytes[5] as i8,
        window_open_duration: bytes[6] as i8,
    }
}

pub fn encode(state: &ThermostatState) -> [u8; RECORD_LEN] {
    [
        CURRENT_TEMP_UNCHANGED as u8,
        celsius_to_half_degrees(state.target),
        celsius_to_half_degrees(state.economy),
        celsius_to_half_degrees(state.comfort),
        celsius_to_half_degrees(state.offset),
        state.window_open_sensitivity as u8,
        state.window_open_duration as u8,
    ]
}

/// Decode a payload as returned by a characteristic read.
pub fn decode_record(payload: &[u8]) -> Result<ThermostatState, SessionError> {
    let bytes: &[u8; RECORD_LEN] = payload.try_into().map_err(|_| SessionError::InvalidRecord {
        expected: RECORD_LEN,
        actual: payload.len(),
    })?;

    Ok(decode(bytes))
}
