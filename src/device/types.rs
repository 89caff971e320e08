use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use btleplug::api::BDAddr;
use serde::Serialize;
use thiserror::Error;

use crate::device::constants::{MANUFACTURER, MAX_TEMP, MIN_TEMP, MODEL, TEMP_STEP};
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    Authenticating,
    ResolvingChannel,
    Ready,
    Disconnected,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::ResolvingChannel => "resolving channel",
            SessionState::Ready => "ready",
            SessionState::Disconnected => "disconnected",
            SessionState::Stopped => "stopped",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChange(SessionState),
    Ready,
    Lost(SessionError),
    // a connect/authenticate/resolve attempt failed, the session will scan again
    AttemptFailed(SessionError),
    // the reconnect limit was reached, the session has stopped
    GaveUp { attempts: u32 },
}

/// Everything the thermostat reports in one temperatures record. Temperatures are in °C with a
/// resolution of half a degree, the window fields are raw device units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatState {
    pub current: f32,
    pub target: f32,
    pub comfort: f32,
    pub economy: f32,
    pub offset: f32,
    pub window_open_sensitivity: i8,
    pub window_open_duration: i8,
}

impl ThermostatState {
    pub fn with_target(self, target: f32) -> Self {
        ThermostatState { target, ..self }
    }
}

/// The numeric pin, sent to the device as a little endian u32.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Pin(u32);

impl Pin {
    pub fn value(&self) -> u32 {
        self.0
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("A pin must be a decimal number that fits in 32 bits")]
pub struct InvalidPin;

impl FromStr for Pin {
    type Err = InvalidPin;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // u32::from_str would also accept a leading '+'
        if !s.bytes().all(|c| c.is_ascii_digit()) {
            return Err(InvalidPin);
        }
        s.parse::<u32>().map(Pin).map_err(|_| InvalidPin)
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pin(***)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address: BDAddr,
    pub pin: Pin,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn for_identity(identity: &DeviceIdentity) -> Self {
        DeviceInfo {
            manufacturer: MANUFACTURER,
            model: MODEL,
            serial_number: identity.address.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureRange {
    pub min: f32,
    pub max: f32,
}

impl TemperatureRange {
    /// Clamp to the range, then round to the nearest half degree.
    pub fn constrain(&self, value: f32) -> f32 {
        let clamped = value.clamp(self.min, self.max);
        (clamped / TEMP_STEP).round() * TEMP_STEP
    }
}

impl Default for TemperatureRange {
    fn default() -> Self {
        TemperatureRange { min: MIN_TEMP, max: MAX_TEMP }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    // consecutive failed connection attempts before giving up, None retries forever
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionSettings {
    pub range: TemperatureRange,
    pub reconnect: ReconnectPolicy,
    pub operation_timeout: Option<Duration>,
}
