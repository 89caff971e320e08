use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use btleplug::api::BDAddr;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Thermostat {name:?} has an invalid bluetooth address {address:?}")]
    InvalidAddress { name: String, address: String },

    #[error("Thermostat {name:?} has an invalid pin; expected up to 10 decimal digits")]
    InvalidPin { name: String },

    #[error("Thermostat {name:?} has an invalid temperature range {min_temp}..{max_temp}")]
    InvalidRange { name: String, min_temp: f32, max_temp: f32 },

    #[error("No thermostat named {name:?} is configured")]
    UnknownThermostat { name: String },

    #[error("No thermostats are configured")]
    NoThermostats,
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Thermostat {name:?}: {source}")]
    SessionError { name: String, source: SessionError },

    #[error("Thermostat {name:?} did not become ready within {wait}")]
    NotReady { name: String, wait: humantime::Duration },

    #[error("Failed to format output: {source}")]
    OutputError { #[from] source: serde_json::Error },
}

/// Errors from the raw BLE primitives.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapters available")]
    NoAdapters,

    #[error("Peripheral {address} is not known to any adapter")]
    UnknownPeripheral { address: BDAddr },

    #[error("A required bluetooth service is not available")]
    MissingService,
}

/// Errors reported by a thermostat session. These are fanned out to every waiting caller, so they
/// carry the message of the underlying [`DeviceError`] instead of the error itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Failed to connect: {reason}")]
    ConnectFailure { reason: String },

    #[error("Failed to discover the thermostat service: {reason}")]
    ServiceDiscoveryFailure { reason: String },

    #[error("Failed to authenticate with pin: {reason}")]
    AuthenticationFailure { reason: String },

    #[error("Failed to find the temperatures characteristic: {reason}")]
    ChannelResolutionFailure { reason: String },

    #[error("Temperatures characteristic not yet found")]
    ChannelNotReady,

    #[error("Read from temperatures characteristic failed: {reason}")]
    ReadFailure { reason: String },

    #[error("Write to temperatures characteristic failed: {reason}")]
    WriteFailure { reason: String },

    #[error("Device disconnected")]
    UnexpectedDisconnect,

    #[error("Expected a {expected} byte temperatures record, got {actual} bytes")]
    InvalidRecord { expected: usize, actual: usize },

    #[error("Invalid target temperature {value}")]
    InvalidTemperature { value: String },

    #[error("Device operation took too long")]
    Timeout,

    #[error("Session has stopped")]
    Stopped,
}
