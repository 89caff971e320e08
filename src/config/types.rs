use std::time::Duration;
use btleplug::api::BDAddr;
use serde::{Deserialize, Serialize};

use crate::device::constants::{DEFAULT_NAME, DEFAULT_PIN, MAX_TEMP, MIN_TEMP};
use crate::device::types::{DeviceIdentity, ReconnectPolicy, SessionSettings, TemperatureRange};
use crate::error::ConfigError;

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_pin() -> String {
    DEFAULT_PIN.to_string()
}

fn default_min_temp() -> f32 {
    MIN_TEMP
}

fn default_max_temp() -> f32 {
    MAX_TEMP
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub address: String,
    // kept as a string so that leading zeros survive a round trip through the file
    #[serde(default = "default_pin")]
    pub pin: String,
    #[serde(default = "default_min_temp")]
    pub min_temp: f32,
    #[serde(default = "default_max_temp")]
    pub max_temp: f32,
}

impl ThermostatConfig {
    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        // accepts both "E0:E5:CF:01:02:03" and "E0E5CF010203"
        let address = self.address
            .parse::<BDAddr>()
            .map_err(|_| ConfigError::InvalidAddress {
                name: self.name.clone(),
                address: self.address.clone(),
            })?;

        let pin = self.pin.parse().map_err(|_| ConfigError::InvalidPin { name: self.name.clone() })?;

        Ok(DeviceIdentity { address, pin })
    }

    pub fn range(&self) -> Result<TemperatureRange, ConfigError> {
        let valid = self.min_temp.is_finite()
            && self.max_temp.is_finite()
            && self.min_temp <= self.max_temp;

        if !valid {
            return Err(ConfigError::InvalidRange {
                name: self.name.clone(),
                min_temp: self.min_temp,
                max_temp: self.max_temp,
            });
        }

        Ok(TemperatureRange { min: self.min_temp, max: self.max_temp })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub thermostats: Vec<ThermostatConfig>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
}

impl Config {
    /// Validate every configured thermostat, so that a typo in one of them is reported before any
    /// session starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for thermostat in &self.thermostats {
            self.session(thermostat)?;
        }
        Ok(())
    }

    /// The thermostat called `name`, or the first one when no name is given.
    pub fn find(&self, name: Option<&str>) -> Result<&ThermostatConfig, ConfigError> {
        match name {
            Some(name) => self.thermostats
                .iter()
                .find(|thermostat| thermostat.name == name)
                .ok_or_else(|| ConfigError::UnknownThermostat { name: name.to_string() }),
            None => self.thermostats.first().ok_or(ConfigError::NoThermostats),
        }
    }

    pub fn session(&self, thermostat: &ThermostatConfig) -> Result<(DeviceIdentity, SessionSettings), ConfigError> {
        let identity = thermostat.identity()?;
        let settings = SessionSettings {
            range: thermostat.range()?,
            reconnect: ReconnectPolicy {
                delay: Duration::from_millis(self.reconnect.delay_ms),
                max_attempts: self.reconnect.max_attempts,
            },
            operation_timeout: self.operation_timeout_ms.map(Duration::from_millis),
        };

        Ok((identity, settings))
    }
}
