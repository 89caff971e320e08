use uuid::Uuid;

/**
 * How long (milliseconds) to wait before retrying a scan that the adapter refused to start.
 */
pub const SCAN_RETRY_DELAY: u64 = 1000;

/**
 * The UUID of the Bluetooth BLE service for CometBlue thermostats
 */
pub const COMETBLUE_SERVICE: &str = "47e9ee00-47e9-11e4-8939-164230d1df67";

/**
 * The UUID of the characteristic holding the 7 byte temperatures record.
 */
pub const COMETBLUE_TEMPERATURES_CHARACTERISTIC: &str = "47e9ee2b-47e9-11e4-8939-164230d1df67";

/**
 * The UUID of the characteristic that accepts the PIN. It must be written before any other
 * characteristic can be read.
 */
pub const COMETBLUE_PIN_CHARACTERISTIC: &str = "47e9ee30-47e9-11e4-8939-164230d1df67";

pub const DEFAULT_NAME: &str = "Thermostat";
pub const DEFAULT_PIN: &str = "000000";
pub const MANUFACTURER: &str = "CometBlue";
pub const MODEL: &str = "Thermostat";

/**
 * Default allowed range (°C) for the target temperature.
 */
pub const MIN_TEMP: f32 = 7.0;
pub const MAX_TEMP: f32 = 25.0;

/**
 * Temperatures are transferred in half degrees.
 */
pub const TEMP_STEP: f32 = 0.5;

/**
 * Byte 0 of a written temperatures record. Tells the device not to touch the current temperature.
 */
pub const CURRENT_TEMP_UNCHANGED: i8 = -127;

pub const RECORD_LEN: usize = 7;

pub fn make_cometblue_service_uuid() -> Uuid {
    Uuid::parse_str(COMETBLUE_SERVICE).expect("Invalid COMETBLUE_SERVICE")
}

pub fn make_cometblue_temperatures_uuid() -> Uuid {
    Uuid::parse_str(COMETBLUE_TEMPERATURES_CHARACTERISTIC).expect("Invalid COMETBLUE_TEMPERATURES_CHARACTERISTIC")
}

pub fn make_cometblue_pin_uuid() -> Uuid {
    Uuid::parse_str(COMETBLUE_PIN_CHARACTERISTIC).expect("Invalid COMETBLUE_PIN_CHARACTERISTIC")
}
