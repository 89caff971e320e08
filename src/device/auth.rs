use log::info;

use crate::device::central::BleService;
use crate::device::constants::make_cometblue_pin_uuid;
use crate::device::types::Pin;
use crate::error::SessionError;

pub fn pin_payload(pin: Pin) -> [u8; 4] {
    pin.value().to_le_bytes()
}

/// Write the pin to the pin characteristic of `service`, once. The device refuses reads of the
/// temperatures characteristic until this has been done on the current connection.
pub async fn authenticate(service: &dyn BleService, pin: Pin) -> Result<(), SessionError> {
    let pin_uuid = make_cometblue_pin_uuid();

    let channels = service.discover_channels(&[pin_uuid]).await.map_err(|err| {
        SessionError::AuthenticationFailure { reason: format!("pin characteristic discovery failed: {}", err) }
    })?;

    let pin_channel = channels
        .into_iter()
        .find(|channel| channel.uuid() == pin_uuid)
        .ok_or_else(|| SessionError::AuthenticationFailure {
            reason: String::from("pin characteristic not found"),
        })?;

    pin_channel
        .write(&pin_payload(pin))
        .await
        .map_err(|err| SessionError::AuthenticationFailure { reason: err.to_string() })?;

    info!("Pin accepted");
    Ok(())
}
