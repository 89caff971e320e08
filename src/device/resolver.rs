use std::sync::Arc;
use log::info;

use crate::device::central::{BleService, GattChannel};
use crate::device::constants::make_cometblue_temperatures_uuid;
use crate::error::SessionError;

pub async fn resolve(service: &dyn BleService) -> Result<Arc<dyn GattChannel>, SessionError> {
    let temperatures_uuid = make_cometblue_temperatures_uuid();

    let channels = service
        .discover_channels(&[temperatures_uuid])
        .await
        .map_err(|err| SessionError::ChannelResolutionFailure { reason: err.to_string() })?;

    match channels.into_iter().find(|channel| channel.uuid() == temperatures_uuid) {
        Some(channel) => {
            info!("Found temperatures characteristic {}", temperatures_uuid);
            Ok(channel)
        },
        None => Err(SessionError::ChannelResolutionFailure {
            reason: String::from("not advertised by the service"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::FakeDevice;

    #[tokio::test]
    async fn finds_temperatures_characteristic() {
        let device = FakeDevice::new();
        let service = device.service();

        let channel = resolve(&service).await.unwrap();

        assert_eq!(channel.uuid(), make_cometblue_temperatures_uuid());
    }

    #[tokio::test]
    async fn skips_other_characteristics() {
        let device = FakeDevice::new();
        device.discover_everything();
        let service = device.service();

        let channel = resolve(&service).await.unwrap();

        assert_eq!(channel.uuid(), make_cometblue_temperatures_uuid());
    }

    #[tokio::test]
    async fn reports_missing_characteristic() {
        let device = FakeDevice::new();
        device.hide_temperatures_channel();
        let service = device.service();

        let result = resolve(&service).await;

        assert!(matches!(result, Err(SessionError::ChannelResolutionFailure { .. })));
    }
}
