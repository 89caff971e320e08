use std::sync::Arc;
use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent as BtleEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{select_all, BoxStream, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::central::{BleCentral, BlePeripheral, BleService, CentralEvent, GattChannel, ScanRequests};
use crate::error::DeviceError;

/// The BLE central of this machine, using every available adapter.
pub struct BtleCentral {
    adapters: Vec<Adapter>,
    scans: ScanRequests,
}

impl BtleCentral {
    pub async fn new() -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;

        if adapters.is_empty() {
            return Err(DeviceError::NoAdapters);
        }

        for adapter in &adapters {
            info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        }

        Ok(BtleCentral { adapters, scans: ScanRequests::default() })
    }

    async fn find_peripheral(&self, address: BDAddr) -> Result<Peripheral, DeviceError> {
        for adapter in &self.adapters {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            if let Some(peripheral) = peripherals.into_iter().find(|peripheral| peripheral.address() == address) {
                return Ok(peripheral);
            }
        }

        Err(DeviceError::UnknownPeripheral { address })
    }

    async fn start_radio_scan(&self, service: Uuid) -> Result<(), DeviceError> {
        let filter = ScanFilter {
            services: vec![service],
        };

        for adapter in &self.adapters {
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            adapter.start_scan(filter.clone()).await?;
        }

        Ok(())
    }

    async fn stop_radio_scan(&self) -> Result<(), DeviceError> {
        info!("No session is scanning anymore, stopping scan");
        for adapter in &self.adapters {
            adapter.stop_scan().await?;
        }

        Ok(())
    }
}

async fn event_address(adapter: &Adapter, id: &PeripheralId) -> Option<BDAddr> {
    match adapter.peripheral(id).await {
        Ok(peripheral) => Some(peripheral.address()),
        Err(err) => {
            debug!("Could not look up peripheral {:?}: {}", id, err);
            None
        },
    }
}

#[async_trait]
impl BleCentral for BtleCentral {
    async fn events(&self) -> Result<BoxStream<'static, CentralEvent>, DeviceError> {
        let mut streams = Vec::with_capacity(self.adapters.len());

        for adapter in &self.adapters {
            let events = adapter.events().await?;
            let adapter = adapter.clone();
            let events = events.filter_map(move |event| {
                let adapter = adapter.clone();

                async move {
                    match event {
                        // a peripheral that was seen before only reports updates when it shows up again
                        BtleEvent::DeviceDiscovered(id) | BtleEvent::DeviceUpdated(id) => {
                            event_address(&adapter, &id).await.map(CentralEvent::Discovered)
                        },
                        BtleEvent::DeviceDisconnected(id) => {
                            event_address(&adapter, &id).await.map(CentralEvent::Disconnected)
                        },
                        _ => None,
                    }
                }
            });

            streams.push(events.boxed());
        }

        Ok(select_all(streams).boxed())
    }

    async fn start_scan(&self, service: Uuid) -> Result<(), DeviceError> {
        // sessions share the adapters; only the first request starts the radio
        self.scans.start(self.start_radio_scan(service)).await
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        self.scans.stop(self.stop_radio_scan()).await
    }

    async fn connect(&self, address: BDAddr) -> Result<Box<dyn BlePeripheral>, DeviceError> {
        let peripheral = self.find_peripheral(address).await?;

        info!("Connecting to peripheral {}...", address);
        peripheral.connect().await?;

        Ok(Box::new(BtlePeripheral { peripheral }))
    }
}

struct BtlePeripheral {
    peripheral: Peripheral,
}

#[async_trait]
impl BlePeripheral for BtlePeripheral {
    async fn discover_service(&self, service: Uuid) -> Result<Box<dyn BleService>, DeviceError> {
        self.peripheral.discover_services().await?;

        let service = self.peripheral
            .services()
            .into_iter()
            .find(|candidate| candidate.uuid == service)
            .ok_or(DeviceError::MissingService)?;

        Ok(Box::new(BtleService { peripheral: self.peripheral.clone(), service }))
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

struct BtleService {
    peripheral: Peripheral,
    service: Service,
}

#[async_trait]
impl BleService for BtleService {
    async fn discover_channels(&self, uuids: &[Uuid]) -> Result<Vec<Arc<dyn GattChannel>>, DeviceError> {
        // btleplug discovers characteristics together with their service
        let channels = self.service.characteristics
            .iter()
            .filter(|characteristic| uuids.contains(&characteristic.uuid))
            .map(|characteristic| {
                Arc::new(BtleChannel {
                    peripheral: self.peripheral.clone(),
                    characteristic: characteristic.clone(),
                }) as Arc<dyn GattChannel>
            })
            .collect();

        Ok(channels)
    }
}

struct BtleChannel {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

#[async_trait]
impl GattChannel for BtleChannel {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }

    async fn read(&self) -> Result<Vec<u8>, DeviceError> {
        Ok(self.peripheral.read(&self.characteristic).await?)
    }

    async fn write(&self, data: &[u8]) -> Result<(), DeviceError> {
        self.peripheral.write(&self.characteristic, data, WriteType::WithResponse).await?;
        Ok(())
    }
}
