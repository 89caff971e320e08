//! The primitives a thermostat session needs from a BLE central stack.
//!
//! [`crate::device::btle`] implements these on top of btleplug. The session only talks to these
//! traits so that it can be driven by a scripted central in tests.

use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;
use btleplug::api::BDAddr;
use futures::stream::BoxStream;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentralEvent {
    /// A peripheral advertising the scanned service was seen (or seen again).
    Discovered(BDAddr),
    Disconnected(BDAddr),
}

/// A central is shared by every session of a host. Sessions each call `start_scan` once and
/// `stop_scan` once per scan they need; the radio keeps scanning until the last of them stops.
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// A new stream of events for every call.
    async fn events(&self) -> Result<BoxStream<'static, CentralEvent>, DeviceError>;

    async fn start_scan(&self, service: Uuid) -> Result<(), DeviceError>;

    /// Must succeed when no scan is active.
    async fn stop_scan(&self) -> Result<(), DeviceError>;

    async fn connect(&self, address: BDAddr) -> Result<Box<dyn BlePeripheral>, DeviceError>;
}

/// Counts outstanding scan requests, so that the radio is started by the first request and stopped
/// by the last one.
#[derive(Default)]
pub struct ScanRequests {
    // held while the radio is started or stopped
    active: Mutex<usize>,
}

impl ScanRequests {
    /// Register a request, running `start` if it is the first one. A failed start registers
    /// nothing.
    pub async fn start<F>(&self, start: F) -> Result<(), DeviceError>
        where F: Future<Output = Result<(), DeviceError>>
    {
        let mut active = self.active.lock().await;
        if *active == 0 {
            start.await?;
        }
        *active += 1;
        Ok(())
    }

    /// Drop a request, running `stop` if it was the last one. Without requests this does nothing.
    pub async fn stop<F>(&self, stop: F) -> Result<(), DeviceError>
        where F: Future<Output = Result<(), DeviceError>>
    {
        let mut active = self.active.lock().await;
        match *active {
            0 => Ok(()),
            1 => {
                *active = 0;
                stop.await
            },
            _ => {
                *active -= 1;
                Ok(())
            },
        }
    }

    pub async fn active(&self) -> usize {
        *self.active.lock().await
    }
}

#[async_trait]
pub trait BlePeripheral: Send + Sync {
    async fn discover_service(&self, service: Uuid) -> Result<Box<dyn BleService>, DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;
}

#[async_trait]
pub trait BleService: Send + Sync {
    /// Discover the characteristics of this service, limited to the given UUIDs. Implementations
    /// may return more than was asked for.
    async fn discover_channels(&self, uuids: &[Uuid]) -> Result<Vec<Arc<dyn GattChannel>>, DeviceError>;
}

#[async_trait]
pub trait GattChannel: Send + Sync {
    fn uuid(&self) -> Uuid;

    async fn read(&self) -> Result<Vec<u8>, DeviceError>;

    async fn write(&self, data: &[u8]) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn count(counter: &AtomicU32) -> Result<(), DeviceError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[tokio::test]
    async fn radio_follows_first_and_last_request() {
        let requests = ScanRequests::default();
        let starts = AtomicU32::new(0);
        let stops = AtomicU32::new(0);

        requests.start(count(&starts)).await.unwrap();
        requests.start(count(&starts)).await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(requests.active().await, 2);

        requests.stop(count(&stops)).await.unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        requests.stop(count(&stops)).await.unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        // stopping without a request never reaches the radio
        requests.stop(count(&stops)).await.unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(requests.active().await, 0);
    }

    #[tokio::test]
    async fn failed_start_is_not_counted() {
        let requests = ScanRequests::default();

        let result = requests.start(async { Err(DeviceError::NoAdapters) }).await;

        assert!(matches!(result, Err(DeviceError::NoAdapters)));
        assert_eq!(requests.active().await, 0);
    }
}
