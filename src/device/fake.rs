//! A scripted BLE stack holding a single CometBlue thermostat, used by the tests.

use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use btleplug::api::BDAddr;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::device::central::{BleCentral, BlePeripheral, BleService, CentralEvent, GattChannel, ScanRequests};
use crate::device::constants::{make_cometblue_pin_uuid, make_cometblue_service_uuid, make_cometblue_temperatures_uuid};
use crate::error::DeviceError;

pub fn device_address() -> BDAddr {
    BDAddr::from([0xE0, 0xE5, 0xCF, 0x01, 0x02, 0x03])
}

pub fn other_address() -> BDAddr {
    BDAddr::from([0xE0, 0xE5, 0xCF, 0x0A, 0x0B, 0x0C])
}

// current 20.0, target 18.0, economy 15.0, comfort 23.0, offset -2.0, window 5 / 10
pub const EXAMPLE_RECORD: [u8; 7] = [40, 36, 30, 46, (-4_i8) as u8, 5, 10];

#[derive(Debug, Default)]
struct FakeDeviceState {
    record: Vec<u8>,
    hold_reads: bool,
    hold_writes: bool,
    fail_reads: bool,
    fail_writes: bool,
    reject_pin: bool,
    hide_pin_channel: bool,
    hide_temperatures_channel: bool,
    discover_everything: bool,
    fail_service_discovery: bool,
    readvertise: bool,
    connect_failures: u32,
    scanning: bool,
    scan_starts: u32,
    scan_stops: u32,
    connect_attempts: Vec<BDAddr>,
    disconnects: u32,
    pin_writes: Vec<Vec<u8>>,
    data_reads: u32,
    data_writes: Vec<Vec<u8>>,
}

#[derive(Default)]
struct FakeEvents {
    subscribers: Vec<UnboundedSender<CentralEvent>>,
    // emitted while nobody listened, handed to the next subscriber
    backlog: Vec<CentralEvent>,
}

#[derive(Clone)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeDeviceState>>,
    read_gate: Arc<Semaphore>,
    write_gate: Arc<Semaphore>,
    events: Arc<Mutex<FakeEvents>>,
    scans: Arc<ScanRequests>,
}

impl FakeDevice {
    pub fn new() -> Self {
        let state = FakeDeviceState {
            record: EXAMPLE_RECORD.to_vec(),
            ..Default::default()
        };

        FakeDevice {
            state: Arc::new(Mutex::new(state)),
            read_gate: Arc::new(Semaphore::new(0)),
            write_gate: Arc::new(Semaphore::new(0)),
            events: Arc::new(Mutex::new(FakeEvents::default())),
            scans: Arc::new(ScanRequests::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeDeviceState> {
        self.state.lock().expect("Failed to lock FakeDevice state")
    }

    pub fn central(&self) -> Arc<FakeCentral> {
        Arc::new(FakeCentral { device: self.clone() })
    }

    pub fn service(&self) -> FakeService {
        FakeService { device: self.clone() }
    }

    pub fn temperatures_channel(&self) -> Arc<dyn GattChannel> {
        Arc::new(FakeChannel { device: self.clone(), uuid: make_cometblue_temperatures_uuid() })
    }

    /// Send `event` to every session listening to this device's central.
    pub fn emit(&self, event: CentralEvent) {
        let mut events = self.events.lock().expect("Failed to lock fake events");
        events.subscribers.retain(|subscriber| !subscriber.is_closed());

        if events.subscribers.is_empty() {
            events.backlog.push(event);
            return;
        }

        for subscriber in &events.subscribers {
            // the session may be gone by now
            let _ = subscriber.unbounded_send(event);
        }
    }

    pub fn set_record(&self, record: &[u8]) { self.lock().record = record.to_vec(); }
    pub fn hold_reads(&self) { self.lock().hold_reads = true; }
    pub fn release_reads(&self, count: usize) { self.read_gate.add_permits(count); }
    pub fn hold_writes(&self) { self.lock().hold_writes = true; }
    pub fn fail_reads(&self) { self.lock().fail_reads = true; }
    pub fn fail_writes(&self) { self.lock().fail_writes = true; }
    pub fn reject_pin(&self) { self.lock().reject_pin = true; }
    pub fn hide_pin_channel(&self) { self.lock().hide_pin_channel = true; }
    pub fn hide_temperatures_channel(&self) { self.lock().hide_temperatures_channel = true; }
    pub fn discover_everything(&self) { self.lock().discover_everything = true; }
    pub fn fail_service_discovery(&self) { self.lock().fail_service_discovery = true; }
    pub fn fail_connects(&self, count: u32) { self.lock().connect_failures = count; }
    pub fn readvertise_on_disconnect(&self) { self.lock().readvertise = true; }

    pub fn is_scanning(&self) -> bool { self.lock().scanning }
    pub fn scan_starts(&self) -> u32 { self.lock().scan_starts }
    pub fn scan_stops(&self) -> u32 { self.lock().scan_stops }
    pub fn connect_attempts(&self) -> Vec<BDAddr> { self.lock().connect_attempts.clone() }
    pub fn disconnects(&self) -> u32 { self.lock().disconnects }
    pub fn pin_writes(&self) -> Vec<Vec<u8>> { self.lock().pin_writes.clone() }
    pub fn data_reads(&self) -> u32 { self.lock().data_reads }
    pub fn data_writes(&self) -> Vec<Vec<u8>> { self.lock().data_writes.clone() }
}

pub struct FakeCentral {
    device: FakeDevice,
}

#[async_trait]
impl BleCentral for FakeCentral {
    async fn events(&self) -> Result<BoxStream<'static, CentralEvent>, DeviceError> {
        let (sender, receiver) = unbounded();
        let mut events = self.device.events.lock().expect("Failed to lock fake events");

        for event in events.backlog.drain(..) {
            let _ = sender.unbounded_send(event);
        }
        events.subscribers.push(sender);

        Ok(receiver.boxed())
    }

    async fn start_scan(&self, service: Uuid) -> Result<(), DeviceError> {
        assert_eq!(service, make_cometblue_service_uuid());
        let device = &self.device;

        device.scans.start(async {
            let mut state = device.lock();
            state.scanning = true;
            state.scan_starts += 1;
            Ok(())
        }).await
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        let device = &self.device;

        device.scans.stop(async {
            let mut state = device.lock();
            state.scanning = false;
            state.scan_stops += 1;
            Ok(())
        }).await
    }

    async fn connect(&self, address: BDAddr) -> Result<Box<dyn BlePeripheral>, DeviceError> {
        let mut state = self.device.lock();
        state.connect_attempts.push(address);

        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(DeviceError::Btle { source: btleplug::Error::DeviceNotFound });
        }

        Ok(Box::new(FakePeripheral { device: self.device.clone(), address }))
    }
}

struct FakePeripheral {
    device: FakeDevice,
    address: BDAddr,
}

#[async_trait]
impl BlePeripheral for FakePeripheral {
    async fn discover_service(&self, service: Uuid) -> Result<Box<dyn BleService>, DeviceError> {
        if self.device.lock().fail_service_discovery || service != make_cometblue_service_uuid() {
            return Err(DeviceError::MissingService);
        }

        Ok(Box::new(self.device.service()))
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let readvertise = {
            let mut state = self.device.lock();
            state.disconnects += 1;
            state.readvertise
        };

        self.device.emit(CentralEvent::Disconnected(self.address));
        if readvertise {
            self.device.emit(CentralEvent::Discovered(self.address));
        }
        Ok(())
    }
}

pub struct FakeService {
    device: FakeDevice,
}

#[async_trait]
impl BleService for FakeService {
    async fn discover_channels(&self, uuids: &[Uuid]) -> Result<Vec<Arc<dyn GattChannel>>, DeviceError> {
        let pin_uuid = make_cometblue_pin_uuid();
        let temperatures_uuid = make_cometblue_temperatures_uuid();
        let state = self.device.lock();

        let mut available = vec![Uuid::from_u128(0x47e9ee01_47e9_11e4_8939_164230d1df67)];
        if !state.hide_pin_channel {
            available.push(pin_uuid);
        }
        if !state.hide_temperatures_channel {
            available.push(temperatures_uuid);
        }

        let channels = available
            .into_iter()
            .filter(|uuid| state.discover_everything || uuids.contains(uuid))
            .map(|uuid| Arc::new(FakeChannel { device: self.device.clone(), uuid }) as Arc<dyn GattChannel>)
            .collect();

        Ok(channels)
    }
}

struct FakeChannel {
    device: FakeDevice,
    uuid: Uuid,
}

#[async_trait]
impl GattChannel for FakeChannel {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn read(&self) -> Result<Vec<u8>, DeviceError> {
        if self.uuid != make_cometblue_temperatures_uuid() {
            return Err(DeviceError::Btle { source: btleplug::Error::NotSupported(String::from("read")) });
        }

        let hold = {
            let mut state = self.device.lock();
            state.data_reads += 1;
            state.hold_reads
        };

        if hold {
            self.device.read_gate.acquire().await.expect("read gate closed").forget();
        }

        let state = self.device.lock();
        if state.fail_reads {
            return Err(DeviceError::Btle { source: btleplug::Error::NotConnected });
        }
        Ok(state.record.clone())
    }

    async fn write(&self, data: &[u8]) -> Result<(), DeviceError> {
        if self.uuid == make_cometblue_pin_uuid() {
            let mut state = self.device.lock();
            state.pin_writes.push(data.to_vec());
            if state.reject_pin {
                return Err(DeviceError::Btle { source: btleplug::Error::PermissionDenied });
            }
            return Ok(());
        }

        let hold = {
            let mut state = self.device.lock();
            state.data_writes.push(data.to_vec());
            state.hold_writes
        };

        if hold {
            self.device.write_gate.acquire().await.expect("write gate closed").forget();
        }

        if self.device.lock().fail_writes {
            return Err(DeviceError::Btle { source: btleplug::Error::NotConnected });
        }
        Ok(())
    }
}
