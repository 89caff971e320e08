use std::sync::Arc;
use std::time::Duration;
use btleplug::api::BDAddr;
use futures::channel::mpsc::{unbounded, Sender, UnboundedReceiver, UnboundedSender};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::auth::authenticate;
use crate::device::central::{BleCentral, BlePeripheral, CentralEvent, GattChannel};
use crate::device::coalescer::ReadCoalescer;
use crate::device::codec::encode;
use crate::device::constants::{make_cometblue_service_uuid, SCAN_RETRY_DELAY};
use crate::device::resolver::resolve;
use crate::device::types::{DeviceIdentity, SessionEvent, SessionSettings, SessionState, ThermostatState};
use crate::error::SessionError;

#[derive(Debug)]
enum SessionCommand {
    // a device operation on `link` hung; drop that link and start over
    ForceDisconnect { link: u64 },
}

#[derive(Clone)]
struct SessionSnapshot {
    state: SessionState,
    // only present while `state` is Ready
    channel: Option<Arc<dyn GattChannel>>,
    // counts the times the session became ready
    link: u64,
}

/// Drives one thermostat through scan, connect, authenticate and resolve, and back to scanning
/// whenever the link is lost. Only the session task mutates this; handles observe snapshots.
struct ConnectionSession {
    central: Arc<dyn BleCentral>,
    identity: DeviceIdentity,
    settings: SessionSettings,
    state: SessionState,
    peripheral: Option<Arc<dyn BlePeripheral>>,
    channel: Option<Arc<dyn GattChannel>>,
    coalescer: Arc<ReadCoalescer>,
    snapshot: watch::Sender<SessionSnapshot>,
    senders: Vec<Sender<SessionEvent>>,
    // connection attempts since the last time the session was ready
    failed_attempts: u32,
    rescan_at: Option<Instant>,
    // whether this session holds a scan request on the shared central
    scanning: bool,
    link: u64,
}

impl ConnectionSession {
    fn address(&self) -> BDAddr {
        self.identity.address
    }

    async fn emit(&mut self, event: SessionEvent) {
        let mut closed = false;

        for sender in &mut self.senders {
            if sender.send(event.clone()).await.is_err() {
                closed = true;
            }
        }

        if closed {
            debug!("{}: dropping closed event receivers", self.address());
            self.senders.retain(|sender| !sender.is_closed());
        }
    }

    async fn transition(&mut self, next: SessionState) {
        let previous = self.state;
        if previous == next {
            return;
        }

        info!("{}: {} -> {}", self.address(), previous, next);
        self.state = next;

        if next != SessionState::Ready {
            self.channel = None;
        }

        self.snapshot.send_replace(SessionSnapshot { state: next, channel: self.channel.clone(), link: self.link });

        if previous == SessionState::Ready {
            self.coalescer.fail_all(SessionError::UnexpectedDisconnect);
        }

        self.emit(SessionEvent::StateChange(next)).await;
        if next == SessionState::Ready {
            self.emit(SessionEvent::Ready).await;
        }
    }

    async fn rescan(&mut self) {
        self.rescan_at = None;

        // a connect failure happens before the scan is stopped, that scan can be reused
        if !self.scanning {
            if let Err(err) = self.central.start_scan(make_cometblue_service_uuid()).await {
                warn!("{}: Scanning failed {}", self.address(), err);
                self.rescan_at = Some(Instant::now() + Duration::from_millis(SCAN_RETRY_DELAY));
                return;
            }
            self.scanning = true;
        }

        self.transition(SessionState::Scanning).await;
    }

    async fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        self.scanning = false;

        if let Err(err) = self.central.stop_scan().await {
            warn!("{}: Failed to stop scanning: {}", self.address(), err);
        }
    }

    async fn disconnect_peripheral(&mut self) {
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(err) = peripheral.disconnect().await {
                warn!("{}: Failed to disconnect: {}", self.address(), err);
            }
        }
    }

    async fn handshake(&mut self) -> Result<Arc<dyn GattChannel>, SessionError> {
        let peripheral: Arc<dyn BlePeripheral> = self.central
            .connect(self.address())
            .await
            .map_err(|err| SessionError::ConnectFailure { reason: err.to_string() })?
            .into();
        self.peripheral = Some(Arc::clone(&peripheral));

        info!("{}: Connection success, discovering services...", self.address());
        self.stop_scan().await;
        self.transition(SessionState::Authenticating).await;

        let service = peripheral
            .discover_service(make_cometblue_service_uuid())
            .await
            .map_err(|err| SessionError::ServiceDiscoveryFailure { reason: err.to_string() })?;

        authenticate(service.as_ref(), self.identity.pin).await?;
        self.transition(SessionState::ResolvingChannel).await;

        resolve(service.as_ref()).await
    }

    async fn connect(&mut self) {
        self.transition(SessionState::Connecting).await;

        let result = match self.settings.operation_timeout {
            Some(deadline) => match timeout(deadline, self.handshake()).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Timeout),
            },
            None => self.handshake().await,
        };

        match result {
            Ok(channel) => {
                self.stop_scan().await;
                self.channel = Some(channel);
                self.failed_attempts = 0;
                self.link += 1;
                self.transition(SessionState::Ready).await;
            },
            Err(err) => self.fail_attempt(err).await,
        }
    }

    async fn fail_attempt(&mut self, error: SessionError) {
        warn!("{}: Connection attempt failed: {}", self.address(), error);
        self.failed_attempts += 1;

        // the device only advertises again once the link is down
        self.disconnect_peripheral().await;
        self.transition(SessionState::Disconnected).await;
        self.emit(SessionEvent::AttemptFailed(error)).await;

        if let Some(max_attempts) = self.settings.reconnect.max_attempts {
            if self.failed_attempts >= max_attempts {
                warn!("{}: Giving up after {} failed attempts", self.address(), self.failed_attempts);
                self.emit(SessionEvent::GaveUp { attempts: self.failed_attempts }).await;
                self.transition(SessionState::Stopped).await;
                return;
            }
        }

        self.schedule_rescan().await;
    }

    async fn lose_connection(&mut self, reason: SessionError, disconnect: bool) {
        info!("{}: Disconnected: {}", self.address(), reason);

        if disconnect {
            self.disconnect_peripheral().await;
        } else {
            self.peripheral = None;
        }

        self.transition(SessionState::Disconnected).await;
        self.emit(SessionEvent::Lost(reason)).await;
        self.schedule_rescan().await;
    }

    async fn schedule_rescan(&mut self) {
        let delay = self.settings.reconnect.delay;

        if delay.is_zero() {
            self.rescan().await;
        } else {
            info!("{}: Restarting scan in {}", self.address(), humantime::format_duration(delay));
            self.rescan_at = Some(Instant::now() + delay);
        }
    }

    async fn handle_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::Discovered(address) => {
                if self.state != SessionState::Scanning {
                    return;
                }

                if address != self.address() {
                    debug!("{}: Found non-matching peripheral {}", self.address(), address);
                    return;
                }

                info!("{}: Found thermostat, connecting...", self.address());
                self.connect().await;
            },
            CentralEvent::Disconnected(address) => {
                if address == self.address() && self.state == SessionState::Ready {
                    self.lose_connection(SessionError::UnexpectedDisconnect, false).await;
                }
            },
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::ForceDisconnect { link } => {
                // every waiter of a timed out read asks; only the first request for the
                // current link counts
                if self.state == SessionState::Ready && link == self.link {
                    self.lose_connection(SessionError::Timeout, true).await;
                }
            },
        }
    }

    /// Releases the scan and the peripheral. Also runs after the session gave up, which enters
    /// Stopped without cleaning up.
    async fn shutdown(&mut self) {
        let was_ready = self.state == SessionState::Ready;
        self.coalescer.fail_all(SessionError::Stopped);
        self.disconnect_peripheral().await;
        self.stop_scan().await;
        self.transition(SessionState::Stopped).await;

        if was_ready {
            self.emit(SessionEvent::Lost(SessionError::Stopped)).await;
        }
    }

    async fn run(mut self, cancel: CancellationToken, mut commands: UnboundedReceiver<SessionCommand>) {
        let mut events = match self.central.events().await {
            Ok(events) => events,
            Err(err) => {
                warn!("{}: Failed to listen for bluetooth events: {}", self.address(), err);
                self.shutdown().await;
                return;
            },
        };

        self.rescan().await;

        'mainloop: loop {
            let rescan_at = self.rescan_at;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                _ = sleep_until(rescan_at.unwrap_or_else(Instant::now)), if rescan_at.is_some() => {
                    self.rescan().await;
                },
                event = events.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("{}: Bluetooth event stream ended", self.address());
                        break 'mainloop;
                    },
                },
                Some(command) = commands.next() => {
                    self.handle_command(command).await;
                },
            }

            if self.state == SessionState::Stopped {
                break 'mainloop;
            }
        }

        self.shutdown().await;
    }
}

/// The get/set surface of a running session. Cheap to clone; all clones talk to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    identity: DeviceIdentity,
    settings: SessionSettings,
    coalescer: Arc<ReadCoalescer>,
    snapshot: watch::Receiver<SessionSnapshot>,
    commands: UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    /// The last state read from or written to the device, without touching the radio.
    pub fn last_state(&self) -> Option<ThermostatState> {
        self.coalescer.latest()
    }

    pub fn pending_reads(&self) -> usize {
        self.coalescer.pending()
    }

    /// Resolves once the session is in `state`. Fails if the session stops first.
    pub async fn wait_for_state(&self, state: SessionState) -> Result<(), SessionError> {
        let mut snapshot = self.snapshot.clone();

        loop {
            let current = snapshot.borrow_and_update().state;
            if current == state {
                return Ok(());
            }
            if current == SessionState::Stopped || snapshot.changed().await.is_err() {
                return Err(SessionError::Stopped);
            }
        }
    }

    fn channel(&self) -> Result<(Arc<dyn GattChannel>, u64), SessionError> {
        let snapshot = self.snapshot.borrow();
        let channel = snapshot.channel.clone().ok_or(SessionError::ChannelNotReady)?;
        Ok((channel, snapshot.link))
    }

    fn request_disconnect(&self, link: u64) {
        // fails only if the session has already stopped
        let _ = self.commands.unbounded_send(SessionCommand::ForceDisconnect { link });
    }

    pub async fn read_state(&self) -> Result<ThermostatState, SessionError> {
        let (channel, link) = self.channel()?;
        let result = self.coalescer.read(channel).await;

        if result == Err(SessionError::Timeout) {
            self.request_disconnect(link);
        }

        result
    }

    pub async fn current_temperature(&self) -> Result<f32, SessionError> {
        Ok(self.read_state().await?.current)
    }

    pub async fn target_temperature(&self) -> Result<f32, SessionError> {
        Ok(self.read_state().await?.target)
    }

    /// Write a new target temperature, clamped to the configured range and rounded to half a
    /// degree. Returns the target that was written.
    ///
    /// Writes are not serialized against each other; callers must not issue a write while another
    /// one is outstanding.
    pub async fn set_target_temperature(&self, value: f32) -> Result<f32, SessionError> {
        self.channel()?;

        if !value.is_finite() {
            return Err(SessionError::InvalidTemperature { value: value.to_string() });
        }

        let target = self.settings.range.constrain(value);
        if target != value {
            info!("{}: Target temperature {} adjusted to {}", self.identity.address, value, target);
        }

        // never write back fields that were not read from this device
        let base = match self.coalescer.latest() {
            Some(state) => state,
            None => self.read_state().await?,
        };
        let state = base.with_target(target);

        info!("{}: Setting target temperature to {}", self.identity.address, target);
        self.write_record(&encode(&state)).await?;
        self.coalescer.store(state);
        Ok(target)
    }

    async fn write_record(&self, record: &[u8]) -> Result<(), SessionError> {
        let (channel, link) = self.channel()?;
        let mut snapshot = self.snapshot.clone();
        snapshot.borrow_and_update();

        let write = async {
            let result = match self.settings.operation_timeout {
                Some(deadline) => match timeout(deadline, channel.write(record)).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.request_disconnect(link);
                        return Err(SessionError::Timeout);
                    },
                },
                None => channel.write(record).await,
            };

            result.map_err(|err| SessionError::WriteFailure { reason: err.to_string() })
        };

        let lost = async {
            loop {
                if snapshot.changed().await.is_err() {
                    return;
                }
                let state = snapshot.borrow().state;
                if state != SessionState::Ready {
                    return;
                }
            }
        };

        tokio::select! {
            result = write => result,
            _ = lost => Err(SessionError::UnexpectedDisconnect),
        }
    }
}

/// Start a session for one thermostat. Events are sent to every sender in `senders`; receivers
/// must keep draining them, the session waits for room in each channel.
pub fn spawn_session(
    central: Arc<dyn BleCentral>,
    identity: DeviceIdentity,
    settings: SessionSettings,
    cancel: CancellationToken,
    senders: Vec<Sender<SessionEvent>>,
) -> (SessionHandle, JoinHandle<()>) {
    let coalescer = Arc::new(ReadCoalescer::new(settings.operation_timeout));
    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot { state: SessionState::Idle, channel: None, link: 0 });
    let (commands_tx, commands_rx) = unbounded();

    let session = ConnectionSession {
        central,
        identity,
        settings,
        state: SessionState::Idle,
        peripheral: None,
        channel: None,
        coalescer: Arc::clone(&coalescer),
        snapshot: snapshot_tx,
        senders,
        failed_attempts: 0,
        rescan_at: None,
        scanning: false,
        link: 0,
    };

    let handle = SessionHandle {
        identity,
        settings,
        coalescer,
        snapshot: snapshot_rx,
        commands: commands_tx,
    };

    let task = spawn(session.run(cancel, commands_rx));
    (handle, task)
}
