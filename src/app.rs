use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::{channel, Sender};
use futures::stream::{select_all, StreamExt};
use log::{error, info, warn};
use serde::Serialize;
use tokio::signal::ctrl_c;
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Command};
use crate::config::io::ConfigIO;
use crate::config::types::{Config, ThermostatConfig};
use crate::device::btle::BtleCentral;
use crate::device::central::BleCentral;
use crate::device::connection::{spawn_session, SessionHandle};
use crate::device::types::{DeviceInfo, SessionEvent, SessionState, ThermostatState};
use crate::error::{AppRunError, ConfigError};

/// What `get` prints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatReport {
    pub name: String,
    pub info: DeviceInfo,
    pub state: ThermostatState,
}

struct RunningSession {
    name: String,
    handle: SessionHandle,
    join_handle: JoinHandle<()>,
}

fn start(central: &Arc<dyn BleCentral>, config: &Config, thermostat: &ThermostatConfig, cancel: &CancellationToken, senders: Vec<Sender<SessionEvent>>) -> Result<RunningSession, ConfigError> {
    let (identity, settings) = config.session(thermostat)?;
    info!("{}: Starting session for {}", thermostat.name, identity.address);

    let (handle, join_handle) = spawn_session(Arc::clone(central), identity, settings, cancel.child_token(), senders);
    Ok(RunningSession { name: thermostat.name.clone(), handle, join_handle })
}

async fn stop(cancel: CancellationToken, sessions: Vec<RunningSession>) {
    cancel.cancel();

    for session in sessions {
        if let Err(err) = session.join_handle.await {
            error!("{}: Session task failed: {}", session.name, err);
        }
    }
}

async fn wait_ready(session: &RunningSession, wait: Duration) -> Result<(), AppRunError> {
    match timeout(wait, session.handle.wait_for_state(SessionState::Ready)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(AppRunError::SessionError { name: session.name.clone(), source }),
        Err(_) => Err(AppRunError::NotReady { name: session.name.clone(), wait: wait.into() }),
    }
}

/// Connect to one thermostat, read it once and disconnect again.
pub async fn get(central: Arc<dyn BleCentral>, config: &Config, name: Option<&str>, wait: Duration) -> Result<ThermostatReport, AppRunError> {
    let thermostat = config.find(name)?;
    let cancel = CancellationToken::new();
    let session = start(&central, config, thermostat, &cancel, Vec::new())?;

    let result: Result<ThermostatReport, AppRunError> = async {
        wait_ready(&session, wait).await?;

        let state = session.handle
            .read_state()
            .await
            .map_err(|source| AppRunError::SessionError { name: session.name.clone(), source })?;

        Ok(ThermostatReport {
            name: session.name.clone(),
            info: DeviceInfo::for_identity(session.handle.identity()),
            state,
        })
    }.await;

    stop(cancel, vec![session]).await;
    result
}

/// Connect to one thermostat and write a new target temperature. Returns the target that was
/// actually written, after clamping and rounding.
pub async fn set(central: Arc<dyn BleCentral>, config: &Config, name: Option<&str>, wait: Duration, temperature: f32) -> Result<f32, AppRunError> {
    let thermostat = config.find(name)?;
    let cancel = CancellationToken::new();
    let session = start(&central, config, thermostat, &cancel, Vec::new())?;

    let result: Result<f32, AppRunError> = async {
        wait_ready(&session, wait).await?;

        session.handle
            .set_target_temperature(temperature)
            .await
            .map_err(|source| AppRunError::SessionError { name: session.name.clone(), source })
    }.await;

    stop(cancel, vec![session]).await;
    result
}

fn log_event(name: &str, event: &SessionEvent) {
    match event {
        SessionEvent::StateChange(_) => {},
        SessionEvent::Ready => info!("{}: Ready", name),
        SessionEvent::Lost(reason) => warn!("{}: Connection lost: {}", name, reason),
        SessionEvent::AttemptFailed(reason) => warn!("{}: Connection attempt failed: {}", name, reason),
        SessionEvent::GaveUp { attempts } => error!("{}: Giving up after {} failed attempts", name, attempts),
    }
}

fn spawn_reading(session: &RunningSession) {
    let name = session.name.clone();
    let handle = session.handle.clone();

    spawn(async move {
        match handle.read_state().await {
            Ok(state) => info!(
                "{}: current {} °C, target {} °C (comfort {} °C, economy {} °C, offset {} °C)",
                name, state.current, state.target, state.comfort, state.economy, state.offset,
            ),
            Err(err) => warn!("{}: Reading failed: {}", name, err),
        }
    });
}

/// Keep a session for every configured thermostat and log a reading of each ready thermostat every
/// `period`, until interrupted or every session has stopped.
pub async fn monitor(central: Arc<dyn BleCentral>, config: &Config, period: Duration, cancel: CancellationToken) -> Result<(), AppRunError> {
    if config.thermostats.is_empty() {
        return Err(ConfigError::NoThermostats.into());
    }

    let mut sessions = Vec::with_capacity(config.thermostats.len());
    let mut receivers = Vec::with_capacity(config.thermostats.len());

    for thermostat in &config.thermostats {
        let (sender, receiver) = channel(16);
        let session = start(&central, config, thermostat, &cancel, vec![sender])?;
        let name = session.name.clone();
        receivers.push(receiver.map(move |event| (name.clone(), event)).boxed());
        sessions.push(session);
    }

    let mut events = select_all(receivers);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            event = events.next() => {
                match event {
                    Some((name, event)) => log_event(&name, &event),
                    None => {
                        info!("Every session has stopped");
                        break;
                    },
                }
            },
            _ = ticker.tick() => {
                for session in &sessions {
                    if session.handle.state() == SessionState::Ready {
                        spawn_reading(session);
                    }
                }
            },
        }
    }

    stop(cancel, sessions).await;
    Ok(())
}

pub async fn run_application(cli: Cli) -> Result<(), AppRunError> {
    let config_io = ConfigIO::open(cli.config.clone())?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let config = config_io.read().await?;
    if config.thermostats.is_empty() {
        warn!("Add a thermostat to {}", config_io.path().to_string_lossy());
        return Err(ConfigError::NoThermostats.into());
    }

    let central: Arc<dyn BleCentral> = Arc::new(BtleCentral::new().await?);

    match cli.command {
        Command::Monitor { interval } => {
            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            spawn(async move {
                if let Err(err) = ctrl_c().await {
                    error!("Failed to listen for ctrl-c: {}", err);
                    return;
                }
                info!("Interrupted, stopping");
                interrupt.cancel();
            });

            monitor(central, &config, *interval, cancel).await
        },
        Command::Get { name, wait } => {
            let report = get(central, &config, name.as_deref(), *wait).await?;
            let content = serde_json::to_string_pretty(&report)?;
            println!("{}", content);
            Ok(())
        },
        Command::Set { name, wait, temperature } => {
            let target = set(central, &config, name.as_deref(), *wait, temperature).await?;
            println!("Target temperature set to {} °C", target);
            Ok(())
        },
    }
}
