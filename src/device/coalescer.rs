//! At most one read of the temperatures characteristic is in flight at any time. Callers that
//! arrive while a read is in flight wait for that read instead of issuing their own, and every
//! waiter receives the same outcome, in arrival order.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use log::{debug, warn};
use tokio::spawn;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::device::central::GattChannel;
use crate::device::codec::decode_record;
use crate::device::types::ThermostatState;
use crate::error::SessionError;

type ReadOutcome = Result<ThermostatState, SessionError>;

#[derive(Default)]
struct CoalescerInner {
    waiters: Vec<oneshot::Sender<ReadOutcome>>,
    // bumped by `fail_all`; a read that completes for an older generation has no waiters left
    generation: u64,
    latest: Option<ThermostatState>,
    reads_issued: u64,
}

pub struct ReadCoalescer {
    inner: Mutex<CoalescerInner>,
    read_timeout: Option<Duration>,
}

impl ReadCoalescer {
    pub fn new(read_timeout: Option<Duration>) -> Self {
        ReadCoalescer {
            inner: Mutex::new(CoalescerInner::default()),
            read_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoalescerInner> {
        self.inner.lock().expect("Failed to lock ReadCoalescer inner")
    }

    pub async fn read(self: &Arc<Self>, channel: Arc<dyn GattChannel>) -> ReadOutcome {
        let (tx, rx) = oneshot::channel();

        let generation = {
            let mut inner = self.lock();
            inner.waiters.push(tx);

            if inner.waiters.len() > 1 {
                debug!("Read already in flight, queued ({} waiting)", inner.waiters.len());
                None
            } else {
                inner.reads_issued += 1;
                Some(inner.generation)
            }
        };

        if let Some(generation) = generation {
            // the read runs on its own task, so that cancelling the first caller does not strand
            // the callers queued behind it
            let coalescer = Arc::clone(self);
            spawn(async move {
                let outcome = coalescer.read_raw(channel.as_ref()).await;
                coalescer.complete(generation, outcome);
            });
        }

        match rx.await {
            Ok(outcome) => outcome,
            // the sender is only dropped without sending when the runtime shuts down
            Err(_) => Err(SessionError::Stopped),
        }
    }

    async fn read_raw(&self, channel: &dyn GattChannel) -> ReadOutcome {
        let payload = match self.read_timeout {
            Some(deadline) => match timeout(deadline, channel.read()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Reading the temperatures characteristic took too long");
                    return Err(SessionError::Timeout);
                },
            },
            None => channel.read().await,
        };

        let payload = payload.map_err(|err| SessionError::ReadFailure { reason: err.to_string() })?;
        debug!("Read temperatures record {:?}", payload);
        decode_record(&payload)
    }

    fn complete(&self, generation: u64, outcome: ReadOutcome) {
        let waiters = {
            let mut inner = self.lock();

            if inner.generation != generation {
                debug!("Discarding the result of a read that was interrupted by a disconnect");
                return;
            }

            if let Ok(state) = &outcome {
                inner.latest = Some(*state);
            }

            std::mem::take(&mut inner.waiters)
        };

        if let Err(err) = &outcome {
            warn!("Read from temperatures characteristic failed: {}", err);
        }

        debug!("Sending read result to {} waiting callers", waiters.len());
        for waiter in waiters {
            // the caller may have gone away
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Fail every waiting caller with `error`. The read that is in flight, if any, will be
    /// discarded when it completes.
    pub fn fail_all(&self, error: SessionError) {
        let waiters = {
            let mut inner = self.lock();
            inner.generation += 1;
            std::mem::take(&mut inner.waiters)
        };

        if !waiters.is_empty() {
            debug!("Failing {} waiting reads: {}", waiters.len(), error);
        }

        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// The most recent state read from (or written to) the device.
    pub fn latest(&self) -> Option<ThermostatState> {
        self.lock().latest
    }

    pub fn store(&self, state: ThermostatState) {
        self.lock().latest = Some(state);
    }

    pub fn pending(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn reads_issued(&self) -> u64 {
        self.lock().reads_issued
    }
}
