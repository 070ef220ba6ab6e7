use std::sync::Arc;
use std::time::Duration;

use shared_event_bus::{Envelope, EnvelopePublisher, MemoryEventBus};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{ComparatorError, Result};

/// A conference on the envelope bus: per-type data triggers plus a periodic time trigger.
#[derive(Debug, Clone)]
pub struct SignalSession {
    cid: u16,
    bus: Arc<MemoryEventBus>,
}

impl SignalSession {
    /// Joins conference `cid` on `bus`.
    #[must_use]
    pub const fn new(cid: u16, bus: Arc<MemoryEventBus>) -> Self {
        Self { cid, bus }
    }

    /// Conference id.
    #[must_use]
    pub const fn cid(&self) -> u16 {
        self.cid
    }

    /// Publishes an envelope into the conference.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        self.bus
            .publish(envelope)
            .await
            .map_err(|err| ComparatorError::Transport(err.to_string()))
    }

    /// Invokes `handler` for every envelope of `data_type` published from now on.
    ///
    /// The subscription is taken before this returns, so nothing published
    /// afterwards is missed. Must be called from within a tokio runtime.
    pub fn data_trigger<F>(&self, data_type: i32, handler: F) -> JoinHandle<()>
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribe_where(move |envelope| envelope.data_type == data_type, handler)
    }

    /// Invokes `handler` for every envelope published from now on, whatever its type.
    pub fn all_trigger<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribe_where(|_| true, handler)
    }

    fn subscribe_where<P, F>(&self, accept: P, handler: F) -> JoinHandle<()>
    where
        P: Fn(&Envelope) -> bool + Send + 'static,
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let mut receiver = self.bus.receiver();
        let cid = self.cid;
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) if accept(&envelope) => handler(&envelope),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(cid, skipped, "subscriber lagged; envelopes skipped");
                    }
                    Err(RecvError::Closed) => {
                        debug!(cid, "bus closed; subscription ends");
                        break;
                    }
                }
            }
        })
    }

    /// Calls `callback` every `1 / freq_hz` seconds until it returns `Ok(false)` or an error.
    ///
    /// The first tick fires immediately. Missed ticks are skipped rather than
    /// replayed in a burst.
    pub async fn time_trigger<F>(&self, freq_hz: f32, mut callback: F) -> Result<()>
    where
        F: FnMut() -> Result<bool> + Send,
    {
        let period = period_for(freq_hz)?;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if !callback()? {
                return Ok(());
            }
        }
    }
}

/// Timer period for a frequency in Hz.
pub fn period_for(freq_hz: f32) -> Result<Duration> {
    if !freq_hz.is_finite() || freq_hz <= 0.0 {
        return Err(ComparatorError::Config(format!(
            "frequency must be a positive number of Hz, got {freq_hz}"
        )));
    }
    Duration::try_from_secs_f64(1.0 / f64::from(freq_hz))
        .map_err(|err| ComparatorError::Config(format!("frequency {freq_hz} Hz: {err}")))
        .and_then(|period| {
            if period.is_zero() {
                Err(ComparatorError::Config(format!("frequency {freq_hz} Hz is too high")))
            } else {
                Ok(period)
            }
        })
}
