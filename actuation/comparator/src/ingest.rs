use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use shared_event_bus::Envelope;
use tracing::{debug, warn};

use crate::registry::{SignalKind, Source, WindowKey, WindowRegistry};

/// What happened to one incoming sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Appended to the window of this source.
    Accepted(Source),
    /// Sender stamp not recognized; no window touched.
    Dropped,
    /// Payload could not be decoded; no window touched.
    Undecodable,
}

/// Counters for one signal kind.
#[derive(Debug, Default)]
pub struct KindCounters {
    recorded: AtomicU64,
    model: AtomicU64,
    dropped: AtomicU64,
    undecodable: AtomicU64,
}

/// Point-in-time copy of [`KindCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCountersSnapshot {
    /// Samples accepted from the recorded source.
    pub recorded: u64,
    /// Samples accepted from the model source.
    pub model: u64,
    /// Samples with an unrecognized sender stamp.
    pub dropped: u64,
    /// Envelopes whose payload failed to decode.
    pub undecodable: u64,
}

impl KindCounters {
    fn record(&self, outcome: IngestOutcome) {
        let counter = match outcome {
            IngestOutcome::Accepted(Source::Recorded) => &self.recorded,
            IngestOutcome::Accepted(Source::Model) => &self.model,
            IngestOutcome::Dropped => &self.dropped,
            IngestOutcome::Undecodable => &self.undecodable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> KindCountersSnapshot {
        KindCountersSnapshot {
            recorded: self.recorded.load(Ordering::Relaxed),
            model: self.model.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
        }
    }
}

/// Ingest counters for both signal kinds.
#[derive(Debug, Default)]
pub struct IngestStats {
    steering: KindCounters,
    pedal: KindCounters,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    /// Steering counters.
    pub steering: KindCountersSnapshot,
    /// Pedal counters.
    pub pedal: KindCountersSnapshot,
}

impl IngestStats {
    const fn counters(&self, kind: SignalKind) -> &KindCounters {
        match kind {
            SignalKind::Steering => &self.steering,
            SignalKind::Pedal => &self.pedal,
        }
    }

    /// Current counter values.
    #[must_use]
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            steering: self.steering.snapshot(),
            pedal: self.pedal.snapshot(),
        }
    }
}

/// Routes samples of one signal kind into the recorded or model window.
#[derive(Debug, Clone)]
pub struct IngestHandler {
    kind: SignalKind,
    registry: Arc<WindowRegistry>,
    stats: Arc<IngestStats>,
}

impl IngestHandler {
    /// Creates a handler for `kind` writing into `registry`.
    #[must_use]
    pub const fn new(kind: SignalKind, registry: Arc<WindowRegistry>, stats: Arc<IngestStats>) -> Self {
        Self {
            kind,
            registry,
            stats,
        }
    }

    /// Signal kind this handler accepts.
    #[must_use]
    pub const fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Appends `value` to the window selected by `sender_stamp`.
    ///
    /// Stamp 0 goes to the recorded window and stamp 1 to the model window;
    /// any other stamp is dropped. Only the selected window's guard is taken.
    pub fn handle(&self, sender_stamp: u32, value: f32) -> IngestOutcome {
        let outcome = match Source::from_stamp(sender_stamp) {
            Some(source) => {
                self.registry.append(WindowKey::new(self.kind, source), value);
                IngestOutcome::Accepted(source)
            }
            None => {
                debug!(kind = %self.kind, sender_stamp, "ignoring sample from unknown sender");
                IngestOutcome::Dropped
            }
        };
        self.stats.counters(self.kind).record(outcome);
        outcome
    }

    /// Decodes an envelope of this handler's kind and routes its value.
    pub fn handle_envelope(&self, envelope: &Envelope) -> IngestOutcome {
        match self.kind.decode(envelope) {
            Ok(value) => self.handle(envelope.sender_stamp, value),
            Err(err) => {
                warn!(kind = %self.kind, sender_stamp = envelope.sender_stamp, error = %err, "undecodable envelope");
                self.stats.counters(self.kind).record(IngestOutcome::Undecodable);
                IngestOutcome::Undecodable
            }
        }
    }
}
