use std::fmt;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::window::SlidingWindow;

/// Kind of actuation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Ground steering angle request.
    Steering,
    /// Pedal position request.
    Pedal,
}

impl SignalKind {
    /// Both kinds, in report order.
    pub const ALL: [Self; 2] = [Self::Steering, Self::Pedal];

    /// Short lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Steering => "steering",
            Self::Pedal => "pedal",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Producer of a signal, derived from the transport's sender stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Ground truth played back from a recording (stamp 0).
    Recorded,
    /// Output of the model under test (stamp 1).
    Model,
}

impl Source {
    /// Maps a sender stamp to a source; any stamp other than 0 or 1 is unrecognized.
    #[must_use]
    pub const fn from_stamp(stamp: u32) -> Option<Self> {
        match stamp {
            0 => Some(Self::Recorded),
            1 => Some(Self::Model),
            _ => None,
        }
    }

    /// Sender stamp this source is published under.
    #[must_use]
    pub const fn stamp(self) -> u32 {
        match self {
            Self::Recorded => 0,
            Self::Model => 1,
        }
    }

    /// Short lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::Model => "model",
        }
    }
}

/// Identifies one of the four windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    /// Signal kind.
    pub kind: SignalKind,
    /// Producer.
    pub source: Source,
}

impl WindowKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(kind: SignalKind, source: Source) -> Self {
        Self { kind, source }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source.as_str(), self.kind.as_str())
    }
}

/// The order in which [`WindowRegistry::snapshot_all`] takes the window guards.
///
/// Every code path that holds more than one guard goes through
/// `snapshot_all`, and ingestion never holds more than one, so no lock cycle
/// can form.
pub const LOCK_ORDER: [WindowKey; 4] = [
    WindowKey::new(SignalKind::Steering, Source::Recorded),
    WindowKey::new(SignalKind::Pedal, Source::Recorded),
    WindowKey::new(SignalKind::Steering, Source::Model),
    WindowKey::new(SignalKind::Pedal, Source::Model),
];

/// Copies of all four windows taken by one [`WindowRegistry::snapshot_all`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySnapshot {
    /// Recorded steering samples, oldest first.
    pub recorded_steering: Vec<f32>,
    /// Model steering samples, oldest first.
    pub model_steering: Vec<f32>,
    /// Recorded pedal samples, oldest first.
    pub recorded_pedal: Vec<f32>,
    /// Model pedal samples, oldest first.
    pub model_pedal: Vec<f32>,
}

impl RegistrySnapshot {
    /// Samples for one window.
    #[must_use]
    pub fn get(&self, key: WindowKey) -> &[f32] {
        match (key.kind, key.source) {
            (SignalKind::Steering, Source::Recorded) => &self.recorded_steering,
            (SignalKind::Steering, Source::Model) => &self.model_steering,
            (SignalKind::Pedal, Source::Recorded) => &self.recorded_pedal,
            (SignalKind::Pedal, Source::Model) => &self.model_pedal,
        }
    }
}

/// Four independently guarded windows, one per (signal kind, source) pair.
#[derive(Debug)]
pub struct WindowRegistry {
    capacity: usize,
    recorded_steering: Mutex<SlidingWindow>,
    recorded_pedal: Mutex<SlidingWindow>,
    model_steering: Mutex<SlidingWindow>,
    model_pedal: Mutex<SlidingWindow>,
}

impl WindowRegistry {
    /// Creates four windows of `capacity`, each pre-filled with zeros.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let window = || Mutex::new(SlidingWindow::new(capacity));
        Self {
            capacity: capacity.max(1),
            recorded_steering: window(),
            recorded_pedal: window(),
            model_steering: window(),
            model_pedal: window(),
        }
    }

    /// Capacity shared by every window.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    const fn slot(&self, key: WindowKey) -> &Mutex<SlidingWindow> {
        match (key.kind, key.source) {
            (SignalKind::Steering, Source::Recorded) => &self.recorded_steering,
            (SignalKind::Steering, Source::Model) => &self.model_steering,
            (SignalKind::Pedal, Source::Recorded) => &self.recorded_pedal,
            (SignalKind::Pedal, Source::Model) => &self.model_pedal,
        }
    }

    /// Appends under that window's guard only.
    pub fn append(&self, key: WindowKey, sample: f32) {
        self.slot(key).lock().append(sample);
    }

    /// Copy of a single window.
    #[must_use]
    pub fn snapshot(&self, key: WindowKey) -> Vec<f32> {
        self.slot(key).lock().snapshot()
    }

    /// Copies all four windows, holding every guard for the duration of the copy.
    ///
    /// Guards are acquired in [`LOCK_ORDER`] and released together once the
    /// copies are made; no arithmetic happens under the guards.
    #[must_use]
    pub fn snapshot_all(&self) -> RegistrySnapshot {
        let guards: [MutexGuard<'_, SlidingWindow>; 4] = LOCK_ORDER.map(|key| self.slot(key).lock());
        let [recorded_steering, recorded_pedal, model_steering, model_pedal] = &guards;
        let snapshot = RegistrySnapshot {
            recorded_steering: recorded_steering.snapshot(),
            model_steering: model_steering.snapshot(),
            recorded_pedal: recorded_pedal.snapshot(),
            model_pedal: model_pedal.snapshot(),
        };
        drop(guards);
        snapshot
    }
}

impl Default for WindowRegistry {
    fn default() -> Self {
        Self::new(crate::window::DEFAULT_WINDOW_CAPACITY)
    }
}
