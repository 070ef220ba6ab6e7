#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Compares recorded and model actuation requests over sliding windows.
//!
//! Steering and pedal requests arrive on a [`session::SignalSession`] tagged
//! with a sender stamp (0 = recorded, 1 = model). Each one is appended to one of
//! four fixed-capacity windows, each behind its own lock. A periodic
//! [`sampler::ReportSampler`] copies all four windows in a fixed lock order and
//! emits the windowed means as one CSV line.

/// Monotonic time sources.
pub mod clock;

/// Comparator configuration (TOML file plus overrides).
pub mod config;

/// Error type of the comparator core.
pub mod error;

/// Sender-stamp routing of samples into windows.
pub mod ingest;

/// Steering and pedal request messages.
pub mod messages;

/// The four guarded windows.
pub mod registry;

/// Report records and CSV sinks.
pub mod report;

/// Periodic report sampling.
pub mod sampler;

/// Comparison service wiring.
pub mod service;

/// Data and time triggers over the envelope bus.
pub mod session;

/// Structured JSON-lines telemetry.
pub mod telemetry;

/// Bounded FIFO sample window.
pub mod window;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ComparatorConfig, ConfigFile};
pub use error::ComparatorError;
pub use ingest::{IngestHandler, IngestOutcome, IngestStats};
pub use messages::{GroundSteeringRequest, Message, PedalPositionRequest};
pub use registry::{SignalKind, Source, WindowKey, WindowRegistry, LOCK_ORDER};
pub use report::{CsvSink, Report, ReportSink, CSV_HEADER};
pub use sampler::ReportSampler;
pub use service::ComparisonService;
pub use session::SignalSession;
pub use telemetry::{ComparatorTelemetry, ComparatorTelemetryBuilder};
pub use window::{mean, SlidingWindow, DEFAULT_WINDOW_CAPACITY};
