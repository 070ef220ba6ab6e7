use std::sync::Arc;

use serde_json::to_value;
use shared_logging::LogLevel;
use tracing::warn;

use crate::clock::{elapsed_micros, Clock};
use crate::error::Result;
use crate::registry::WindowRegistry;
use crate::report::{Report, ReportSink};
use crate::telemetry::ComparatorTelemetry;

/// Periodic snapshot of all windows into one report line.
pub struct ReportSampler {
    registry: Arc<WindowRegistry>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ReportSink>,
    telemetry: ComparatorTelemetry,
    started_at: u64,
}

impl std::fmt::Debug for ReportSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportSampler")
            .field("started_at", &self.started_at)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl ReportSampler {
    /// Creates a sampler; elapsed time is measured from the clock's reading now.
    #[must_use]
    pub fn new(
        registry: Arc<WindowRegistry>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ReportSink>,
        telemetry: ComparatorTelemetry,
    ) -> Self {
        let started_at = clock.now_micros();
        Self {
            registry,
            clock,
            sink,
            telemetry,
            started_at,
        }
    }

    /// Snapshots the windows and computes the report without emitting it.
    #[must_use]
    pub fn sample(&self) -> Report {
        let snapshot = self.registry.snapshot_all();
        let elapsed = elapsed_micros(self.started_at, self.clock.now_micros());
        Report::from_snapshot(elapsed, &snapshot)
    }

    /// One timer firing: sample, emit, and ask to be scheduled again.
    ///
    /// A sink failure is returned to the caller and ends the schedule.
    pub fn fire(&self) -> Result<bool> {
        let report = self.sample();
        self.sink.emit(&report)?;
        if let Err(err) = self
            .telemetry
            .log(LogLevel::Debug, "report.emitted", to_value(report).unwrap_or_default())
        {
            warn!(error = %err, "failed to log report");
        }
        Ok(true)
    }
}
