use std::io::{self, Write};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{ComparatorError, Result};
use crate::registry::RegistrySnapshot;
use crate::window::mean;

/// Header line written once before any report.
pub const CSV_HEADER: &str =
    "elapsedMicroseconds,recordedSteeringAvg,modelSteeringAvg,recordedPedalAvg,modelPedalAvg";

/// Windowed means at one sampler firing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Report {
    /// Microseconds since the service started.
    pub elapsed_micros: u64,
    /// Mean of the recorded steering window.
    pub recorded_steering: f32,
    /// Mean of the model steering window.
    pub model_steering: f32,
    /// Mean of the recorded pedal window.
    pub recorded_pedal: f32,
    /// Mean of the model pedal window.
    pub model_pedal: f32,
}

impl Report {
    /// Computes the four means of a snapshot.
    #[must_use]
    pub fn from_snapshot(elapsed_micros: u64, snapshot: &RegistrySnapshot) -> Self {
        Self {
            elapsed_micros,
            recorded_steering: mean(&snapshot.recorded_steering),
            model_steering: mean(&snapshot.model_steering),
            recorded_pedal: mean(&snapshot.recorded_pedal),
            model_pedal: mean(&snapshot.model_pedal),
        }
    }

    /// One CSV line in [`CSV_HEADER`] column order, without a trailing newline.
    #[must_use]
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.elapsed_micros,
            self.recorded_steering,
            self.model_steering,
            self.recorded_pedal,
            self.model_pedal
        )
    }
}

/// Destination for report lines.
pub trait ReportSink: Send + Sync {
    /// Writes the column header.
    fn write_header(&self) -> Result<()>;

    /// Writes one report.
    fn emit(&self, report: &Report) -> Result<()>;
}

/// Line-oriented CSV writer; each line is flushed as it is written.
#[derive(Debug)]
pub struct CsvSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> CsvSink<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(ComparatorError::Sink)
    }
}

impl CsvSink<io::Stdout> {
    /// Sink writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ReportSink for CsvSink<W> {
    fn write_header(&self) -> Result<()> {
        self.write_line(CSV_HEADER)
    }

    fn emit(&self, report: &Report) -> Result<()> {
        self.write_line(&report.to_csv_line())
    }
}
