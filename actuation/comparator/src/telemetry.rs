use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::{json, Value};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use uuid::Uuid;

/// Builder for comparator telemetry sinks.
pub struct ComparatorTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
}

impl ComparatorTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<ComparatorTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::new(path)?),
            None => None,
        };
        Ok(ComparatorTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                instance: Uuid::new_v4(),
                logger,
            }),
        })
    }
}

/// Structured log handle shared by the service, handlers and sampler.
#[derive(Clone)]
pub struct ComparatorTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for ComparatorTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComparatorTelemetry")
            .field("module", &self.inner.module)
            .field("instance", &self.inner.instance)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    instance: Uuid,
    logger: Option<JsonLogger>,
}

impl ComparatorTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> ComparatorTelemetryBuilder {
        ComparatorTelemetryBuilder::new(module)
    }

    /// Telemetry that records nothing.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                instance: Uuid::new_v4(),
                logger: None,
            }),
        }
    }

    /// Identifier of this service instance, stamped on every record.
    #[must_use]
    pub fn instance(&self) -> Uuid {
        self.inner.instance
    }

    /// Writes a structured record when a log path is configured.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message)
                .with_metadata(json!({ "instance": self.inner.instance.to_string() }))
                .with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }
}
