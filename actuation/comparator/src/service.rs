//! Wires windows, handlers, sampler and session into the running comparison service.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use shared_event_bus::{Envelope, EnvelopePublisher, FileEventPublisher, MemoryEventBus};
use shared_logging::LogLevel;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ComparatorConfig;
use crate::ingest::{IngestHandler, IngestStats};
use crate::registry::{SignalKind, WindowRegistry};
use crate::report::ReportSink;
use crate::sampler::ReportSampler;
use crate::session::SignalSession;
use crate::telemetry::ComparatorTelemetry;

/// The comparison service: one registry shared by two ingest handlers and one sampler.
pub struct ComparisonService {
    config: ComparatorConfig,
    session: SignalSession,
    registry: Arc<WindowRegistry>,
    stats: Arc<IngestStats>,
    sink: Arc<dyn ReportSink>,
    sampler: ReportSampler,
    telemetry: ComparatorTelemetry,
}

impl std::fmt::Debug for ComparisonService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComparisonService")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("sampler", &self.sampler)
            .finish_non_exhaustive()
    }
}

impl ComparisonService {
    /// Builds the service; windows start full of zeros and the clock starts now.
    pub fn new(
        config: ComparatorConfig,
        bus: Arc<MemoryEventBus>,
        sink: Arc<dyn ReportSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().context("invalid comparator configuration")?;
        let mut telemetry = ComparatorTelemetry::builder("actuation-comparator");
        if let Some(path) = &config.log_path {
            telemetry = telemetry.log_path(path);
        }
        let telemetry = telemetry.build().context("opening comparator log")?;
        let registry = Arc::new(WindowRegistry::new(config.window_capacity));
        let sampler = ReportSampler::new(
            Arc::clone(&registry),
            clock,
            Arc::clone(&sink),
            telemetry.clone(),
        );
        Ok(Self {
            session: SignalSession::new(config.cid, bus),
            config,
            registry,
            stats: Arc::new(IngestStats::default()),
            sink,
            sampler,
            telemetry,
        })
    }

    /// Shared windows.
    #[must_use]
    pub const fn registry(&self) -> &Arc<WindowRegistry> {
        &self.registry
    }

    /// Ingest counters.
    #[must_use]
    pub const fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// Session the service listens on.
    #[must_use]
    pub const fn session(&self) -> &SignalSession {
        &self.session
    }

    /// Sampler driven by the time trigger.
    #[must_use]
    pub const fn sampler(&self) -> &ReportSampler {
        &self.sampler
    }

    /// Handler for one signal kind, sharing this service's windows.
    #[must_use]
    pub fn handler(&self, kind: SignalKind) -> IngestHandler {
        IngestHandler::new(kind, Arc::clone(&self.registry), Arc::clone(&self.stats))
    }

    /// Subscribes both handlers (and the tap, if configured). Call inside a tokio runtime.
    ///
    /// The tap is written by a single task fed in delivery order, so the file
    /// replays in the order the session saw it.
    pub fn subscribe(&self) -> Result<Vec<JoinHandle<()>>> {
        let mut tasks = Vec::with_capacity(4);
        for kind in SignalKind::ALL {
            let handler = self.handler(kind);
            tasks.push(self.session.data_trigger(handler.kind().data_type(), move |envelope| {
                handler.handle_envelope(envelope);
            }));
        }
        if let Some(path) = &self.config.tap_path {
            let tap = FileEventPublisher::new(path).context("opening envelope tap")?;
            let (queue, mut pending) = mpsc::unbounded_channel::<Envelope>();
            tasks.push(self.session.all_trigger(move |envelope| {
                if queue.send(envelope.clone()).is_err() {
                    debug!("envelope tap writer stopped");
                }
            }));
            tasks.push(tokio::spawn(async move {
                while let Some(envelope) = pending.recv().await {
                    if let Err(err) = tap.publish(envelope).await {
                        warn!(error = %err, path = %tap.path().display(), "envelope tap write failed");
                    }
                }
            }));
        }
        Ok(tasks)
    }

    /// Subscribes, then serves until `shutdown` resolves or the sink fails.
    pub async fn run<S>(&self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        let tasks = self.subscribe()?;
        self.serve(tasks, shutdown).await
    }

    /// Writes the header and reports at the configured frequency; `tasks` (from
    /// [`Self::subscribe`]) are aborted when serving ends.
    pub async fn serve<S>(&self, tasks: Vec<JoinHandle<()>>, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        if let Err(err) = self.sink.write_header() {
            abort_all(tasks);
            return Err(err).context("writing report header");
        }
        info!(cid = self.config.cid, freq_hz = self.config.freq_hz, "comparison service started");
        self.log(
            LogLevel::Info,
            "service.start",
            json!({
                "cid": self.config.cid,
                "freq_hz": self.config.freq_hz,
                "window_capacity": self.registry.capacity(),
            }),
        );

        let outcome = tokio::select! {
            result = self.session.time_trigger(self.config.freq_hz, || self.sampler.fire()) => {
                result.context("report sampler stopped")
            }
            () = shutdown => Ok(()),
        };

        abort_all(tasks);
        let stats = self.stats.snapshot();
        info!(?stats, "comparison service stopped");
        self.log(
            LogLevel::Info,
            "service.stop",
            json!({ "ingest": stats, "ok": outcome.is_ok() }),
        );
        outcome
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Err(err) = self.telemetry.log(level, message, metadata) {
            warn!(error = %err, event = message, "failed to write structured log");
        }
    }
}

fn abort_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};
    use crate::messages::{envelope_for, GroundSteeringRequest, PedalPositionRequest};
    use crate::registry::Source;
    use crate::report::{CsvSink, CSV_HEADER};
    use parking_lot::Mutex;
    use shared_event_bus::replay_file;
    use shared_logging::read_records;
    use std::io::{self, Write};
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().clone())
                .unwrap()
                .lines()
                .map(str::to_owned)
                .collect()
        }
    }

    fn parse_means(line: &str) -> (u64, Vec<f32>) {
        let mut fields = line.split(',');
        let elapsed = fields.next().unwrap().parse().unwrap();
        (elapsed, fields.map(|f| f.parse().unwrap()).collect())
    }

    async fn wait_for_handled(service: &ComparisonService, total: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stats = service.stats().snapshot();
                let handled = [stats.steering, stats.pedal]
                    .iter()
                    .map(|c| c.recorded + c.model + c.dropped + c.undecodable)
                    .sum::<u64>();
                if handled >= total {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handlers did not drain the bus");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn end_to_end_report_reflects_fed_samples() {
        let buffer = SharedBuffer::default();
        let bus = Arc::new(MemoryEventBus::new(256));
        let clock = Arc::new(ManualClock::new(0));
        let service = ComparisonService::new(
            ComparatorConfig::new(111, 1.0),
            Arc::clone(&bus),
            Arc::new(CsvSink::new(buffer.clone())),
            clock.clone(),
        )
        .unwrap();
        let tasks = service.subscribe().unwrap();

        let recorded = Source::Recorded.stamp();
        let model = Source::Model.stamp();
        for _ in 0..10 {
            let session = service.session();
            session.send(envelope_for(&GroundSteeringRequest { ground_steering: 0.5 }, recorded).unwrap()).await.unwrap();
            session.send(envelope_for(&GroundSteeringRequest { ground_steering: 0.2 }, model).unwrap()).await.unwrap();
            session.send(envelope_for(&PedalPositionRequest { position: 0.8 }, recorded).unwrap()).await.unwrap();
            session.send(envelope_for(&PedalPositionRequest { position: 0.1 }, model).unwrap()).await.unwrap();
            session.send(envelope_for(&PedalPositionRequest { position: 9.0 }, 4).unwrap()).await.unwrap();
        }
        wait_for_handled(&service, 50).await;
        clock.advance(1_234);
        assert!(service.sampler().fire().unwrap());
        for task in tasks {
            task.abort();
        }

        assert_eq!(buffer.lines(), vec!["1234,0.5,0.2,0.8,0.1".to_owned()]);
        assert_eq!(service.stats().snapshot().pedal.dropped, 10);
        for key in crate::registry::LOCK_ORDER {
            assert_eq!(service.registry().snapshot(key).len(), 10);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_writes_header_and_reports_until_shutdown() {
        let dir = tempdir().unwrap();
        let mut config = ComparatorConfig::new(7, 200.0);
        config.log_path = Some(dir.path().join("comparator.jsonl"));
        let buffer = SharedBuffer::default();
        let service = ComparisonService::new(
            config,
            Arc::new(MemoryEventBus::new(16)),
            Arc::new(CsvSink::new(buffer.clone())),
            Arc::new(MonotonicClock::new()),
        )
        .unwrap();

        service
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        let lines = buffer.lines();
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines.len() >= 2, "expected at least one report, got {lines:?}");
        let elapsed: Vec<u64> = lines[1..].iter().map(|l| parse_means(l).0).collect();
        assert!(elapsed.windows(2).all(|pair| pair[0] <= pair[1]));

        let records = read_records(dir.path().join("comparator.jsonl")).unwrap();
        let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages.first(), Some(&"service.start"));
        assert_eq!(messages.last(), Some(&"service.stop"));
        assert!(messages.contains(&"report.emitted"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn tap_preserves_delivery_order() {
        const SENT: usize = 500;
        let dir = tempdir().unwrap();
        let tap_path = dir.path().join("tap.jsonl");
        let mut config = ComparatorConfig::new(7, 1.0);
        config.tap_path = Some(tap_path.clone());
        let service = ComparisonService::new(
            config,
            Arc::new(MemoryEventBus::new(1024)),
            Arc::new(CsvSink::new(io::sink())),
            Arc::new(MonotonicClock::new()),
        )
        .unwrap();
        let tasks = service.subscribe().unwrap();
        for i in 0..SENT {
            let request = PedalPositionRequest { position: i as f32 };
            service
                .session()
                .send(envelope_for(&request, Source::Model.stamp()).unwrap())
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let written = std::fs::read_to_string(&tap_path)
                    .map(|text| text.matches('\n').count())
                    .unwrap_or(0);
                if written >= SENT {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("tap never caught up");
        for task in tasks {
            task.abort();
        }

        let replay_bus = MemoryEventBus::new(SENT);
        assert_eq!(replay_file(&tap_path, &replay_bus).await.unwrap(), SENT);
        let positions: Vec<f32> = replay_bus
            .snapshot()
            .iter()
            .map(|envelope| SignalKind::Pedal.decode(envelope).unwrap())
            .collect();
        let expected: Vec<f32> = (0..SENT).map(|i| i as f32).collect();
        assert_eq!(positions, expected);
    }

    #[test]
    fn sink_failure_stops_the_service() {
        struct Closed;
        impl ReportSink for Closed {
            fn write_header(&self) -> crate::error::Result<()> {
                Ok(())
            }
            fn emit(&self, _report: &crate::report::Report) -> crate::error::Result<()> {
                Err(crate::error::ComparatorError::Sink(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "stdout closed",
                )))
            }
        }
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let service = ComparisonService::new(
                ComparatorConfig::new(1, 100.0),
                Arc::new(MemoryEventBus::new(4)),
                Arc::new(Closed),
                Arc::new(MonotonicClock::new()),
            )
            .unwrap();
            let err = service.run(std::future::pending()).await.unwrap_err();
            assert!(format!("{err:#}").contains("stdout closed"));
        });
    }
}
