use std::{
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use actuation_comparator::{
    ComparatorConfig, ComparisonService, ConfigFile, CsvSink, MonotonicClock,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{error::ErrorKind, Parser};
use shared_event_bus::{replay_file, replay_reader, Envelope, EnvelopePublisher, MemoryEventBus};
use tokio::{io::BufReader, runtime::Runtime, sync::Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "actuation-compare",
    version,
    about = "Reports windowed means of recorded vs model steering and pedal requests as CSV"
)]
struct Cli {
    /// Conference id of the session to join.
    #[arg(long)]
    cid: Option<u16>,
    /// Report frequency in Hz.
    #[arg(long)]
    freq: Option<f32>,
    /// TOML file with defaults for every other flag.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Samples retained per window.
    #[arg(long)]
    capacity: Option<usize>,
    /// Depth of the in-process envelope bus.
    #[arg(long)]
    bus_capacity: Option<usize>,
    /// JSON-lines envelope file to feed into the session (`-` for stdin).
    ///
    /// Without `--realtime` the feed runs as fast as the subscribers drain the bus.
    #[arg(long)]
    replay: Option<String>,
    /// Pace the replay by the envelopes' send times instead of as fast as possible.
    #[arg(long, requires = "replay")]
    realtime: bool,
    /// Record every envelope seen on the session as JSON lines.
    #[arg(long)]
    tap: Option<PathBuf>,
    /// Structured JSON-lines log file.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration: Option<f64>,
}

impl Cli {
    fn resolve(&self) -> Result<ComparatorConfig> {
        let mut file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        file.cid = self.cid.or(file.cid);
        file.freq_hz = self.freq.or(file.freq_hz);
        file.window_capacity = self.capacity.or(file.window_capacity);
        file.bus_capacity = self.bus_capacity.or(file.bus_capacity);
        file.log_path = self.log.clone().or(file.log_path);
        file.tap_path = self.tap.clone().or(file.tap_path);
        Ok(file.into_config()?)
    }

    fn run_for(&self) -> Result<Option<Duration>> {
        self.duration
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("invalid duration {secs}"))
            })
            .transpose()
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            eprintln!("Bad arguments: {err}");
            return ExitCode::from(1);
        }
    };
    init_tracing();

    let (config, run_for) = match cli.resolve().and_then(|config| Ok((config, cli.run_for()?))) {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("Bad arguments: {err:#}");
            return ExitCode::from(1);
        }
    };

    match run(&cli, config, run_for) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "actuation-compare failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: &Cli, config: ComparatorConfig, run_for: Option<Duration>) -> Result<()> {
    let runtime = Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(async {
        let bus = Arc::new(MemoryEventBus::new(config.bus_capacity));
        let service = ComparisonService::new(
            config,
            Arc::clone(&bus),
            Arc::new(CsvSink::stdout()),
            Arc::new(MonotonicClock::new()),
        )?;
        let tasks = service.subscribe()?;

        let feeder = cli.replay.clone().map(|source| {
            let draining: Arc<dyn EnvelopePublisher> =
                Arc::new(DrainingPublisher::new(bus.clone()));
            let publisher = if cli.realtime {
                Arc::new(PacedPublisher::new(draining))
            } else {
                draining
            };
            tokio::spawn(async move {
                match feed(&source, publisher.as_ref()).await {
                    Ok(count) => info!(source = %source, count, "replay finished"),
                    Err(err) => error!(source = %source, error = %format!("{err:#}"), "replay failed"),
                }
            })
        });

        let result = service.serve(tasks, shutdown_signal(run_for)).await;
        if let Some(feeder) = feeder {
            feeder.abort();
        }
        result
    })
}

async fn feed(source: &str, publisher: &dyn EnvelopePublisher) -> Result<usize> {
    if source == "-" {
        replay_reader(BufReader::new(tokio::io::stdin()), publisher).await
    } else {
        replay_file(source, publisher).await
    }
}

async fn shutdown_signal(run_for: Option<Duration>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    match run_for {
        Some(limit) => {
            tokio::select! {
                () = ctrl_c => {}
                () = tokio::time::sleep(limit) => {}
            }
        }
        None => ctrl_c.await,
    }
}

/// Publishes onto the bus only once its subscribers have room, so a fast replay never lags them.
struct DrainingPublisher {
    bus: Arc<MemoryEventBus>,
}

impl DrainingPublisher {
    const fn new(bus: Arc<MemoryEventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl EnvelopePublisher for DrainingPublisher {
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        while self.bus.queued() >= self.bus.capacity() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        self.bus.publish(envelope).await
    }
}

const DRAIN_POLL: Duration = Duration::from_millis(1);

/// Forwards envelopes, sleeping between them by the gap in their send times.
struct PacedPublisher {
    inner: Arc<dyn EnvelopePublisher>,
    last_sent: Mutex<Option<DateTime<Utc>>>,
}

impl PacedPublisher {
    fn new(inner: Arc<dyn EnvelopePublisher>) -> Self {
        Self {
            inner,
            last_sent: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EnvelopePublisher for PacedPublisher {
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        let mut last_sent = self.last_sent.lock().await;
        if let Some(previous) = *last_sent {
            // Out-of-order send times are published immediately.
            if let Ok(gap) = (envelope.sent - previous).to_std() {
                tokio::time::sleep(gap).await;
            }
        }
        *last_sent = Some(envelope.sent);
        self.inner.publish(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flags_override_required_values() {
        let cli = Cli::try_parse_from(["actuation-compare", "--cid", "111", "--freq", "5"]).unwrap();
        let config = cli.resolve().unwrap();
        assert_eq!(config.cid, 111);
        assert!((config.freq_hz - 5.0).abs() < f32::EPSILON);
        assert_eq!(config.window_capacity, 10);
    }

    #[test]
    fn missing_cid_is_a_bad_argument() {
        let cli = Cli::try_parse_from(["actuation-compare", "--freq", "5"]).unwrap();
        assert!(cli.resolve().is_err());
    }

    #[test]
    fn zero_frequency_is_rejected() {
        let cli = Cli::try_parse_from(["actuation-compare", "--cid", "1", "--freq", "0"]).unwrap();
        assert!(cli.resolve().is_err());
    }

    #[test]
    fn realtime_requires_replay() {
        let err = Cli::try_parse_from(["actuation-compare", "--cid", "1", "--freq", "1", "--realtime"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let cli = Cli::try_parse_from([
            "actuation-compare",
            "--cid",
            "1",
            "--freq",
            "1",
            "--duration=-2",
        ])
        .unwrap();
        assert!(cli.run_for().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fast_replay_never_outruns_subscribers() {
        let bus = Arc::new(MemoryEventBus::new(2));
        let mut rx = bus.receiver();
        let publisher = DrainingPublisher::new(Arc::clone(&bus));
        let feeder = tokio::spawn(async move {
            for stamp in 0..20 {
                publisher
                    .publish(Envelope::new(1090, stamp, json!({ "ground_steering": 0.0 })))
                    .await
                    .unwrap();
            }
        });
        let mut stamps = Vec::new();
        while stamps.len() < 20 {
            let envelope = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            stamps.push(envelope.sender_stamp);
        }
        feeder.await.unwrap();
        assert_eq!(stamps, (0..20).collect::<Vec<u32>>());
    }

    #[tokio::test(start_paused = true)]
    async fn paced_publisher_waits_for_recorded_gaps() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let paced = PacedPublisher::new(bus.clone());
        let start = Utc::now();
        let mut first = Envelope::new(1090, 0, json!({ "ground_steering": 0.1 }));
        first.sent = start;
        let mut second = first.clone();
        second.sent = start + chrono::Duration::milliseconds(250);

        let before = tokio::time::Instant::now();
        paced.publish(first).await.unwrap();
        paced.publish(second).await.unwrap();
        assert!(before.elapsed() >= Duration::from_millis(250));
        assert_eq!(bus.snapshot().len(), 2);
    }
}
