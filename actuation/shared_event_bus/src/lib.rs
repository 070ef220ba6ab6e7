#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Envelope transport: an in-process broadcast bus, a JSON-lines file tap and replay.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::broadcast,
};

/// Transport frame carrying one encoded message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type identifier.
    pub data_type: i32,
    /// Identity of the producer that sent the message.
    #[serde(default)]
    pub sender_stamp: u32,
    /// Time the producer sent the message.
    pub sent: DateTime<Utc>,
    /// Encoded message body.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Creates an envelope stamped with the current time.
    #[must_use]
    pub fn new(data_type: i32, sender_stamp: u32, payload: serde_json::Value) -> Self {
        Self {
            data_type,
            sender_stamp,
            sent: Utc::now(),
            payload,
        }
    }
}

/// Envelope publisher interface.
#[async_trait]
pub trait EnvelopePublisher: Send + Sync {
    /// Publishes an envelope to the transport.
    async fn publish(&self, envelope: Envelope) -> Result<()>;
}

/// Envelope subscriber interface.
#[async_trait]
pub trait EnvelopeSubscriber: Send + Sync {
    /// Returns a receiver that observes every envelope published after the call.
    async fn subscribe(&self) -> Result<broadcast::Receiver<Envelope>>;
}

/// In-memory broadcast bus with a bounded backlog of recent envelopes.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<Envelope>,
    capacity: usize,
    backlog: Arc<Mutex<VecDeque<Envelope>>>,
}

impl MemoryEventBus {
    /// Creates a new bus; `capacity` bounds both the channel and the backlog.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Snapshot of the most recent envelopes, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Envelope> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Maximum number of envelopes a receiver may fall behind before it lags.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Envelopes published but not yet seen by every current receiver.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    /// Synchronous subscription, usable outside an async context.
    #[must_use]
    pub fn receiver(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

/// File-backed publisher appending envelopes as JSON lines.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates a publisher that appends JSON lines to the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Path of the JSON-lines file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EnvelopePublisher for MemoryEventBus {
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(envelope.clone());
        }
        // No receivers is not a failure: nobody has subscribed to this session yet.
        let _ = self.sender.send(envelope);
        Ok(())
    }
}

#[async_trait]
impl EnvelopeSubscriber for MemoryEventBus {
    async fn subscribe(&self) -> Result<broadcast::Receiver<Envelope>> {
        Ok(self.sender.subscribe())
    }
}

#[async_trait]
impl EnvelopePublisher for FileEventPublisher {
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening tap {}", self.path.display()))?;
        let mut data = serde_json::to_vec(&envelope)?;
        data.push(b'\n');
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Publishes every envelope of a JSON-lines stream in order, returning how many were sent.
pub async fn replay_reader<R>(reader: R, publisher: &dyn EnvelopePublisher) -> Result<usize>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    let mut published = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let envelope: Envelope = serde_json::from_str(&line)
            .with_context(|| format!("line {line_no}: malformed envelope"))?;
        publisher.publish(envelope).await?;
        published += 1;
    }
    Ok(published)
}

/// Replays a JSON-lines envelope file written by [`FileEventPublisher`].
pub async fn replay_file(path: impl AsRef<Path>, publisher: &dyn EnvelopePublisher) -> Result<usize> {
    let path = path.as_ref();
    let file = File::open(path)
        .await
        .with_context(|| format!("opening replay {}", path.display()))?;
    replay_reader(BufReader::new(file), publisher)
        .await
        .with_context(|| format!("replaying {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use tokio::runtime::Runtime;

    fn steering(stamp: u32, value: f32) -> Envelope {
        Envelope::new(1090, stamp, json!({ "ground_steering": value }))
    }

    #[test]
    fn publishes_and_receives() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(16);
            let mut rx = bus.subscribe().await.unwrap();
            bus.publish(steering(0, 0.5)).await.unwrap();
            let envelope = rx.recv().await.unwrap();
            assert_eq!(envelope.data_type, 1090);
            assert_eq!(envelope.sender_stamp, 0);
        });
    }

    #[test]
    fn backlog_is_bounded_by_capacity() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(3);
            for stamp in 0..5 {
                bus.publish(steering(stamp, 0.1)).await.unwrap();
            }
            let stamps: Vec<u32> = bus.snapshot().iter().map(|e| e.sender_stamp).collect();
            assert_eq!(stamps, vec![2, 3, 4]);
        });
    }

    #[test]
    fn queued_counts_unseen_envelopes() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(4);
            assert_eq!(bus.capacity(), 4);
            let mut rx = bus.receiver();
            bus.publish(steering(0, 0.1)).await.unwrap();
            bus.publish(steering(1, 0.2)).await.unwrap();
            assert_eq!(bus.queued(), 2);
            rx.recv().await.unwrap();
            rx.recv().await.unwrap();
            assert_eq!(bus.queued(), 0);
        });
    }

    #[test]
    fn file_tap_round_trips_through_replay() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempdir().unwrap();
            let path = dir.path().join("tap/envelopes.jsonl");
            let tap = FileEventPublisher::new(&path).unwrap();
            assert_eq!(tap.path(), path.as_path());
            tap.publish(steering(0, 0.25)).await.unwrap();
            tap.publish(steering(1, -0.25)).await.unwrap();

            let bus = MemoryEventBus::new(8);
            let count = replay_file(&path, &bus).await.unwrap();
            assert_eq!(count, 2);
            let replayed = bus.snapshot();
            assert_eq!(replayed[1].sender_stamp, 1);
            assert_eq!(replayed[1].payload["ground_steering"], json!(-0.25));
        });
    }

    #[test]
    fn replay_reports_malformed_line() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let input = b"\n{\"data_type\":1086,\"sent\":\"2025-01-01T00:00:00Z\"}\nnot json\n";
            let bus = MemoryEventBus::new(8);
            let err = replay_reader(&input[..], &bus).await.unwrap_err();
            assert!(format!("{err:#}").contains("line 3"));
            assert_eq!(bus.snapshot().len(), 1);
        });
    }
}
