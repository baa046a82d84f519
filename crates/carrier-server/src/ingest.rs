//! Sharded ingestion.
//!
//! Records are routed to one of `workers.ingest` bounded queues by the hash
//! of their stream, so the records of one stream are applied in the order
//! they were sent. A full queue blocks the sender.
//!
//! A record that the stream can not take, because its sink is failing, is
//! retried with backoff until it is accepted. The shard stops draining its
//! queue meanwhile, which pushes back on the senders.

use std::sync::Arc;
use std::time::Duration;

use carrier_buffer::StreamId;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ServerError};
use crate::registry::{Registry, shard_of};

/// Pause after the first failed write of a record.
const RETRY_INITIAL: Duration = Duration::from_millis(10);

/// Longest pause between write attempts.
const RETRY_MAX: Duration = Duration::from_secs(1);

/// A chunk of data for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Destination stream.
    pub stream: StreamId,
    /// Bytes to append.
    pub data: Vec<u8>,
}

impl Record {
    /// Creates a record.
    pub fn new(stream: StreamId, data: impl Into<Vec<u8>>) -> Self {
        Self {
            stream,
            data: data.into(),
        }
    }
}

/// Sending side of the ingest shards.
#[derive(Debug, Clone)]
pub struct Ingest {
    senders: Arc<RwLock<Option<Vec<mpsc::Sender<Record>>>>>,
}

impl Ingest {
    /// Spawns one blocking worker per shard.
    pub fn start(registry: &Arc<Registry>, shards: usize, capacity: usize) -> (Self, Vec<JoinHandle<()>>) {
        let mut senders = Vec::with_capacity(shards);
        let mut workers = Vec::with_capacity(shards);
        for shard in 0..shards {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            let registry = Arc::clone(registry);
            workers.push(tokio::task::spawn_blocking(move || run_shard(shard, &registry, rx)));
        }
        let ingest = Self {
            senders: Arc::new(RwLock::new(Some(senders))),
        };
        (ingest, workers)
    }

    /// Queues a record, waiting while its shard is full.
    pub async fn send(&self, record: Record) -> Result<()> {
        let sender = self.sender_for(&record.stream)?;
        sender.send(record).await.map_err(|_| ServerError::ShuttingDown)
    }

    /// Queues a record from outside the runtime, blocking while its shard is full.
    pub fn blocking_send(&self, record: Record) -> Result<()> {
        let sender = self.sender_for(&record.stream)?;
        sender.blocking_send(record).map_err(|_| ServerError::ShuttingDown)
    }

    /// Stops accepting records. Workers exit once their queues are drained.
    pub fn close(&self) {
        self.senders.write().take();
    }

    fn sender_for(&self, stream: &StreamId) -> Result<mpsc::Sender<Record>> {
        let guard = self.senders.read();
        let senders = guard.as_ref().ok_or(ServerError::ShuttingDown)?;
        senders
            .get(shard_of(stream, senders.len()))
            .cloned()
            .ok_or(ServerError::ShuttingDown)
    }
}

fn run_shard(shard: usize, registry: &Registry, mut rx: mpsc::Receiver<Record>) {
    debug!(shard, "ingest worker started");
    while let Some(record) = rx.blocking_recv() {
        apply(registry, &record);
    }
    debug!(shard, "ingest worker stopped");
}

fn apply(registry: &Registry, record: &Record) {
    let bufferer = match registry.get_or_create(&record.stream) {
        Ok(bufferer) => bufferer,
        Err(e) => {
            error!(stream = %record.stream, error = %e, "dropping record: stream unavailable");
            return;
        }
    };

    let mut rest = record.data.as_slice();
    let mut backoff = RETRY_INITIAL;
    let mut attempt: u32 = 1;
    while !rest.is_empty() {
        // The lock is released between attempts so flushes and rotations of
        // the stream are not starved.
        let mut guard = bufferer.lock();
        match guard.write(rest) {
            Ok(n) => {
                rest = &rest[n..];
                if let Err(e) = guard.post_write() {
                    warn!(stream = %record.stream, error = %e, "post-write flush failed");
                }
            }
            Err(e) => {
                drop(guard);
                warn!(
                    stream = %record.stream,
                    bytes = rest.len(),
                    attempt,
                    retry_ms = backoff.as_millis() as u64,
                    error = %e,
                    "write failed, retrying"
                );
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(RETRY_MAX);
                attempt += 1;
            }
        }
    }
    if attempt > 1 {
        info!(stream = %record.stream, attempts = attempt, "write recovered");
    }
}
