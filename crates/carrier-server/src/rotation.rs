//! Periodic and guided rotation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use carrier_buffer::{Notifier, StreamId};
use carrier_config::RotationMethod;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::registry::Registry;

/// Rotation settings taken from the configuration.
#[derive(Debug, Clone)]
pub struct RotationSettings {
    /// Accepted triggers.
    pub method: RotationMethod,
    /// Period of the periodic trigger.
    pub interval: Duration,
    /// Guided rotation workers.
    pub rotators: usize,
    /// Guided requests queued before senders block.
    pub queue: usize,
    /// Receives the paths rotated files were renamed to.
    pub notifier: Notifier,
}

/// Entry point for guided rotation requests.
#[derive(Debug, Clone)]
pub struct Rotation {
    method: RotationMethod,
    requests: Arc<RwLock<Option<mpsc::Sender<StreamId>>>>,
}

impl Rotation {
    /// Spawns the periodic task and the guided workers the method allows.
    pub fn start(
        registry: &Arc<Registry>,
        settings: RotationSettings,
        shutdown: &watch::Receiver<bool>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let notifier = Arc::new(settings.notifier);
        let mut workers = Vec::new();

        if settings.method.allows_periodic() {
            workers.push(spawn_periodic(
                Arc::clone(registry),
                Arc::clone(&notifier),
                settings.interval,
                shutdown.clone(),
            ));
        }

        let mut sender = None;
        if settings.method.allows_guided() {
            let (tx, rx) = mpsc::channel(settings.queue);
            let rx = Arc::new(Mutex::new(rx));
            for worker in 0..settings.rotators {
                let registry = Arc::clone(registry);
                let notifier = Arc::clone(&notifier);
                let rx = Arc::clone(&rx);
                workers.push(tokio::task::spawn_blocking(move || {
                    run_rotator(worker, &registry, &notifier, &rx);
                }));
            }
            sender = Some(tx);
        }

        let rotation = Self {
            method: settings.method,
            requests: Arc::new(RwLock::new(sender)),
        };
        (rotation, workers)
    }

    /// Queues a guided rotation of `stream`.
    ///
    /// Rotating a stream that does not exist is a no-op.
    pub async fn request(&self, stream: StreamId) -> Result<()> {
        if !self.method.allows_guided() {
            return Err(ServerError::RotationNotAllowed(self.method));
        }
        let sender = self.requests.read().clone().ok_or(ServerError::ShuttingDown)?;
        sender.send(stream).await.map_err(|_| ServerError::ShuttingDown)
    }

    /// Stops accepting requests. Workers exit once the queue is drained.
    pub fn close(&self) {
        self.requests.write().take();
    }
}

fn spawn_periodic(
    registry: Arc<Registry>,
    notifier: Arc<Notifier>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let registry = Arc::clone(&registry);
                    let notifier = Arc::clone(&notifier);
                    let task = tokio::task::spawn_blocking(move || rotate_all(&registry, &notifier));
                    match task.await {
                        Ok(rotated) => info!(rotated, "periodic rotation done"),
                        Err(e) => warn!(error = %e, "periodic rotation task failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("periodic rotation stopped");
    })
}

fn run_rotator(
    worker: usize,
    registry: &Registry,
    notifier: &Notifier,
    rx: &Mutex<mpsc::Receiver<StreamId>>,
) {
    loop {
        let next = rx.lock().blocking_recv();
        let Some(id) = next else { break };
        rotate_stream(registry, &id, notifier);
    }
    debug!(worker, "rotation worker stopped");
}

/// Rotates one stream; failures are logged and leave the old file active.
///
/// Returns the path the rotated file was renamed to.
pub fn rotate_stream(registry: &Registry, id: &StreamId, notifier: &Notifier) -> Option<PathBuf> {
    let Some(bufferer) = registry.get(id) else {
        debug!(stream = %id, "rotation requested for unknown stream");
        return None;
    };
    let result = bufferer.lock().rotate(notifier);
    match result {
        Ok(Some(rotated)) => {
            debug!(stream = %id, path = %rotated.display(), "rotated");
            Some(rotated)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(stream = %id, error = %e, "rotation failed");
            None
        }
    }
}

/// Rotates every stream, returning how many files were rotated.
pub fn rotate_all(registry: &Registry, notifier: &Notifier) -> usize {
    registry
        .streams()
        .iter()
        .filter_map(|(id, _)| rotate_stream(registry, id, notifier))
        .count()
}
