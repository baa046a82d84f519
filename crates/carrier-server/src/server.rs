//! Server lifecycle: restore, run, checkpoint.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use carrier_buffer::{BufferError, StateDecoder, StreamId};
use carrier_config::Config;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::checkpoint::Checkpoint;
use crate::error::{Result, ServerError};
use crate::factory::BuffererFactory;
use crate::flusher;
use crate::ingest::{Ingest, Record};
use crate::registry::Registry;
use crate::rotation::{Rotation, RotationSettings};

/// A running carrier.
#[derive(Debug)]
pub struct Server {
    config: Config,
    registry: Arc<Registry>,
    ingest: Ingest,
    rotation: Rotation,
    shutdown: watch::Sender<bool>,
    ingest_workers: Vec<JoinHandle<()>>,
    flush_workers: Vec<JoinHandle<()>>,
    rotation_workers: Vec<JoinHandle<()>>,
}

impl Server {
    /// Restores the checkpoint, then starts every worker.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the checkpoint exists but can not be restored; no worker is
    /// started then.
    pub fn start(config: Config) -> Result<Self> {
        let registry = Arc::new(Registry::new(BuffererFactory::from_config(&config)?));
        let restored = restore(&registry, &config.state_file)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (ingest, ingest_workers) =
            Ingest::start(&registry, config.workers.ingest, config.buffers.ingest_queue);
        let flush_workers = flusher::spawn(
            &registry,
            config.workers.ingest,
            config.workers.flushers,
            config.flush_interval(),
            &shutdown_rx,
        );
        let (rotation, rotation_workers) = Rotation::start(
            &registry,
            RotationSettings {
                method: config.logrotate.method,
                interval: config.rotation_interval(),
                rotators: config.workers.rotators,
                queue: config.buffers.rotation_queue,
                notifier: config.notifier(),
            },
            &shutdown_rx,
        );

        info!(
            root = %config.files.root.display(),
            compression = %config.compression.method,
            rotation = %config.logrotate.method,
            restored,
            "carrier started"
        );
        Ok(Self {
            config,
            registry,
            ingest,
            rotation,
            shutdown,
            ingest_workers,
            flush_workers,
            rotation_workers,
        })
    }

    /// Cloneable handle for submitting records and rotation requests.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            ingest: self.ingest.clone(),
            rotation: self.rotation.clone(),
        }
    }

    /// Streams currently registered.
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Stops all workers, applies every queued record, and writes the
    /// checkpoint. Buffered data is not flushed: it is carried by the
    /// checkpoint into the next run.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.ingest.close();
        self.rotation.close();
        for worker in self
            .flush_workers
            .into_iter()
            .chain(self.ingest_workers)
            .chain(self.rotation_workers)
        {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker terminated abnormally");
            }
        }

        let registry = Arc::clone(&self.registry);
        let state_file = self.config.state_file.clone();
        let streams = tokio::task::spawn_blocking(move || -> Result<usize> {
            let checkpoint = Checkpoint::capture(&registry)?;
            checkpoint.write_atomic(&state_file)?;
            Ok(checkpoint.streams.len())
        })
        .await
        .map_err(|e| ServerError::Io(std::io::Error::other(e)))??;

        info!(streams, state_file = %self.config.state_file.display(), "carrier stopped");
        Ok(())
    }
}

/// Submits work to a running [`Server`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    ingest: Ingest,
    rotation: Rotation,
}

impl ServerHandle {
    /// Queues `data` for `stream`.
    pub async fn write(&self, stream: StreamId, data: impl Into<Vec<u8>>) -> Result<()> {
        self.ingest.send(Record::new(stream, data)).await
    }

    /// Queues `data` from a thread outside the runtime.
    pub fn blocking_write(&self, stream: StreamId, data: impl Into<Vec<u8>>) -> Result<()> {
        self.ingest.blocking_send(Record::new(stream, data))
    }

    /// Requests a guided rotation of `stream`.
    pub async fn rotate(&self, stream: StreamId) -> Result<()> {
        self.rotation.request(stream).await
    }
}

/// Restores the checkpoint at `path` into `registry`, then removes it.
///
/// Returns the number of restored streams; a missing checkpoint restores
/// nothing.
pub fn restore(registry: &Registry, path: &Path) -> Result<usize> {
    let Some(restored) = load(registry, path)? else {
        return Ok(0);
    };
    fs::remove_file(path)?;
    info!(streams = restored, path = %path.display(), "restored checkpoint");
    Ok(restored)
}

/// Restores every stream of the checkpoint at `path` into `registry`.
///
/// Nothing is registered unless every stream restores cleanly.
fn load(registry: &Registry, path: &Path) -> Result<Option<usize>> {
    let Some(checkpoint) = Checkpoint::read(path)? else {
        return Ok(None);
    };

    let mut bufferers = Vec::with_capacity(checkpoint.streams.len());
    for entry in checkpoint.streams {
        let wrap = |source: BufferError| ServerError::Restore {
            stream: entry.id.to_string(),
            source,
        };
        let mut bufferer = registry.factory().build_for_restore(entry.kind, entry.id.clone())?;
        let mut dec = StateDecoder::new(&entry.state);
        bufferer.restore_state(&mut dec).map_err(wrap)?;
        dec.finish().map_err(|e| wrap(e.into()))?;
        if bufferer.id() != &entry.id {
            return Err(wrap(BufferError::InvalidStream(format!(
                "state belongs to {}",
                bufferer.id()
            ))));
        }
        bufferers.push(bufferer);
    }

    let restored = bufferers.len();
    for bufferer in bufferers {
        registry.insert(bufferer);
    }
    Ok(Some(restored))
}

/// Restores the checkpoint and closes every stream, writing all buffered
/// data to its file.
///
/// Returns the number of streams drained. Every stream is attempted; the
/// first failure is returned and the checkpoint is kept.
pub fn drain(config: &Config) -> Result<usize> {
    let registry = Registry::new(BuffererFactory::from_config(config)?);
    let Some(restored) = load(&registry, &config.state_file)? else {
        return Ok(0);
    };

    let mut first_error = None;
    for (id, bufferer) in registry.streams() {
        if let Err(e) = bufferer.lock().close() {
            warn!(stream = %id, error = %e, "drain failed");
            first_error.get_or_insert(e);
        }
    }
    if let Some(e) = first_error {
        return Err(e.into());
    }
    fs::remove_file(&config.state_file)?;
    info!(streams = restored, "drained checkpoint");
    Ok(restored)
}
