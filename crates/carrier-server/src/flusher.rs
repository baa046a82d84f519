//! Periodic flush workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

use crate::registry::{Registry, shard_of};

/// Spawns `flushers` tasks ticking every `period`.
///
/// Worker `i` owns the streams whose ingest shard, out of `shards`, is
/// congruent to `i` modulo `flushers`.
pub fn spawn(
    registry: &Arc<Registry>,
    shards: usize,
    flushers: usize,
    period: Duration,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..flushers)
        .map(|worker| {
            let registry = Arc::clone(registry);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let registry = Arc::clone(&registry);
                            let task = tokio::task::spawn_blocking(move || {
                                flush_share(&registry, worker, shards, flushers)
                            });
                            if let Err(e) = task.await {
                                warn!(worker, error = %e, "flush task failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!(worker, "flush worker stopped");
            })
        })
        .collect()
}

/// Runs one flush tick over the streams owned by `worker`.
///
/// Returns the number of streams visited.
pub fn flush_share(registry: &Registry, worker: usize, shards: usize, flushers: usize) -> usize {
    let mut visited = 0;
    for (id, bufferer) in registry.streams() {
        if shard_of(&id, shards) % flushers.max(1) != worker {
            continue;
        }
        visited += 1;
        if let Err(e) = bufferer.lock().flush() {
            warn!(stream = %id, error = %e, "periodic flush failed");
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::BuffererFactory;
    use carrier_buffer::StreamId;
    use carrier_config::Config;

    fn registry(root: &std::path::Path) -> Registry {
        let mut config = Config::default();
        config.files.root = root.to_path_buf();
        config.files.name = "${name}.log".to_string();
        Registry::new(BuffererFactory::from_config(&config).expect("factory"))
    }

    #[test]
    fn every_stream_has_exactly_one_flusher() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let registry = registry(tmp.path());
        for i in 0..20 {
            let id = StreamId::new("", format!("s{i}"), "").expect("id");
            registry.get_or_create(&id).expect("create");
        }
        let total: usize = (0..3).map(|worker| flush_share(&registry, worker, 16, 3)).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn flush_tick_writes_buffered_data() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let registry = registry(tmp.path());
        let id = StreamId::new("", "app", "").expect("id");
        let bufferer = registry.get_or_create(&id).expect("create");
        bufferer.lock().write(b"hello\n").expect("write");

        assert_eq!(flush_share(&registry, 0, 1, 1), 1);
        let content = std::fs::read_to_string(tmp.path().join("app.log")).expect("read");
        assert_eq!(content, "hello\n");
    }

    #[tokio::test]
    async fn workers_stop_on_shutdown() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(registry(tmp.path()));
        let (tx, rx) = watch::channel(false);
        let handles = spawn(&registry, 4, 2, Duration::from_secs(30), &rx);
        tx.send(true).expect("signal");
        for handle in handles {
            handle.await.expect("worker");
        }
    }
}
