//! Stream registry.
//!
//! Every stream owns one bufferer behind its own mutex. Workers lock a
//! single stream at a time, so a slow disk on one stream never blocks the
//! others.

use std::collections::HashMap;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use carrier_buffer::{Bufferer, StreamId};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::Result;
use crate::factory::BuffererFactory;

/// A bufferer shared between workers.
pub type SharedBufferer = Arc<Mutex<Box<dyn Bufferer>>>;

/// Maps stream identifiers to their bufferers.
#[derive(Debug)]
pub struct Registry {
    factory: BuffererFactory,
    streams: RwLock<HashMap<StreamId, SharedBufferer>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new(factory: BuffererFactory) -> Self {
        Self {
            factory,
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Factory used for new streams.
    pub const fn factory(&self) -> &BuffererFactory {
        &self.factory
    }

    /// Returns the bufferer of `id`, creating it on first use.
    pub fn get_or_create(&self, id: &StreamId) -> Result<SharedBufferer> {
        if let Some(existing) = self.get(id) {
            return Ok(existing);
        }

        let mut streams = self.streams.write();
        match streams.entry(id.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let bufferer = self.factory.build(id.clone())?;
                debug!(stream = %id, kind = %bufferer.kind(), "created stream");
                Ok(Arc::clone(entry.insert(Arc::new(Mutex::new(bufferer)))))
            }
        }
    }

    /// Returns the bufferer of `id` if the stream exists.
    pub fn get(&self, id: &StreamId) -> Option<SharedBufferer> {
        self.streams.read().get(id).map(Arc::clone)
    }

    /// Registers a restored bufferer, replacing any previous one.
    pub fn insert(&self, bufferer: Box<dyn Bufferer>) {
        let id = bufferer.id().clone();
        self.streams.write().insert(id, Arc::new(Mutex::new(bufferer)));
    }

    /// All streams, sorted by identifier.
    pub fn streams(&self) -> Vec<(StreamId, SharedBufferer)> {
        let mut out: Vec<_> = self
            .streams
            .read()
            .iter()
            .map(|(id, bufferer)| (id.clone(), Arc::clone(bufferer)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    /// Whether no stream has been registered.
    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}

/// Shard a stream belongs to, out of `shards`.
pub fn shard_of(id: &StreamId, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}
