//! Flush-worthiness bookkeeping shared by the buffering layers.

use crate::codec::{FieldKind, FieldSpec, LayerDecoder, LayerEncoder, LayerSchema, StateDecoder, StateEncoder};
use crate::error::SnapshotError;

/// Snapshot fields of a [`FlushTracker`], appended to the owning layer.
pub(crate) const TRACKER_FIELDS: [FieldSpec; 5] = [
    FieldSpec::new("inserts", FieldKind::U32),
    FieldSpec::new("flushed", FieldKind::U32),
    FieldSpec::new("prev_flushed", FieldKind::U32),
    FieldSpec::new("checked", FieldKind::U32),
    FieldSpec::new("armed", FieldKind::Bool),
];

/// Decides whether a periodic flush tick should perform I/O.
///
/// A tick is worth flushing when data was inserted that is neither flushed
/// nor already reported by an earlier tick, and no flush happened since the
/// previous tick. Counters only move forward; they are replaced wholesale on
/// restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushTracker {
    /// Accepted inserts, incremented once per buffered write.
    inserts: u32,
    /// `inserts` at the last successful flush.
    flushed: u32,
    /// `flushed` as observed by the previous check.
    prev_flushed: u32,
    /// `inserts` at the last check that answered true.
    checked: u32,
    /// Cleared by an overflow-driven flush, re-armed by every check.
    armed: bool,
}

impl Default for FlushTracker {
    fn default() -> Self {
        Self {
            inserts: 0,
            flushed: 0,
            prev_flushed: 0,
            checked: 0,
            armed: true,
        }
    }
}

impl FlushTracker {
    /// Creates a tracker with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered inserts accepted so far.
    #[must_use]
    pub const fn inserts(&self) -> u32 {
        self.inserts
    }

    /// Records one accepted write.
    pub fn record_insert(&mut self) {
        self.inserts = self.inserts.wrapping_add(1);
    }

    /// Records a successful flush of everything inserted so far.
    pub fn record_flush(&mut self) {
        self.flushed = self.inserts;
    }

    /// Records a failed flush so the next check reports the data again.
    pub fn record_flush_failure(&mut self) {
        self.checked = self.flushed;
    }

    /// Marks the upcoming check as not worth it, after an overflow flush.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Answers whether a periodic flush is worth doing now, consuming the
    /// per-check state.
    pub fn check(&mut self) -> bool {
        let worth = self.armed
            && self.prev_flushed == self.flushed
            && self.inserts != self.flushed
            && self.inserts != self.checked;
        if worth {
            self.checked = self.inserts;
        }
        self.prev_flushed = self.flushed;
        self.armed = true;
        worth
    }

    pub(crate) fn dump(&self, layer: &mut LayerEncoder<'_>) -> Result<(), SnapshotError> {
        layer.u32("inserts", self.inserts)?;
        layer.u32("flushed", self.flushed)?;
        layer.u32("prev_flushed", self.prev_flushed)?;
        layer.u32("checked", self.checked)?;
        layer.bool("armed", self.armed)
    }

    pub(crate) fn restore(layer: &mut LayerDecoder<'_, '_>) -> Result<Self, SnapshotError> {
        Ok(Self {
            inserts: layer.u32("inserts")?,
            flushed: layer.u32("flushed")?,
            prev_flushed: layer.u32("prev_flushed")?,
            checked: layer.u32("checked")?,
            armed: layer.bool("armed")?,
        })
    }

    #[cfg(test)]
    pub(crate) const fn with_counters(inserts: u32, flushed: u32) -> Self {
        Self {
            inserts,
            flushed,
            prev_flushed: flushed,
            checked: flushed,
            armed: true,
        }
    }
}

/// Persisted state of a size-bounded buffer: capacity, contents and counters.
///
/// Layer schemas using it list `bufsize`, `buffer`, then [`TRACKER_FIELDS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BufferState {
    pub(crate) bufsize: usize,
    pub(crate) buffer: Vec<u8>,
    pub(crate) tracker: FlushTracker,
}

impl BufferState {
    pub(crate) fn dump(
        enc: &mut StateEncoder,
        schema: &'static LayerSchema,
        bufsize: usize,
        buffer: &[u8],
        tracker: &FlushTracker,
    ) -> Result<(), SnapshotError> {
        let mut layer = enc.layer(schema);
        let bufsize = u32::try_from(bufsize).map_err(|_| SnapshotError::InvalidValue {
            layer: schema.layer,
            field: "bufsize",
            reason: format!("{bufsize} does not fit in 32 bits"),
        })?;
        layer.u32("bufsize", bufsize)?;
        layer.bytes("buffer", buffer)?;
        tracker.dump(&mut layer)?;
        layer.finish()
    }

    pub(crate) fn decode(dec: &mut StateDecoder<'_>, schema: &'static LayerSchema) -> Result<Self, SnapshotError> {
        let mut layer = dec.layer(schema)?;
        let bufsize = layer.u32("bufsize")? as usize;
        if bufsize == 0 {
            return Err(SnapshotError::InvalidValue {
                layer: schema.layer,
                field: "bufsize",
                reason: "buffer size must be positive".to_string(),
            });
        }
        let buffer = layer.bytes("buffer")?.to_vec();
        let tracker = FlushTracker::restore(&mut layer)?;
        layer.finish()?;
        Ok(Self {
            bufsize,
            buffer,
            tracker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn idle_tracker_is_not_worth_flushing() {
        let mut tracker = FlushTracker::new();
        assert!(!tracker.check());
        assert!(!tracker.check());
    }

    #[test]
    fn insert_then_check_is_worth_once() {
        let mut tracker = FlushTracker::new();
        tracker.record_insert();
        assert!(tracker.check());
        assert!(!tracker.check());
    }

    #[test]
    fn flush_after_positive_check_settles() {
        let mut tracker = FlushTracker::new();
        tracker.record_insert();
        assert!(tracker.check());
        tracker.record_flush();
        assert!(!tracker.check());
        assert!(!tracker.check());

        tracker.record_insert();
        assert!(tracker.check());
    }

    #[test]
    fn flush_between_checks_skips_one_tick() {
        let mut tracker = FlushTracker::new();
        tracker.record_insert();
        tracker.record_flush();
        tracker.record_insert();
        // A flush happened since the previous check.
        assert!(!tracker.check());
        // The second insert is still pending and gets reported now.
        assert!(tracker.check());
    }

    #[test]
    fn disarm_suppresses_next_check_only() {
        let mut tracker = FlushTracker::new();
        tracker.record_insert();
        tracker.disarm();
        assert!(!tracker.check());
        assert!(tracker.check());
    }

    #[test]
    fn failed_flush_is_reported_again() {
        let mut tracker = FlushTracker::new();
        tracker.record_insert();
        assert!(tracker.check());
        tracker.record_flush_failure();
        assert!(tracker.check());
    }

    #[test_case(3, 3, false ; "everything flushed")]
    #[test_case(4, 3, true ; "one pending insert")]
    #[test_case(0, 0, false ; "fresh")]
    #[test_case(0, u32::MAX, true ; "wrapped counter")]
    fn restored_counters(inserts: u32, flushed: u32, expected: bool) {
        let mut tracker = FlushTracker::with_counters(inserts, flushed);
        assert_eq!(tracker.check(), expected);
    }

    #[test]
    fn insert_counter_wraps() {
        let mut tracker = FlushTracker::with_counters(u32::MAX, u32::MAX);
        tracker.record_insert();
        assert_eq!(tracker.inserts(), 0);
        assert!(tracker.check());
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Insert,
        Flush,
        Check,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Insert), Just(Op::Flush), Just(Op::Check)]
    }

    proptest! {
        #[test]
        fn never_true_twice_without_insert(ops in prop::collection::vec(op(), 0..64)) {
            let mut tracker = FlushTracker::new();
            let mut last_true = false;
            for op in ops {
                match op {
                    Op::Insert => {
                        tracker.record_insert();
                        last_true = false;
                    }
                    Op::Flush => tracker.record_flush(),
                    Op::Check => {
                        let worth = tracker.check();
                        prop_assert!(!(worth && last_true));
                        last_true = worth;
                    }
                }
            }
        }

        #[test]
        fn pending_data_is_eventually_reported(ops in prop::collection::vec(op(), 0..64)) {
            let mut tracker = FlushTracker::new();
            for op in ops {
                match op {
                    Op::Insert => tracker.record_insert(),
                    Op::Flush => tracker.record_flush(),
                    Op::Check => {
                        if tracker.check() {
                            tracker.record_flush();
                        }
                    }
                }
            }
            let pending = tracker.inserts != tracker.flushed;
            let reported = tracker.check() || tracker.check();
            prop_assert_eq!(pending, reported);
        }
    }
}
