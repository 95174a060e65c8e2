use crossbeam_channel as channel;

use crate::record::Record;

// ========== Core MapReduce traits ==========

/// Sink for `(reduceKey, sortKey, value)` triples.
///
/// Emitters are shared between the reading loop and the Reduce running
/// alongside it, so `emit` takes `&self`. Write failures are logged by the
/// sink and reported again when it is finished.
pub trait Emitter: Send + Sync {
    fn emit(&self, reduce_key: &str, sort_key: &str, value: &str);

    fn emit_record(&self, record: &Record) {
        self.emit(&record.reduce_key, &record.sort_key, &record.value);
    }
}

/// User code driven by the engine. One instance serves the whole run and
/// is called from several worker threads at once.
pub trait Job: Send + Sync {
    /// `key` is always empty for line input.
    fn map(&self, key: &str, value: &str, emitter: &dyn Emitter);

    /// Called once after every `map` sharing the same output has returned.
    fn map_final(&self, _emitter: &dyn Emitter) {}

    /// Called once per reduceKey group. `sort_key` belongs to the first
    /// record of the group; `values` is fed while the group is still being
    /// read, in sorted order.
    fn reduce(&self, reduce_key: &str, sort_key: &str, values: Values, emitter: &dyn Emitter);
}

/// Lazy stream of one group's values.
///
/// Backed by a bounded channel: iterating blocks until the reader has pushed
/// the next value or closed the group. Dropping it early discards the rest
/// of the group.
pub struct Values {
    rx: channel::Receiver<String>,
}

impl Values {
    pub(crate) fn new(rx: channel::Receiver<String>) -> Self {
        Self { rx }
    }
}

impl Iterator for Values {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.rx.recv().ok()
    }
}

impl FromIterator<String> for Values {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let (tx, rx) = channel::unbounded();
        for v in iter {
            tx.send(v).ok();
        }
        Self { rx }
    }
}

impl<'a> FromIterator<&'a str> for Values {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(str::to_string).collect()
    }
}
