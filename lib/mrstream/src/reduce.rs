//! Reduce driver over a file already sorted by reduceKey then sortKey.
//!
//! Groups are handled one at a time. The active group's `Job::reduce` runs on
//! its own scoped thread and consumes values from a bounded channel while
//! this loop keeps reading lines into it; a full channel throttles reading.

use crossbeam_channel as channel;
use serde::Serialize;
use std::io::BufRead;
use std::thread::{self, ScopedJoinHandle};
use tracing::{debug, error};

use crate::api::{Emitter, Job, Values};
use crate::constants::DEFAULT_VALUE_QUEUE_CAP;
use crate::record::RecordReader;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReduceOutcome {
    pub lines_in: u64,
    pub groups: u64,
}

struct ActiveGroup<'scope> {
    reduce_key: String,
    values: channel::Sender<String>,
    handle: ScopedJoinHandle<'scope, ()>,
}

impl ActiveGroup<'_> {
    /// Signal end-of-values and wait for the group's Reduce to return.
    fn close(self) {
        let ActiveGroup { reduce_key, values, handle } = self;
        drop(values);
        if handle.join().is_err() {
            error!(reduce_key = %reduce_key, "reduce panicked; group output may be incomplete");
        }
    }
}

pub fn run_reduce<J: Job + ?Sized, R: BufRead>(job: &J, input: R, emitter: &dyn Emitter) -> ReduceOutcome {
    run_reduce_with_capacity(job, input, emitter, DEFAULT_VALUE_QUEUE_CAP)
}

pub fn run_reduce_with_capacity<J: Job + ?Sized, R: BufRead>(
    job: &J,
    input: R,
    emitter: &dyn Emitter,
    queue_cap: usize,
) -> ReduceOutcome {
    let mut reader = RecordReader::new(input);
    let mut outcome = ReduceOutcome::default();

    thread::scope(|scope| {
        let mut current: Option<ActiveGroup<'_>> = None;

        while let Some(rec) = reader.next_key_value() {
            outcome.lines_in += 1;
            let same_group = current.as_ref().is_some_and(|g| g.reduce_key == rec.reduce_key);
            if !same_group {
                if let Some(prev) = current.take() {
                    prev.close();
                }
                let (tx, rx) = channel::bounded::<String>(queue_cap.max(1));
                let key = rec.reduce_key.clone();
                let sort_key = rec.sort_key;
                let handle = scope.spawn(move || job.reduce(&key, &sort_key, Values::new(rx), emitter));
                current = Some(ActiveGroup { reduce_key: rec.reduce_key, values: tx, handle });
                outcome.groups += 1;
            }
            if let Some(group) = &current {
                // Err means the Reduce stopped listening; the rest of its group is dropped.
                if group.values.send(rec.value).is_err() {
                    debug!(reduce_key = %group.reduce_key, "reduce returned before consuming all values");
                }
            }
        }

        if let Some(last) = current.take() {
            last.close();
        }
    });

    outcome
}
