//! Map driver: one `Job::map` call per input line.

use std::io::BufRead;

use crate::api::{Emitter, Job};
use crate::record::RecordReader;

/// Feed every line of `input` to `job.map`. Returns the number of records
/// read. A read failure ends the stream quietly.
pub fn run_map<J: Job + ?Sized, R: BufRead>(job: &J, input: R, emitter: &dyn Emitter) -> u64 {
    let mut reader = RecordReader::new(input);
    let mut records = 0u64;
    while let Some(rec) = reader.next_value() {
        job.map("", &rec.value, emitter);
        records += 1;
    }
    records
}

/// Only call once every `run_map` writing to the same emitter has returned.
pub fn run_map_final<J: Job + ?Sized>(job: &J, emitter: &dyn Emitter) {
    job.map_final(emitter);
}
