use anyhow::{anyhow, Context, Result};
use crossbeam_channel as channel;
use std::ffi::OsString;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::error;

use crate::api::Emitter;
use crate::constants::{DEFAULT_LOCAL_BATCH_BYTES, DEFAULT_WRITER_QUEUE_CAP};
use crate::io::{hash_to_partition, open_writer};
use crate::record::encode_key_value_line;

/// `<prefix>.<partition:04>`; the suffix is what reducers glob on.
pub fn partition_path(prefix: impl AsRef<Path>, partition: usize) -> PathBuf {
    let mut name = OsString::from(prefix.as_ref().as_os_str());
    name.push(format!(".{partition:04}"));
    PathBuf::from(name)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============== Partitioned file sink ==============

/// Routes each record to `hash(reduceKey) % partitions` and appends its
/// encoded line to that partition's file.
///
/// One IO thread per partition file. Emitting threads batch lines per
/// partition and hand full chunks over a bounded channel. All partition files
/// are created up front so every partition has a file, empty or not.
///
/// Each writer holds `num_partitions` threads and open files until it is
/// finished. The map phase keeps at most one writer per mapper worker alive,
/// so the peak is `mappers * partitions` of each.
pub struct PartitionWriter {
    senders: Vec<channel::Sender<Vec<u8>>>,
    handles: Vec<thread::JoinHandle<io::Result<()>>>,
    local_buffers: Vec<Mutex<Vec<u8>>>,
    paths: Vec<PathBuf>,
    batch_bytes: usize,
    emits: AtomicU64,
}

impl PartitionWriter {
    pub fn create(num_partitions: usize, prefix: impl AsRef<Path>) -> Result<Self> {
        Self::with_buffering(num_partitions, prefix, DEFAULT_LOCAL_BATCH_BYTES, DEFAULT_WRITER_QUEUE_CAP)
    }

    pub fn with_buffering(num_partitions: usize, prefix: impl AsRef<Path>, batch_bytes: usize, queue_cap: usize) -> Result<Self> {
        let num_partitions = num_partitions.max(1);
        let mut senders = Vec::with_capacity(num_partitions);
        let mut handles = Vec::with_capacity(num_partitions);
        let mut paths = Vec::with_capacity(num_partitions);
        for part in 0..num_partitions {
            let path = partition_path(&prefix, part);
            let mut writer = open_writer(&path)?;
            let (tx, rx) = channel::bounded::<Vec<u8>>(queue_cap.max(1));
            let handle = thread::Builder::new()
                .name(format!("part-writer-{part}"))
                .spawn(move || -> io::Result<()> {
                    for chunk in rx {
                        writer.write_all(&chunk)?;
                    }
                    writer.flush()
                })
                .with_context(|| format!("spawn writer for {}", path.display()))?;
            senders.push(tx);
            handles.push(handle);
            paths.push(path);
        }
        let local_buffers = (0..num_partitions).map(|_| Mutex::new(Vec::with_capacity(batch_bytes))).collect();
        Ok(Self { senders, handles, local_buffers, paths, batch_bytes, emits: AtomicU64::new(0) })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn emitted(&self) -> u64 {
        self.emits.load(Ordering::Relaxed)
    }

    /// Flush and close every partition file, reporting the first IO error.
    pub fn finish(mut self) -> Result<u64> {
        self.close()?;
        Ok(self.emitted())
    }

    fn send_chunk(&self, partition: usize, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        if let Err(e) = self.senders[partition].send(chunk) {
            error!(path = %self.paths[partition].display(), "partition writer gone, dropping {} bytes", e.0.len());
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.handles.is_empty() {
            return Ok(());
        }
        for part in 0..self.local_buffers.len() {
            let chunk = std::mem::take(&mut *lock(&self.local_buffers[part]));
            self.send_chunk(part, chunk);
        }
        // Disconnecting the channels lets each IO thread drain and flush.
        self.senders.clear();
        let mut first_err = None;
        for (handle, path) in self.handles.drain(..).zip(&self.paths) {
            let outcome = match handle.join() {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => anyhow!(e).context(format!("write {}", path.display())),
                Err(_) => anyhow!("writer thread for {} panicked", path.display()),
            };
            error!("{:#}", outcome);
            first_err.get_or_insert(outcome);
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Emitter for PartitionWriter {
    fn emit(&self, reduce_key: &str, sort_key: &str, value: &str) {
        let part = hash_to_partition(reduce_key, self.local_buffers.len());
        let line = encode_key_value_line(reduce_key, sort_key, value);
        self.emits.fetch_add(1, Ordering::Relaxed);
        let full = {
            let mut buf = lock(&self.local_buffers[part]);
            buf.extend_from_slice(line.as_bytes());
            if buf.len() >= self.batch_bytes { Some(std::mem::take(&mut *buf)) } else { None }
        };
        if let Some(chunk) = full {
            self.send_chunk(part, chunk);
        }
    }
}

impl Drop for PartitionWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("closing partition writer: {:#}", e);
        }
    }
}

// ============== Direct stream sink ==============

/// Writes `reduceKey\tvalue\n` straight to a stream. The sort key is not
/// part of final output.
pub struct LineWriter<W: Write> {
    state: Mutex<LineState<W>>,
}

struct LineState<W: Write> {
    out: BufWriter<W>,
    lines: u64,
    failed: Option<io::Error>,
}

impl<W: Write + Send> LineWriter<W> {
    pub fn new(out: W) -> Self {
        Self { state: Mutex::new(LineState { out: BufWriter::new(out), lines: 0, failed: None }) }
    }

    pub fn lines(&self) -> u64 {
        lock(&self.state).lines
    }

    /// Flush and hand back the underlying stream. A write error seen by any
    /// earlier `emit` is returned here.
    pub fn finish(self) -> Result<W> {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Some(e) = state.failed {
            return Err(anyhow!(e).context("write output"));
        }
        state.out.into_inner().map_err(|e| anyhow!(e.into_error()).context("flush output"))
    }
}

impl<W: Write + Send> Emitter for LineWriter<W> {
    fn emit(&self, reduce_key: &str, _sort_key: &str, value: &str) {
        let mut state = lock(&self.state);
        if state.failed.is_some() {
            return;
        }
        let res = (|| {
            state.out.write_all(reduce_key.as_bytes())?;
            state.out.write_all(b"\t")?;
            state.out.write_all(value.as_bytes())?;
            state.out.write_all(b"\n")
        })();
        match res {
            Ok(()) => state.lines += 1,
            Err(e) => {
                error!("write output line: {}", e);
                state.failed = Some(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn partition_writer_creates_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PartitionWriter::create(3, dir.path().join("out")).unwrap();
        let paths = writer.paths().to_vec();
        assert_eq!(writer.finish().unwrap(), 0);
        assert_eq!(paths.len(), 3);
        for (p, path) in paths.iter().enumerate() {
            assert_eq!(path, &dir.path().join(format!("out.{p:04}")));
            assert_eq!(fs::read_to_string(path).unwrap(), "");
        }
    }

    #[test]
    fn partition_writer_routes_by_reduce_key() {
        let dir = tempfile::tempdir().unwrap();
        // Tiny batches so chunks cross the channel mid-run as well as at close.
        let writer = PartitionWriter::with_buffering(4, dir.path().join("m"), 8, 2).unwrap();
        let keys = ["alpha", "beta", "gamma", "delta", "alpha", "gamma,x"];
        for (i, k) in keys.iter().enumerate() {
            writer.emit(k, "s", &i.to_string());
        }
        let paths = writer.paths().to_vec();
        assert_eq!(writer.finish().unwrap(), keys.len() as u64);

        for (i, k) in keys.iter().enumerate() {
            let expected = encode_key_value_line(k, "s", &i.to_string());
            let home = hash_to_partition(k, 4);
            for (p, path) in paths.iter().enumerate() {
                let body = fs::read_to_string(path).unwrap();
                assert_eq!(body.lines().any(|l| format!("{l}\n") == expected), p == home, "key {k} partition {p}");
            }
        }
    }

    #[test]
    fn dropping_partition_writer_still_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let writer = PartitionWriter::create(1, dir.path().join("d")).unwrap();
            writer.emit("k", "", "v");
            writer.paths()[0].clone()
        };
        assert_eq!(fs::read_to_string(path).unwrap(), "k\tv\n");
    }

    #[test]
    fn line_writer_drops_sort_key() {
        let writer = LineWriter::new(Vec::new());
        writer.emit("a", "ignored", "1");
        writer.emit("b,c", "", "x\ty");
        assert_eq!(writer.lines(), 2);
        let out = writer.finish().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a\t1\nb,c\tx\ty\n");
    }
}
