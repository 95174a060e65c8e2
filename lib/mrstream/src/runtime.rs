use anyhow::{bail, Context, Result};
use crossbeam_channel as channel;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::Job;
use crate::config::{Config, Mode};
use crate::constants::{MAP_OUT_STEM, REDUCE_IN_STEM, REDUCE_OUT_STEM};
use crate::error::MrError;
use crate::io::{ensure_dir, expand_inputs, open_reader, remove_quietly};
use crate::map::{run_map, run_map_final};
use crate::reduce::{run_reduce_with_capacity, ReduceOutcome};
use crate::stats::{MapStats, PartitionStats, PipelineReport, ReduceStats};
use crate::writer::{partition_path, LineWriter, PartitionWriter};

/// Run whichever mode `config` selects against the process's stdin/stdout.
/// Only full-pipeline mode produces a report.
pub fn run<J: Job + ?Sized>(job: &J, config: &Config) -> Result<Option<PipelineReport>> {
    config.validate()?;
    match config.mode {
        Mode::MapReduce => RuntimePipeline::new(config.clone())?.run(job).map(Some),
        Mode::Map | Mode::Reduce => {
            run_filter(job, config, io::stdin().lock(), io::stdout())?;
            Ok(None)
        }
    }
}

/// Single pass for one stage of an externally driven pipeline: Map then
/// MapFinal, or Reduce over already sorted input. Returns `output` flushed.
///
/// Map output is plain `key\tvalue`: keys are not escaped and sort keys are
/// dropped, so keys chained into a Reduce filter must not contain a tab, `,`
/// or `%`.
pub fn run_filter<J, R, W>(job: &J, config: &Config, input: R, output: W) -> Result<W>
where
    J: Job + ?Sized,
    R: BufRead,
    W: Write + Send,
{
    let emitter = LineWriter::new(output);
    let start = Instant::now();
    match config.mode {
        Mode::Map => {
            let records = run_map(job, input, &emitter);
            run_map_final(job, &emitter);
            debug!(phase = "map", records, lines_out = emitter.lines(), wall_ms = start.elapsed().as_millis() as u64, "filter done");
        }
        Mode::Reduce => {
            let outcome = run_reduce_with_capacity(job, input, &emitter, config.value_queue_cap);
            debug!(phase = "reduce", lines_in = outcome.lines_in, groups = outcome.groups, wall_ms = start.elapsed().as_millis() as u64, "filter done");
        }
        Mode::MapReduce => bail!("the full pipeline does not run as a filter"),
    }
    emitter.finish()
}

#[derive(Default)]
struct MapCounters {
    tasks_done: AtomicUsize,
    records_in: AtomicU64,
    records_out: AtomicU64,
}

/// Map, sort and reduce entirely inside this process.
///
/// Temp files live in the work dir and are named after the run id:
/// `tmp-map-out-<run>-f<input>.<part>` from mappers, `tmp-red-in-<run>.<part>`
/// from the sort step, and `red-out-<run>.<part>` for final output. Mapper
/// and reducer workers always own disjoint file sets.
pub struct RuntimePipeline {
    config: Config,
}

impl RuntimePipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn run<J: Job + ?Sized>(&self, job: &J) -> Result<PipelineReport> {
        self.run_with_stdin(job, io::stdin().lock())
    }

    /// `stdin` is only read when the config names no input files.
    pub fn run_with_stdin<J: Job + ?Sized, R: BufRead>(&self, job: &J, stdin: R) -> Result<PipelineReport> {
        ensure_dir(&self.config.work_dir)?;
        info!(
            run_id = %self.config.run_id,
            partitions = self.config.partitions,
            mappers = self.config.mappers,
            reducers = self.config.reducers,
            work_dir = %self.config.work_dir.display(),
            "mrstream starting map phase"
        );

        // Returning from map_phase is the barrier: every mapper and MapFinal are done.
        let map = self.map_phase(job, stdin)?;
        let (done, reduce) = self.reduce_phase(job)?;

        let outputs = done.into_iter().map(|p| p.output).collect();
        Ok(PipelineReport { outputs, map, reduce })
    }

    fn map_out_prefix(&self, index: usize) -> PathBuf {
        self.config.work_dir.join(format!("{}-{}-f{}", MAP_OUT_STEM, self.config.run_id, index))
    }

    fn map_out_pattern(&self, partition: usize) -> String {
        let dir = glob::Pattern::escape(&self.config.work_dir.to_string_lossy());
        format!("{}/{}-{}-f*.{:04}", dir, MAP_OUT_STEM, self.config.run_id, partition)
    }

    fn reduce_in_path(&self, partition: usize) -> PathBuf {
        partition_path(self.config.work_dir.join(format!("{}-{}", REDUCE_IN_STEM, self.config.run_id)), partition)
    }

    pub fn output_path(&self, partition: usize) -> PathBuf {
        partition_path(self.config.work_dir.join(format!("{}-{}", REDUCE_OUT_STEM, self.config.run_id)), partition)
    }

    fn worker_pool(&self, threads: usize, role: &'static str) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(move |i| format!("{role}-{i}"))
            .build()
            .with_context(|| format!("build {role} pool"))
    }

    fn map_phase<J: Job + ?Sized, R: BufRead>(&self, job: &J, stdin: R) -> Result<MapStats> {
        let phase_start = Instant::now();
        let counters = MapCounters::default();
        let files = expand_inputs(&self.config.inputs)?;

        let total_tasks = if files.is_empty() {
            // stdin is the only input: one mapper, and MapFinal shares its sink.
            let sink = PartitionWriter::create(self.config.partitions, self.map_out_prefix(0))?;
            let records = run_map(job, stdin, &sink);
            run_map_final(job, &sink);
            counters.records_in.fetch_add(records, Ordering::Relaxed);
            counters.records_out.fetch_add(sink.finish().context("finish stdin map output")?, Ordering::Relaxed);
            counters.tasks_done.fetch_add(1, Ordering::Relaxed);
            1
        } else {
            let (tx, rx) = channel::unbounded::<(usize, PathBuf)>();
            for work in files.iter().cloned().enumerate() {
                let _ = tx.send(work);
            }
            drop(tx);

            let workers = self.config.mappers.min(files.len());
            let pool = self.worker_pool(workers, "mapper")?;
            let counters = &counters;
            pool.scope(|s| {
                for worker in 0..workers {
                    let queue = rx.clone();
                    s.spawn(move |_| self.map_worker(worker, job, queue, counters));
                }
            });

            let sink = PartitionWriter::create(self.config.partitions, self.map_out_prefix(files.len()))?;
            run_map_final(job, &sink);
            counters.records_out.fetch_add(sink.finish().context("finish map_final output")?, Ordering::Relaxed);
            files.len()
        };

        let tasks = counters.tasks_done.load(Ordering::Relaxed);
        let stats = MapStats {
            tasks,
            failed_inputs: total_tasks - tasks,
            records_in: counters.records_in.load(Ordering::Relaxed),
            records_out: counters.records_out.load(Ordering::Relaxed),
            wall_ms: phase_start.elapsed().as_millis() as u64,
        };
        info!(phase = "map",
              tasks = stats.tasks, failed_inputs = stats.failed_inputs,
              records_in = stats.records_in, records_out = stats.records_out,
              wall_ms = stats.wall_ms,
              "Map phase complete");
        if stats.failed_inputs > 0 {
            warn!(failed_inputs = stats.failed_inputs, "some inputs were not mapped");
        }
        Ok(stats)
    }

    // A worker that cannot open its input or create its sink stops pulling
    // work; siblings keep draining the queue.
    fn map_worker<J: Job + ?Sized>(&self, worker: usize, job: &J, queue: channel::Receiver<(usize, PathBuf)>, counters: &MapCounters) {
        for (index, path) in queue.iter() {
            let task_start = Instant::now();
            let input = match open_reader(&path) {
                Ok(r) => r,
                Err(e) => {
                    error!(worker, index, "{}; mapper stops", e);
                    return;
                }
            };
            let sink = match PartitionWriter::create(self.config.partitions, self.map_out_prefix(index)) {
                Ok(s) => s,
                Err(e) => {
                    error!(worker, index, "{:#}; mapper stops", e);
                    return;
                }
            };
            let records = run_map(job, input, &sink);
            counters.records_in.fetch_add(records, Ordering::Relaxed);
            match sink.finish() {
                Ok(emitted) => {
                    counters.records_out.fetch_add(emitted, Ordering::Relaxed);
                }
                Err(e) => error!(worker, index, "map output for {}: {:#}", path.display(), e),
            }
            counters.tasks_done.fetch_add(1, Ordering::Relaxed);
            debug!(worker, index, input = %path.display(), records, wall_ms = task_start.elapsed().as_millis() as u64, "map task done");
        }
    }

    fn reduce_phase<J: Job + ?Sized>(&self, job: &J) -> Result<(Vec<PartitionStats>, ReduceStats)> {
        let phase_start = Instant::now();
        let partitions = self.config.partitions;
        let (tx, rx) = channel::unbounded::<usize>();
        for p in 0..partitions {
            let _ = tx.send(p);
        }
        drop(tx);

        let workers = self.config.reducers.min(partitions);
        let pool = self.worker_pool(workers, "reducer")?;
        let done: Mutex<Vec<PartitionStats>> = Mutex::new(Vec::with_capacity(partitions));
        let done_ref = &done;
        pool.scope(|s| {
            for worker in 0..workers {
                let queue = rx.clone();
                s.spawn(move |_| {
                    for partition in queue.iter() {
                        match self.reduce_partition(job, partition) {
                            Ok(stats) => done_ref.lock().unwrap_or_else(|e| e.into_inner()).push(stats),
                            Err(e) => {
                                error!(worker, partition, "{:#}; reducer stops", e);
                                return;
                            }
                        }
                    }
                });
            }
        });

        let mut done = done.into_inner().unwrap_or_else(|e| e.into_inner());
        done.sort_by_key(|p| p.partition);
        let stats = ReduceStats::collect(partitions, &done, phase_start.elapsed().as_millis() as u64);
        info!(phase = "reduce",
              partitions = stats.partitions, failed_partitions = stats.failed_partitions,
              sort_failures = stats.sort_failures,
              total_lines = stats.total_lines, total_groups = stats.total_groups,
              min_partition_ms = stats.min_partition_ms, max_partition_ms = stats.max_partition_ms,
              wall_ms = stats.wall_ms,
              "Reduce phase complete");
        Ok((done, stats))
    }

    /// Sort one partition's intermediate files, reduce them into its output
    /// file, then delete the intermediates.
    fn reduce_partition<J: Job + ?Sized>(&self, job: &J, partition: usize) -> Result<PartitionStats> {
        let start = Instant::now();
        let pattern = self.map_out_pattern(partition);
        let mut inputs: Vec<PathBuf> = glob::glob(&pattern)
            .with_context(|| format!("glob {pattern}"))?
            .flatten()
            .collect();
        inputs.sort();

        let sorted = self.reduce_in_path(partition);
        // A failed sort is not retried; reduce whatever it left behind.
        let sort_failed = match self.config.sort.sort_files(&inputs, &sorted) {
            Ok(outcome) => {
                debug!(partition, files = inputs.len(), bytes_in = outcome.bytes_in, sort_ms = outcome.sort_ms, "partition sorted");
                false
            }
            Err(e) => {
                error!("{}", MrError::ExternalSort { partition, detail: format!("{e:#}") });
                true
            }
        };

        let out_path = self.output_path(partition);
        let out = File::create(&out_path).map_err(|e| MrError::file_access(&out_path, e))?;
        let emitter = LineWriter::new(out);
        let outcome = match open_reader(&sorted) {
            Ok(reader) => run_reduce_with_capacity(job, reader, &emitter, self.config.value_queue_cap),
            Err(e) => {
                warn!(partition, "{}; reducing nothing", e);
                ReduceOutcome::default()
            }
        };

        if !self.config.keep_intermediates {
            remove_quietly(&inputs);
            remove_quietly(std::slice::from_ref(&sorted));
        }
        emitter.finish().with_context(|| format!("write {}", out_path.display()))?;

        let wall_ms = start.elapsed().as_millis() as u64;
        debug!(partition, lines_in = outcome.lines_in, groups = outcome.groups, wall_ms, "partition reduced");
        Ok(PartitionStats {
            partition,
            output: out_path,
            sort_failed,
            lines_in: outcome.lines_in,
            groups: outcome.groups,
            wall_ms,
        })
    }
}
