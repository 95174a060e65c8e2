//! Centralized environment variable names and default values for mrstream runtime tuning.

// Environment variable names
pub const ENV_KEEP_INTERMEDIATES: &str = "MRSTREAM_KEEP_INTERMEDIATES";
pub const ENV_SORT: &str = "MRSTREAM_SORT";
pub const ENV_VALUE_QUEUE_CAP: &str = "MRSTREAM_VALUE_QUEUE_CAP";
pub const ENV_WORK_DIR: &str = "MRSTREAM_WORK_DIR";

// Command-line defaults
pub const DEFAULT_PARTITIONS: usize = 1;
pub const DEFAULT_MAPPERS: usize = 4;
pub const DEFAULT_REDUCERS: usize = 4;
pub const DEFAULT_SORT_COMMAND: &str = "sort";
/// `--sort` value selecting the in-process sorter instead of a command.
pub const BUILTIN_SORT: &str = "builtin";

// Values buffered between the sorted-file reader and a running Reduce
pub const DEFAULT_VALUE_QUEUE_CAP: usize = 64;
// Per-partition batch held by an emitting thread before it is queued
pub const DEFAULT_LOCAL_BATCH_BYTES: usize = 64 * 1024;
// Chunks queued per partition writer before emitters block
pub const DEFAULT_WRITER_QUEUE_CAP: usize = 64;

// Temp and output file name stems, all inside the work dir
pub const MAP_OUT_STEM: &str = "tmp-map-out";
pub const REDUCE_IN_STEM: &str = "tmp-red-in";
pub const REDUCE_OUT_STEM: &str = "red-out";
