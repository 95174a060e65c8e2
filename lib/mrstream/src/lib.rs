pub mod api;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod map;
pub mod protocol;
pub mod record;
pub mod reduce;
pub mod runtime;
pub mod sort;
pub mod stats;
pub mod utils;
pub mod writer;

pub use api::{Emitter, Job, Values};
pub use cli::launch;
pub use config::{Config, Mode};
pub use error::MrError;
pub use protocol::{JsonProtocol, StreamProtocol, TsvProtocol};
pub use record::Record;
pub use runtime::{run, run_filter, RuntimePipeline};
pub use sort::SortBackend;
pub use stats::PipelineReport;
pub use writer::{LineWriter, PartitionWriter};
