//! Process bootstrapping: flags, logging and exit status for job binaries.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::api::Job;
use crate::config::{Config, Mode};
use crate::constants::{
    DEFAULT_MAPPERS, DEFAULT_PARTITIONS, DEFAULT_REDUCERS, DEFAULT_VALUE_QUEUE_CAP, ENV_KEEP_INTERMEDIATES, ENV_SORT,
    ENV_VALUE_QUEUE_CAP, ENV_WORK_DIR,
};
use crate::error::MrError;
use crate::runtime::run;
use crate::sort::SortBackend;
use crate::utils::{env_var_parse, env_var_truthy};

#[derive(Parser, Debug)]
#[command(about = "Hadoop Streaming compatible map/reduce runner")]
pub struct Options {
    /// Run the mapper over stdin
    #[arg(long)]
    pub mapper: bool,
    /// Run the reducer over sorted stdin
    #[arg(long)]
    pub reducer: bool,
    /// Run the full map/sort/reduce pipeline locally
    #[arg(long)]
    pub mapreduce: bool,
    /// Number of output partitions
    #[arg(long, default_value_t = DEFAULT_PARTITIONS)]
    pub partitions: usize,
    /// Concurrent mapper workers
    #[arg(long, default_value_t = DEFAULT_MAPPERS)]
    pub mappers: usize,
    /// Concurrent reducer workers
    #[arg(long, default_value_t = DEFAULT_REDUCERS)]
    pub reducers: usize,
    /// Directory for temp and output files (default: current dir)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
    /// Sort program, or `builtin` for the in-process sorter
    #[arg(long)]
    pub sort: Option<String>,
    /// Input files or directories; stdin when none are given
    pub inputs: Vec<PathBuf>,
}

impl Options {
    /// Flags win over `MRSTREAM_*` environment settings.
    pub fn into_config(self) -> Result<Config, MrError> {
        let mode = Mode::select(self.mapper, self.reducer, self.mapreduce)?;
        let mut config = Config::new(mode);
        config.partitions = self.partitions;
        config.mappers = self.mappers;
        config.reducers = self.reducers;
        config.inputs = self.inputs;
        if let Some(dir) = self.work_dir.or_else(|| std::env::var_os(ENV_WORK_DIR).map(PathBuf::from)) {
            config.work_dir = dir;
        }
        if let Some(sort) = self.sort.or_else(|| std::env::var(ENV_SORT).ok()) {
            config.sort = SortBackend::from_setting(&sort);
        }
        config.keep_intermediates = env_var_truthy(ENV_KEEP_INTERMEDIATES);
        config.value_queue_cap = env_var_parse(ENV_VALUE_QUEUE_CAP).unwrap_or(DEFAULT_VALUE_QUEUE_CAP);
        config.validate()?;
        Ok(config)
    }
}

/// Logs go to stderr; stdout carries records in filter mode.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Entry point for job binaries: parse flags, run the selected mode, and
/// print where full-pipeline output landed.
pub fn launch<J: Job + ?Sized>(job: &J) -> ExitCode {
    init_tracing();
    let config = match Options::parse().into_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    match run(job, &config) {
        Ok(Some(report)) => {
            println!("{}", report.describe_outputs());
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        Options::try_parse_from(std::iter::once("job").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn full_pipeline_flags() {
        let config = parse(&["--mapreduce", "--partitions", "3", "--mappers", "2", "--sort", "builtin", "a.txt", "b.txt"])
            .into_config()
            .unwrap();
        assert_eq!(config.mode, Mode::MapReduce);
        assert_eq!((config.partitions, config.mappers, config.reducers), (3, 2, 4));
        assert_eq!(config.inputs, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        assert_eq!(config.sort, SortBackend::Builtin);
    }

    #[test]
    fn filter_flags() {
        assert_eq!(parse(&["--mapper"]).into_config().unwrap().mode, Mode::Map);
        assert_eq!(parse(&["--reducer"]).into_config().unwrap().mode, Mode::Reduce);
    }

    #[test]
    fn conflicting_or_missing_mode_is_a_configuration_error() {
        for args in [&["--mapper", "--reducer"][..], &[][..], &["--mapreduce", "--reducer"][..]] {
            assert!(matches!(parse(args).into_config(), Err(MrError::Configuration(_))), "{args:?}");
        }
    }

    #[test]
    fn zero_partitions_rejected() {
        assert!(parse(&["--mapreduce", "--partitions", "0"]).into_config().is_err());
    }
}
