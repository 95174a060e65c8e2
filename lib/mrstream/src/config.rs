use std::path::PathBuf;

use crate::constants::{DEFAULT_MAPPERS, DEFAULT_PARTITIONS, DEFAULT_REDUCERS, DEFAULT_VALUE_QUEUE_CAP};
use crate::error::MrError;
use crate::sort::SortBackend;
use crate::utils::process_run_id;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Map then MapFinal over stdin, records to stdout.
    Map,
    /// Reduce over sorted stdin, records to stdout.
    Reduce,
    /// Map, sort and reduce in this process.
    MapReduce,
}

impl Mode {
    /// Exactly one of the three selections must be set.
    pub fn select(mapper: bool, reducer: bool, mapreduce: bool) -> Result<Self, MrError> {
        match (mapper, reducer, mapreduce) {
            (true, false, false) => Ok(Mode::Map),
            (false, true, false) => Ok(Mode::Reduce),
            (false, false, true) => Ok(Mode::MapReduce),
            (true, true, false) => Err(MrError::Configuration(
                "can either map or reduce, not both (did you mean --mapreduce?)".into(),
            )),
            (false, false, false) => Err(MrError::Configuration(
                "one of --mapper, --reducer or --mapreduce is required".into(),
            )),
            _ => Err(MrError::Configuration("--mapreduce cannot be combined with --mapper or --reducer".into())),
        }
    }
}

/// Everything a run needs, fixed before it starts.
#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,
    pub partitions: usize,
    pub mappers: usize,
    pub reducers: usize,
    /// Empty means standard input.
    pub inputs: Vec<PathBuf>,
    /// Where temp and output files go.
    pub work_dir: PathBuf,
    /// Namespaces temp and output file names so concurrent runs don't collide.
    pub run_id: String,
    pub sort: SortBackend,
    pub keep_intermediates: bool,
    pub value_queue_cap: usize,
}

impl Config {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            partitions: DEFAULT_PARTITIONS,
            mappers: DEFAULT_MAPPERS,
            reducers: DEFAULT_REDUCERS,
            inputs: Vec::new(),
            work_dir: PathBuf::from("."),
            run_id: process_run_id(),
            sort: SortBackend::default(),
            keep_intermediates: false,
            value_queue_cap: DEFAULT_VALUE_QUEUE_CAP,
        }
    }

    pub fn validate(&self) -> Result<(), MrError> {
        let counts = [
            ("partitions", self.partitions),
            ("mappers", self.mappers),
            ("reducers", self.reducers),
            ("value queue capacity", self.value_queue_cap),
        ];
        for (name, n) in counts {
            if n == 0 {
                return Err(MrError::Configuration(format!("{name} must be at least 1")));
            }
        }
        if self.run_id.is_empty() || self.run_id.contains(['/', '*', '?', '[', ']']) {
            return Err(MrError::Configuration(format!("run id {:?} is not usable in file names", self.run_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_requires_exactly_one_selection() {
        assert_eq!(Mode::select(true, false, false).unwrap(), Mode::Map);
        assert_eq!(Mode::select(false, true, false).unwrap(), Mode::Reduce);
        assert_eq!(Mode::select(false, false, true).unwrap(), Mode::MapReduce);
        for (m, r, mr) in [(true, true, false), (false, false, false), (true, false, true), (true, true, true)] {
            assert!(matches!(Mode::select(m, r, mr), Err(MrError::Configuration(_))), "{m} {r} {mr}");
        }
    }

    #[test]
    fn defaults_match_command_line() {
        let config = Config::new(Mode::MapReduce);
        assert_eq!((config.partitions, config.mappers, config.reducers), (1, 4, 4));
        assert!(config.inputs.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn zero_sized_pools_are_rejected() {
        let mut config = Config::new(Mode::MapReduce);
        config.reducers = 0;
        assert!(matches!(config.validate(), Err(MrError::Configuration(msg)) if msg.contains("reducers")));

        let mut config = Config::new(Mode::MapReduce);
        config.run_id = "a*b".into();
        assert!(config.validate().is_err());
    }
}
