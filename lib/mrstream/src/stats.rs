use serde::Serialize;
use std::path::PathBuf;

#[derive(Default, Clone, Debug, Serialize)]
pub struct MapStats {
    pub tasks: usize,
    pub failed_inputs: usize,
    pub records_in: u64,
    pub records_out: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct ReduceStats {
    pub partitions: usize,
    pub failed_partitions: usize,
    pub sort_failures: usize,
    pub total_lines: u64,
    pub total_groups: u64,
    pub min_partition_ms: u64,
    pub max_partition_ms: u64,
    pub wall_ms: u64,
}

/// Per-partition result of one reducer worker.
#[derive(Clone, Debug)]
pub(crate) struct PartitionStats {
    pub partition: usize,
    pub output: PathBuf,
    pub sort_failed: bool,
    pub lines_in: u64,
    pub groups: u64,
    pub wall_ms: u64,
}

impl ReduceStats {
    pub(crate) fn collect(partitions: usize, done: &[PartitionStats], wall_ms: u64) -> Self {
        Self {
            partitions,
            failed_partitions: partitions.saturating_sub(done.len()),
            sort_failures: done.iter().filter(|p| p.sort_failed).count(),
            total_lines: done.iter().map(|p| p.lines_in).sum(),
            total_groups: done.iter().map(|p| p.groups).sum(),
            min_partition_ms: done.iter().map(|p| p.wall_ms).min().unwrap_or(0),
            max_partition_ms: done.iter().map(|p| p.wall_ms).max().unwrap_or(0),
            wall_ms,
        }
    }
}

/// What a full pipeline run hands back to its caller.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineReport {
    /// One file per completed partition, in partition order.
    pub outputs: Vec<PathBuf>,
    pub map: MapStats,
    pub reduce: ReduceStats,
}

impl PipelineReport {
    /// Human-readable location line printed by `launch`. A range is only
    /// used when no partition is missing from it.
    pub fn describe_outputs(&self) -> String {
        if self.reduce.failed_partitions > 0 && self.outputs.len() > 1 {
            let listed: Vec<String> = self.outputs.iter().map(|p| p.display().to_string()).collect();
            return format!("output is in: {}", listed.join(", "));
        }
        match self.outputs.as_slice() {
            [] => "no output produced".to_string(),
            [one] => format!("output is in: {}", one.display()),
            [first, .., last] => format!("output is in: {} - {}", first.display(), last.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(partition: usize, sort_failed: bool, lines_in: u64, wall_ms: u64) -> PartitionStats {
        PartitionStats { partition, output: PathBuf::from(format!("out.{partition}")), sort_failed, lines_in, groups: lines_in / 2, wall_ms }
    }

    #[test]
    fn aggregates_completed_partitions() {
        let done = vec![part(0, false, 10, 5), part(2, true, 4, 9)];
        let stats = ReduceStats::collect(3, &done, 12);
        assert_eq!(stats.failed_partitions, 1);
        assert_eq!(stats.sort_failures, 1);
        assert_eq!(stats.total_lines, 14);
        assert_eq!(stats.total_groups, 7);
        assert_eq!((stats.min_partition_ms, stats.max_partition_ms), (5, 9));
    }

    #[test]
    fn describes_output_range() {
        let mut report = PipelineReport { outputs: vec![], map: MapStats::default(), reduce: ReduceStats::default() };
        assert_eq!(report.describe_outputs(), "no output produced");
        report.outputs = vec![PathBuf::from("red-out-p1.0000")];
        assert_eq!(report.describe_outputs(), "output is in: red-out-p1.0000");
        report.outputs.push(PathBuf::from("red-out-p1.0001"));
        report.outputs.push(PathBuf::from("red-out-p1.0002"));
        assert_eq!(report.describe_outputs(), "output is in: red-out-p1.0000 - red-out-p1.0002");
    }

    #[test]
    fn lists_outputs_when_a_partition_failed() {
        let report = PipelineReport {
            outputs: vec![PathBuf::from("red-out-p1.0000"), PathBuf::from("red-out-p1.0002")],
            map: MapStats::default(),
            reduce: ReduceStats { partitions: 3, failed_partitions: 1, ..ReduceStats::default() },
        };
        assert_eq!(report.describe_outputs(), "output is in: red-out-p1.0000, red-out-p1.0002");
    }
}
