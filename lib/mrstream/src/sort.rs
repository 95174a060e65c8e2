use anyhow::{bail, Context, Result};
use memchr::memchr;
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use crate::constants::{BUILTIN_SORT, DEFAULT_SORT_COMMAND};

/// How a partition's intermediate files become one sorted reduce input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SortBackend {
    /// `LC_ALL=C <program> -o <out> <inputs...>`
    External(String),
    /// Memory-map the inputs and sort lines in parallel in this process.
    Builtin,
}

impl SortBackend {
    pub fn from_setting(setting: &str) -> Self {
        if setting == BUILTIN_SORT {
            SortBackend::Builtin
        } else {
            SortBackend::External(setting.to_string())
        }
    }

    pub fn sort_files(&self, inputs: &[PathBuf], out_path: &Path) -> Result<SortOutcome> {
        match self {
            SortBackend::External(program) => external_sort(program, inputs, out_path),
            SortBackend::Builtin => sort_lines(inputs, out_path),
        }
    }
}

impl Default for SortBackend {
    fn default() -> Self {
        SortBackend::External(DEFAULT_SORT_COMMAND.to_string())
    }
}

#[derive(Clone, Debug, Default)]
pub struct SortOutcome {
    pub bytes_in: u64,
    pub sort_ms: u64,
}

fn input_bytes(inputs: &[PathBuf]) -> u64 {
    inputs.iter().filter_map(|p| std::fs::metadata(p).ok()).map(|m| m.len()).sum()
}

/// Byte order of whole lines comes from the C locale.
pub fn external_sort(program: &str, inputs: &[PathBuf], out_path: &Path) -> Result<SortOutcome> {
    let start = Instant::now();
    let status = Command::new(program)
        .env("LC_ALL", "C")
        .arg("-o")
        .arg(out_path)
        .args(inputs)
        .stdin(Stdio::null())
        .status()
        .with_context(|| format!("spawn {program}"))?;
    if !status.success() {
        bail!("{program} exited with {status}");
    }
    Ok(SortOutcome { bytes_in: input_bytes(inputs), sort_ms: start.elapsed().as_millis() as u64 })
}

// Merge input files into out_path with lines in byte order, newline excluded
// from the comparison. A last line without a newline gets one.
pub fn sort_lines(inputs: &[PathBuf], out_path: &Path) -> Result<SortOutcome> {
    let start = Instant::now();
    let mut file_maps: Vec<Mmap> = Vec::new();
    for p in inputs {
        let file = File::open(p).with_context(|| format!("open {}", p.display()))?;
        if file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
            continue;
        }
        let map = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", p.display()))?;
        file_maps.push(map);
    }

    // (file_idx, start, end) with end exclusive of the newline
    let mut all_lines: Vec<(usize, usize, usize)> = Vec::new();
    for (fi, map) in file_maps.iter().enumerate() {
        let bytes = &map[..];
        let mut off = 0usize;
        while off < bytes.len() {
            let end = memchr(b'\n', &bytes[off..]).map(|i| off + i).unwrap_or(bytes.len());
            all_lines.push((fi, off, end));
            off = end + 1;
        }
    }

    all_lines.par_sort_by(|a, b| file_maps[a.0][a.1..a.2].cmp(&file_maps[b.0][b.1..b.2]));

    let out = File::create(out_path).with_context(|| format!("create {}", out_path.display()))?;
    let mut w = std::io::BufWriter::with_capacity(1024 * 1024, out);
    for &(fi, s, e) in &all_lines {
        w.write_all(&file_maps[fi][s..e])?;
        w.write_all(b"\n")?;
    }
    w.flush().with_context(|| format!("flush {}", out_path.display()))?;

    Ok(SortOutcome { bytes_in: input_bytes(inputs), sort_ms: start.elapsed().as_millis() as u64 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn builtin_sort_merges_in_byte_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let empty = dir.path().join("empty");
        fs::write(&a, "b\t2\na,2\tx\n").unwrap();
        fs::write(&b, "a\t1\na,1\ty\nB\t0").unwrap();
        fs::write(&empty, "").unwrap();
        let out = dir.path().join("sorted");

        SortBackend::Builtin.sort_files(&[a, b, empty], &out).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "B\t0\na\t1\na,1\ty\na,2\tx\nb\t2\n");
    }

    #[test]
    fn builtin_sort_of_nothing_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("sorted");
        sort_lines(&[], &out).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "");
    }

    #[test]
    fn missing_sort_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SortBackend::External("/nonexistent/mrstream-sort".into());
        assert!(backend.sort_files(&[], &dir.path().join("o")).is_err());
    }

    #[test]
    fn setting_selects_backend() {
        assert_eq!(SortBackend::from_setting("builtin"), SortBackend::Builtin);
        assert_eq!(SortBackend::from_setting("gsort"), SortBackend::External("gsort".into()));
        assert_eq!(SortBackend::default(), SortBackend::External("sort".into()));
    }
}
