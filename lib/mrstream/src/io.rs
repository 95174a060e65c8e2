use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::Hasher;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::error::MrError;

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    fs::create_dir_all(path.as_ref()).with_context(|| format!("create_dir_all {}", path.as_ref().display()))
}

pub fn list_files_recursive(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

/// Directories expand to the files beneath them; anything else is kept
/// as given so a missing input surfaces when its mapper opens it.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut all_files = Vec::new();
    for inp in inputs {
        if inp.is_dir() {
            let mut files = list_files_recursive(inp)?;
            all_files.append(&mut files);
        } else {
            all_files.push(inp.clone());
        }
    }
    Ok(all_files)
}

/// Bucket for a reduceKey. `DefaultHasher::new()` uses fixed keys, so every
/// worker of a run agrees on the assignment. Its algorithm may change between
/// Rust releases; buckets are only comparable across binaries built with the
/// same toolchain.
pub fn hash_to_partition(reduce_key: &str, num_partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    hasher.write(reduce_key.as_bytes());
    (hasher.finish() % num_partitions.max(1) as u64) as usize
}

pub fn open_writer(path: impl AsRef<Path>) -> Result<BufWriter<File>, MrError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| MrError::file_access(parent, e))?;
    }
    let file = File::create(path).map_err(|e| MrError::file_access(path, e))?;
    Ok(BufWriter::new(file))
}

pub fn open_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, MrError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| MrError::file_access(path, e))?;
    Ok(BufReader::new(file))
}

pub fn remove_quietly(paths: &[PathBuf]) {
    for p in paths {
        if let Err(e) = fs::remove_file(p) {
            tracing::debug!(path = %p.display(), error = %e, "remove failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn expands_directories_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("nested/c.txt"), "c").unwrap();
        let single = dir.path().join("missing.txt");

        let files = expand_inputs(&[dir.path().to_path_buf(), single.clone()]).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.txt"), dir.path().join("b.txt"), dir.path().join("nested/c.txt"), single]
        );
    }

    #[test]
    fn single_partition_takes_everything() {
        for key in ["", "a", "zzz", "with,comma"] {
            assert_eq!(hash_to_partition(key, 1), 0);
        }
    }

    proptest! {
        #[test]
        fn partition_is_deterministic_and_in_range(key in any::<String>(), n in 1usize..64) {
            let p = hash_to_partition(&key, n);
            prop_assert!(p < n);
            prop_assert_eq!(p, hash_to_partition(&key.clone(), n));
        }
    }
}
