use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MrError {
    /// Conflicting or missing mode selection, or an out-of-range knob.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("cannot access {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("external sort failed for partition {partition}: {detail}")]
    ExternalSort { partition: usize, detail: String },
}

impl MrError {
    pub fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MrError::FileAccess { path: path.into(), source }
    }
}
