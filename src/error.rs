use std::path::{Path, PathBuf};
use thiserror::Error;

/// Every failure a pipeline stage can raise. None of them is recoverable
/// mid-run: a stage either writes a complete artifact or returns one of these.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing input: `{}` does not exist", path.display())]
    MissingInput { path: PathBuf },

    #[error("format error in `{}` at {location}: {reason}", path.display())]
    Format {
        path: PathBuf,
        location: String,
        reason: String,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// A run option outside its valid range.
    #[error("invalid option: {0}")]
    Config(String),

    #[error("I/O error on `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write `{}`: {reason}", path.display())]
    Output { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn format(path: &Path, location: impl Into<String>, reason: impl ToString) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn output(path: &Path, reason: impl ToString) -> Self {
        Self::Output {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Fails with `MissingInput` unless `path` exists.
pub fn require_input(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
        })
    }
}
