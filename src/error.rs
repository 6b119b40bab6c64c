//! Error types for a pipeline run.
//!
//! Each stage reports failures through [`PipelineError`]. The warehouse layer
//! below it works with `anyhow` and context strings; the stage functions wrap
//! those into the typed variants so the run can be reported by kind.

use arrow::error::ArrowError;
use thiserror::Error;

/// Everything that can end a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing or invalid settings, or an output location that cannot be created
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The source table could not be queried or its rows materialized
    #[error("failed to read {table}: {source:#}")]
    DataAccess {
        table: String,
        source: anyhow::Error,
    },

    /// A column the cleaning rules depend on is not present
    #[error("required column `{column}` not found in extracted data")]
    MissingColumn { column: String },

    /// A value that must be an integer is not one
    #[error("cannot coerce value {value:?} in column `{column}` (row {row}) to an integer")]
    TypeCoercion {
        column: String,
        row: usize,
        value: String,
    },

    /// The destination write failed or could not be confirmed
    #[error("failed to write {table}: {source:#}")]
    Write {
        table: String,
        source: anyhow::Error,
    },

    /// An in-memory table operation failed
    #[error("table operation failed: {0}")]
    Frame(#[from] ArrowError),
}

/// Coarse classification of a [`PipelineError`], used for exit statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    DataAccess,
    DataQuality,
    Write,
    Internal,
}

impl ErrorKind {
    /// Process exit status reported for a run that failed with this kind.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Internal => 1,
            ErrorKind::Configuration => 2,
            ErrorKind::DataAccess => 3,
            ErrorKind::DataQuality => 4,
            ErrorKind::Write => 5,
        }
    }
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration { .. } => ErrorKind::Configuration,
            PipelineError::DataAccess { .. } => ErrorKind::DataAccess,
            PipelineError::MissingColumn { .. } | PipelineError::TypeCoercion { .. } => {
                ErrorKind::DataQuality
            }
            PipelineError::Write { .. } => ErrorKind::Write,
            PipelineError::Frame(_) => ErrorKind::Internal,
        }
    }
}
