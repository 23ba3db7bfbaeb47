use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures while reading login records, writing the event log or fixing paths.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("line {line}: missing column {column}")]
    MissingColumn { line: u64, column: usize },
    #[error("line {line}: invalid timestamp '{value}': {source}")]
    Timestamp {
        line: u64,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("line {line}: invalid success token '{value}'")]
    SuccessToken { line: u64, value: String },
    #[error("output {} would overwrite the input", .0.display())]
    OutputIsInput(PathBuf),
    #[error("malformed event line: {reason}")]
    MalformedLine { reason: String },
}

impl ConvertError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        ConvertError::MalformedLine {
            reason: reason.into(),
        }
    }
}
