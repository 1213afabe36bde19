//! Unified error types for the crate using `thiserror`.
//!
//! Configuration errors abort a run before any stage starts. Source errors
//! are confined to the task that hit them; the stage driver collects them
//! and sibling tasks keep running.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelFitError {
    /// Malformed generation specification, pair list, or filter pattern.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The variant source could not be opened or positioned for one task.
    #[error("cannot read variant source {}: {message}", path.display())]
    Source { path: PathBuf, message: String },

    /// A row in an intermediate or pre-tabulated file failed to decode.
    #[error("parse error in {} at row {row}: {message}", path.display())]
    Parse {
        path: PathBuf,
        row: usize,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("htslib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),
}

/// Type alias for Results using RelFitError
pub type Result<T> = std::result::Result<T, RelFitError>;

impl RelFitError {
    /// Create a configuration error with a message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a source error for a path
    pub fn source(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Source {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a parse error for a row in a file
    pub fn parse(path: impl Into<PathBuf>, row: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            row,
            message: message.into(),
        }
    }
}
