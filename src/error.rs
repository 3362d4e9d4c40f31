//! Error taxonomy for trace ingestion and analysis
//!
//! Only conditions that abort a run are errors. Missing clock headers,
//! unmatched lines and exhausted streams are ordinary values elsewhere
//! (identity clocks, `Line::Unmatched`, `Pending::Exhausted`).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors raised by the library
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Cannot read {}: {source}", path.display())]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid core count {0}: must be even and at least 2")]
    InvalidCoreCount(usize),

    #[error("Core {core} is outside the configured range 0..{num_cores}")]
    CoreOutOfRange { core: usize, num_cores: usize },

    #[error("Invalid thread pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TraceError {
    /// Wrap an I/O failure with the path that caused it
    pub fn unreadable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TraceError::UnreadableFile {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;
