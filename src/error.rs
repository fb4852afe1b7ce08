use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SweepError>;

// ---------------------------------------------------------------------------
// ParseError – one malformed row
// ---------------------------------------------------------------------------

/// A row the parser could not turn into a record.
///
/// Recoverable in lenient mode (the row is skipped and counted), fatal in
/// strict mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseError {
    /// 1-based data row ordinal (the header row is not counted).
    pub row: u64,
    /// 1-based line in the source where the row starts.
    pub line: u64,
    pub reason: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {} (line {}): {}", self.row, self.line, self.reason)
    }
}

impl std::error::Error for ParseError {}

// ---------------------------------------------------------------------------
// SweepError
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("cannot open source {}: {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read error: {0}")]
    Io(#[from] io::Error),

    #[error("parse error at {0}")]
    Parse(#[from] ParseError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("processing cancelled")]
    Cancelled,

    #[error("inconsistent counts: {cleaned} cleaned records out of {total}")]
    InvalidCounts { total: u64, cleaned: u64 },

    #[error("write error: {0}")]
    Write(#[from] csv::Error),
}

impl SweepError {
    /// Whether this error came from cooperative cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SweepError::Cancelled)
    }
}
