// error.rs

use thiserror::Error;

/// Failures that abort a parse. Row-level anomalies (unmapped probes,
/// samples on undeclared platforms) are absorbed and logged instead.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{section} table opened at line {begin_line} was never closed")]
    UnclosedTable { section: String, begin_line: usize },

    #[error(
        "line {line}: row in {section} has {found} columns but column {index} was requested"
    )]
    ShortRow {
        line: usize,
        section: String,
        index: usize,
        found: usize,
    },

    #[error("column resolution cancelled for {section}")]
    Cancelled { section: String },

    #[error("could not detect the {what} column for {section}")]
    ColumnDetection { section: String, what: &'static str },
}
