use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::DeclaredType;

#[derive(Debug, Error, Diagnostic)]
pub enum SheetError {
    #[error("column {column}: cannot read {value:?} as {expected}")]
    #[diagnostic(help("fix the cell value or the column type annotation"))]
    Format {
        column: String,
        value: String,
        expected: DeclaredType,
    },

    #[error("column {column}: repetition index {index} exceeds the limit of {max}")]
    #[diagnostic(help("embedded groups are numbered from 0 in header suffixes like -1, -2"))]
    RepetitionIndex {
        column: String,
        index: usize,
        max: usize,
    },

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("invalid schema for {item_type}: {message}")]
    InvalidSchema { item_type: String, message: String },

    #[error("sheet has no header row: {0}")]
    EmptySheet(String),

    #[error("failed to read sheet: {0}")]
    Csv(String),

    #[error("missing config file psheets.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("portal request failed: {0}")]
    PortalHttp(String),

    #[error("portal returned status {status}: {message}")]
    PortalStatus { status: u16, message: String },

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("schema cache lock poisoned")]
    CachePoisoned,

    #[error("{failed} of {total} rows failed")]
    RowsFailed { failed: usize, total: usize },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl From<csv::Error> for SheetError {
    fn from(err: csv::Error) -> Self {
        SheetError::Csv(err.to_string())
    }
}
