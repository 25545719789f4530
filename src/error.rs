//! Error types for session setup and teardown
//!
//! Only setup-time failures surface as errors. Per-record conditions (foreign
//! payloads, unmatched stack walks, missing symbols) are absorbed by the
//! dispatcher and show up in its statistics instead.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a monitoring run
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to create output file {path}: {source}")]
    OutputCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read configuration: {0}")]
    Config(String),

    #[error("Invalid capture record on line {line}: {reason}")]
    Capture { line: usize, reason: String },

    #[error("Symbol backend error: {0}")]
    Symbols(String),

    #[error("Trace session error: {0}")]
    Session(String),

    #[error("Event ingestion ended before the image rundown completed")]
    RundownIncomplete,

    #[error("Ingestion thread panicked")]
    IngestionPanicked,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;
