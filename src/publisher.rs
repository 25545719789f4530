//! CSV output for correlated secure-mode entries
//!
//! One row per joined entry:
//!
//! ```text
//! TIMESTAMP,SECURE CALL NUMBER,PROCESS ID,THREAD ID,CALL STACK
//! 5000,SECURESERVICE_SEVEN (7),100,200,driver.sys + 1280|
//! ```
//!
//! Writes are synchronous and unbuffered per row. A shared write-permission
//! flag is checked before every row; once cleared, rows are counted as
//! suppressed instead of written.

use crate::correlation::PendingEntry;
use crate::error::{MonitorError, Result};
use crate::symbols::SymbolSession;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Column header line (without newline)
pub const CSV_HEADER: &str = "TIMESTAMP,SECURE CALL NUMBER,PROCESS ID,THREAD ID,CALL STACK";

/// Rendered when the call number has no known name
pub const UNKNOWN_CALL_NAME: &str = "UNKNOWN";

/// A joined entry ready for output; built per row and not retained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedRecord {
    pub timestamp: i64,
    pub call_name: String,
    pub call_number: u16,
    pub process_id: u32,
    pub thread_id: u32,
    /// Pipe-terminated formatted frames
    pub stack: String,
}

impl CorrelatedRecord {
    /// Escape CSV field (handle commas, quotes, newlines)
    fn escape_field(field: &str) -> String {
        if field.contains(',') || field.contains('"') || field.contains('\n') {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    /// Format as a CSV row (without newline)
    pub fn to_csv_row(&self) -> String {
        let call = format!("{} ({})", self.call_name, self.call_number);
        [
            self.timestamp.to_string(),
            Self::escape_field(&call),
            self.process_id.to_string(),
            self.thread_id.to_string(),
            Self::escape_field(&self.stack),
        ]
        .join(",")
    }
}

/// Row counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub rows_written: u64,
    /// Rows dropped because writing was no longer permitted
    pub rows_suppressed: u64,
    pub write_errors: u64,
}

/// Serializes correlated records to the output sink
pub struct RecordPublisher {
    sink: Box<dyn Write + Send>,
    can_write: Arc<AtomicBool>,
    stats: PublisherStats,
}

impl RecordPublisher {
    /// Wrap a sink and write the header line
    pub fn new(mut sink: Box<dyn Write + Send>, can_write: Arc<AtomicBool>) -> Result<Self> {
        writeln!(sink, "{}", CSV_HEADER)?;
        sink.flush()?;
        Ok(Self {
            sink,
            can_write,
            stats: PublisherStats::default(),
        })
    }

    /// Create (or truncate) the output file at `path` and write the header
    pub fn create(path: &Path, can_write: Arc<AtomicBool>) -> Result<Self> {
        let file = File::create(path).map_err(|source| MonitorError::OutputCreate {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(Box::new(file), can_write)
    }

    /// Resolve the call name, build the row and write it
    ///
    /// Returns whether a row reached the sink. Write failures are logged and
    /// counted; they never stop ingestion.
    pub fn publish(&mut self, entry: &PendingEntry, stack: String, symbols: &mut SymbolSession) -> bool {
        if !self.can_write.load(Ordering::SeqCst) {
            self.stats.rows_suppressed += 1;
            return false;
        }

        let call_name = symbols
            .call_name(entry.call_number)
            .unwrap_or(UNKNOWN_CALL_NAME)
            .to_string();

        let record = CorrelatedRecord {
            timestamp: entry.timestamp,
            call_name,
            call_number: entry.call_number,
            process_id: entry.process_id,
            thread_id: entry.thread_id,
            stack,
        };

        let row = record.to_csv_row();
        let written = writeln!(self.sink, "{}", row).and_then(|()| self.sink.flush());
        match written {
            Ok(()) => {
                self.stats.rows_written += 1;
                true
            }
            Err(e) => {
                self.stats.write_errors += 1;
                tracing::warn!("failed to write correlated record: {}", e);
                false
            }
        }
    }

    pub fn stats(&self) -> PublisherStats {
        self.stats
    }

    /// Flush and release the sink
    pub fn close(mut self) -> Result<PublisherStats> {
        self.sink.flush()?;
        Ok(self.stats)
    }
}
