//! Append-only telemetry log.
//!
//! Layout: `Timestamp,<labels...>,Valve_Position`, one line per record. Each
//! line is encoded in memory with the `csv` writer (fields containing commas or
//! quotes are quoted) and handed to the file in a single `write_all`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::RigError;
use crate::telemetry::TelemetryRecord;
use crate::util::format_timestamp;

/// Destination for telemetry records.
pub trait RecordSink {
    fn append(&mut self, record: &TelemetryRecord) -> Result<(), RigError>;
    fn flush(&mut self) -> Result<(), RigError>;
    /// Flush and release the handle. Appending afterwards is an error.
    fn close(&mut self) -> Result<(), RigError>;
}

pub const TIMESTAMP_HEADER: &str = "Timestamp";
pub const VALVE_HEADER: &str = "Valve_Position";

fn log_err(path: &Path, what: &str, e: impl std::fmt::Display) -> RigError {
    RigError::Log(format!("{what} {}: {e}", path.display()))
}

/// Encode one CSV line, `\n` terminated.
pub fn encode_line<I, S>(fields: I) -> Result<Vec<u8>, RigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut w = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    w.write_record(fields)
        .map_err(|e| RigError::Log(e.to_string()))?;
    w.into_inner().map_err(|e| RigError::Log(e.to_string()))
}

pub fn header_fields(labels: &[String]) -> Vec<&str> {
    std::iter::once(TIMESTAMP_HEADER)
        .chain(labels.iter().map(String::as_str))
        .chain(std::iter::once(VALVE_HEADER))
        .collect()
}

pub fn record_fields(record: &TelemetryRecord) -> Vec<String> {
    std::iter::once(format_timestamp(record.timestamp))
        .chain(record.readings.iter().map(|r| r.raw_response.clone()))
        .chain(std::iter::once(record.valve_state.to_string()))
        .collect()
}

/// CSV file opened in append mode.
#[derive(Debug)]
pub struct CsvLog {
    path: PathBuf,
    file: Option<File>,
    columns: usize,
}

impl CsvLog {
    /// Open (creating parent directories) and write the header only when the
    /// file is empty, so restarts keep one header per file.
    pub fn open(path: &Path, labels: &[String]) -> Result<Self, RigError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| log_err(dir, "create directory", e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| log_err(path, "open", e))?;
        let len = file
            .metadata()
            .map_err(|e| log_err(path, "stat", e))?
            .len();
        if len == 0 {
            let header = encode_line(header_fields(labels))?;
            file.write_all(&header)
                .map_err(|e| log_err(path, "write header to", e))?;
            tracing::info!(path = %path.display(), "telemetry log created");
        } else {
            tracing::info!(path = %path.display(), bytes = len, "appending to existing telemetry log");
        }
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            columns: labels.len() + 2,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for CsvLog {
    fn append(&mut self, record: &TelemetryRecord) -> Result<(), RigError> {
        let fields = record_fields(record);
        if fields.len() != self.columns {
            return Err(RigError::Log(format!(
                "record has {} columns, log has {}",
                fields.len(),
                self.columns
            )));
        }
        let line = encode_line(&fields)?;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| RigError::Log("log is closed".to_string()))?;
        file.write_all(&line)
            .map_err(|e| log_err(&self.path, "append to", e))
    }

    fn flush(&mut self) -> Result<(), RigError> {
        match self.file.as_mut() {
            Some(f) => f.flush().map_err(|e| log_err(&self.path, "flush", e)),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), RigError> {
        let Some(mut f) = self.file.take() else {
            return Ok(());
        };
        f.flush().map_err(|e| log_err(&self.path, "flush", e))?;
        f.sync_all().map_err(|e| log_err(&self.path, "sync", e))?;
        tracing::debug!(path = %self.path.display(), "telemetry log closed");
        Ok(())
    }
}
