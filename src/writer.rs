//! Buffered CSV writer for the active output file.
//!
//! Samples are serialized against the header frozen at file creation and
//! accumulated in a row buffer; the buffer is appended to disk in one pass
//! when it reaches the row threshold or the flush interval elapses. The
//! writer never truncates an existing file, and a failed flush keeps the
//! buffered rows so they reach the replacement file after the scheduler
//! forces a rotation.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::core::{PointKey, Sample};
use crate::error::{AppResult, LoggerError};

/// State of the file currently receiving appends.
pub struct ActiveFile {
    path: PathBuf,
    header: Vec<PointKey>,
    created_at: Instant,
}

impl ActiveFile {
    /// Path of the active file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column keys frozen at creation time.
    pub fn header(&self) -> &[PointKey] {
        &self.header
    }

    /// Monotonic creation instant; authoritative for rotation age.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Current on-disk size; errors if the path vanished.
    pub fn byte_size(&self) -> AppResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

/// Row-buffered appender owning the active file handle.
pub struct BufferedWriter {
    active: Option<ActiveFile>,
    handle: Option<csv::Writer<File>>,
    rows: Vec<Vec<String>>,
    flush_rows: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl BufferedWriter {
    /// Create a writer with the given flush thresholds.
    pub fn new(flush_rows: usize, flush_interval: Duration) -> Self {
        Self {
            active: None,
            handle: None,
            rows: Vec::new(),
            flush_rows: flush_rows.max(1),
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    /// Switch the active file, creating it with a header row if absent.
    ///
    /// Idempotent on an existing file: the file is opened for append and its
    /// contents are never truncated or rewritten.
    pub fn set_file(&mut self, path: &Path, header: Vec<PointKey>) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut handle = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            let mut columns = Vec::with_capacity(header.len() + 1);
            columns.push("timestamp".to_string());
            columns.extend(header.iter().map(|k| k.to_string()));
            handle.write_record(&columns)?;
            handle.flush()?;
            info!(path = %path.display(), columns = columns.len(), "created output file");
        } else {
            debug!(path = %path.display(), "reopened existing output file");
        }

        self.active = Some(ActiveFile {
            path: path.to_path_buf(),
            header,
            created_at: Instant::now(),
        });
        self.handle = Some(handle);
        Ok(())
    }

    /// Serialize a sample against the active header and buffer the row.
    ///
    /// Header keys absent from the sample become empty cells; sample keys
    /// absent from the header are dropped. Triggers a flush when the buffer
    /// reaches the row threshold or the flush interval has elapsed.
    pub fn add_record(&mut self, sample: &Sample) -> AppResult<()> {
        let active = self.active.as_ref().ok_or(LoggerError::WriterNotInitialized)?;

        let mut row = Vec::with_capacity(active.header.len() + 1);
        row.push(sample.timestamp.to_rfc3339());
        for key in &active.header {
            let cell = match sample.values.get(key) {
                Some(Some(value)) => value.to_string(),
                _ => String::new(),
            };
            row.push(cell);
        }
        self.rows.push(row);

        if self.rows.len() >= self.flush_rows || self.last_flush.elapsed() >= self.flush_interval {
            self.flush()?;
        }
        Ok(())
    }

    /// Append all buffered rows to the active file in one pass.
    ///
    /// No-op on an empty buffer. On failure the rows are retained so a
    /// subsequent flush (typically after forced rotation) can persist them.
    pub fn flush(&mut self) -> AppResult<()> {
        if self.rows.is_empty() {
            return Ok(());
        }
        let handle = self.handle.as_mut().ok_or(LoggerError::WriterNotInitialized)?;

        for row in &self.rows {
            handle.write_record(row)?;
        }
        handle.flush()?;

        debug!(rows = self.rows.len(), "flushed row buffer");
        self.rows.clear();
        self.last_flush = Instant::now();
        Ok(())
    }

    /// State of the file currently receiving appends.
    pub fn active_file(&self) -> Option<&ActiveFile> {
        self.active.as_ref()
    }

    /// Number of rows waiting for the next flush.
    pub fn pending_rows(&self) -> usize {
        self.rows.len()
    }

    /// Swap the active handle for one that cannot accept writes, standing in
    /// for a pulled drive or revoked descriptor.
    #[cfg(test)]
    pub(crate) fn break_active_handle(&mut self) -> AppResult<()> {
        let active = self.active.as_ref().ok_or(LoggerError::WriterNotInitialized)?;
        let file = OpenOptions::new().read(true).open(active.path())?;
        self.handle = Some(
            csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file),
        );
        Ok(())
    }
}
