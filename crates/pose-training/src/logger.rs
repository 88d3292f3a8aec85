//! Replayable run log.
//!
//! Every progress line of a run goes to two places: the live progress stream
//! and a durable `log` file in the run directory. The in-memory history is
//! embedded in each checkpoint so a resumed run continues the same record.

use crate::error::TrainingResult;
use crate::progress::{ProgressEvent, ProgressSink};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const LOG_FILENAME: &str = "log";

/// One human-readable progress line. Entries carry no timestamp; their
/// position in the history is their ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogEntry(String);

impl LogEntry {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Append-only, chronologically ordered sequence of log entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogHistory(Vec<LogEntry>);

impl LogHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.0.push(entry);
    }

    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.0
    }

    #[must_use]
    pub fn last(&self) -> Option<&LogEntry> {
        self.0.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LogEntry> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for LogHistory {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(LogEntry::new).collect())
    }
}

/// Dual-sink logger for a single run.
pub struct RunLogger {
    path: PathBuf,
    file: LineWriter<File>,
    history: LogHistory,
    sink: Arc<dyn ProgressSink>,
}

impl RunLogger {
    /// Creates the run directory if needed and opens a fresh `log` file in it.
    pub fn create(dir: &Path, sink: Arc<dyn ProgressSink>) -> TrainingResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILENAME);
        let file = LineWriter::new(File::create(&path)?);
        Ok(Self { path, file, history: LogHistory::new(), sink })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn history(&self) -> &LogHistory {
        &self.history
    }

    pub fn record(&mut self, message: impl Into<String>) -> TrainingResult<()> {
        let entry = LogEntry::new(message);
        self.sink.on_event(ProgressEvent::Message { message: entry.to_string() });
        writeln!(self.file, "{entry}")?;
        self.history.push(entry);
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> LogHistory {
        self.history.clone()
    }

    /// Replaces the history with `snapshot`, shows its latest entry on the
    /// live stream and rewrites the log file so it holds the whole history.
    pub fn restore(&mut self, snapshot: LogHistory) -> TrainingResult<()> {
        let mut file = LineWriter::new(File::create(&self.path)?);
        for entry in snapshot.iter() {
            writeln!(file, "{entry}")?;
        }
        file.flush()?;
        self.file = file;

        if let Some(last) = snapshot.last() {
            self.sink.on_event(ProgressEvent::Message { message: last.to_string() });
        }
        self.history = snapshot;
        Ok(())
    }
}

impl std::fmt::Debug for RunLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLogger")
            .field("path", &self.path)
            .field("entries", &self.history.len())
            .finish_non_exhaustive()
    }
}
