//! Done-task journal
//!
//! Append-only JSON Lines log of completed tasks, one file per location under
//! `<data_dir>/journal/`. Every successful task is appended and flushed before
//! the executor moves on; at the start of the next cycle the journal is
//! replayed onto the saved state and then truncated.
//!
//! ## Reading rules
//!
//! - Lines shorter than 4 characters are skipped.
//! - An unparseable final line is a torn write and is skipped with a warning.
//! - An unparseable line followed by valid lines is corruption.

use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use twinsync_core::domain::{DoneTask, LocationId};

use crate::SyncError;

/// Lines shorter than this are never parsed
const MIN_LINE_LEN: usize = 4;

/// Journal of one location
#[derive(Debug)]
pub struct DoneTaskJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DoneTaskJournal {
    /// Journal stored at `<data_dir>/journal/<location>.jsonl`
    pub fn for_location(data_dir: &Path, location: &LocationId) -> Self {
        Self::at(data_dir.join("journal").join(format!("{location}.jsonl")))
    }

    /// Journal stored at an explicit path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and flushes it to disk
    #[instrument(skip(self, done), fields(action = %done.action(), task = %done.task.id()))]
    pub async fn append(&self, done: &DoneTask) -> Result<(), SyncError> {
        let mut line = serde_json::to_string(done)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Reads every record
    ///
    /// A missing journal reads as empty.
    ///
    /// # Errors
    /// Returns [`SyncError::JournalCorrupted`] when an unparseable line is
    /// followed by valid content.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<Vec<DoneTask>, SyncError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let records = parse_lines(&self.path, &text)?;
        debug!(records = records.len(), "Journal loaded");
        Ok(records)
    }

    /// Removes the journal once its records are folded into saved state
    pub async fn truncate(&self) -> Result<(), SyncError> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_lines(path: &Path, text: &str) -> Result<Vec<DoneTask>, SyncError> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| line.len() >= MIN_LINE_LEN)
        .collect();

    let mut records = Vec::with_capacity(lines.len());
    for (idx, (number, line)) in lines.iter().enumerate() {
        match serde_json::from_str::<DoneTask>(line) {
            Ok(record) => records.push(record),
            Err(e) if idx + 1 == lines.len() => {
                warn!(path = %path.display(), line = number, error = %e, "Skipping torn journal tail");
            }
            Err(e) => {
                return Err(SyncError::JournalCorrupted {
                    path: path.to_path_buf(),
                    line: *number,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(records)
}
