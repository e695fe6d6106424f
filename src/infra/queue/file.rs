//! File-backed run queue.
//!
//! Queued runs are kept in a JSON-lines file so they survive a restart. Pushes
//! append one line; pops rewrite the file with the remaining entries.

use std::collections::VecDeque;
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::{OrchestratorError, QueueBackend, QueuedRun};

fn backend_err(e: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Backend(e.to_string())
}

/// Durable FIFO stored as `<dir>/<stream>.jsonl`.
pub struct FileQueue {
    path: PathBuf,
    stream: String,
    runs: VecDeque<QueuedRun>,
}

impl FileQueue {
    /// Open or create the queue, loading any runs left by a previous process.
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub fn open(dir: impl AsRef<Path>, stream: impl Into<String>) -> Result<Self, OrchestratorError> {
        let path = dir.as_ref().to_path_buf();
        create_dir_all(&path).map_err(backend_err)?;
        let mut queue = Self {
            path,
            stream: stream.into(),
            runs: VecDeque::new(),
        };
        queue.load_from_disk()?;
        if !queue.runs.is_empty() {
            info!(stream = %queue.stream, pending = queue.runs.len(), "recovered queued runs");
        }
        Ok(queue)
    }

    fn file_path(&self) -> PathBuf {
        self.path.join(format!("{}.jsonl", self.stream))
    }

    fn load_from_disk(&mut self) -> Result<(), OrchestratorError> {
        let file_path = self.file_path();
        if !file_path.exists() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .read(true)
            .open(&file_path)
            .map_err(backend_err)?;
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(backend_err)?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<QueuedRun>(&line) {
                Ok(run) => self.runs.push_back(run),
                Err(err) => warn!(line = lineno + 1, error = %err, "skipping corrupt queue entry"),
            }
        }
        Ok(())
    }

    fn append_to_disk(&self, run: &QueuedRun) -> Result<(), OrchestratorError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path())
            .map_err(backend_err)?;
        let line = serde_json::to_string(run).map_err(backend_err)?;
        writeln!(file, "{line}").map_err(backend_err)
    }

    fn rewrite_disk(&self) -> Result<(), OrchestratorError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.file_path())
            .map_err(backend_err)?;
        for run in &self.runs {
            let line = serde_json::to_string(run).map_err(backend_err)?;
            writeln!(file, "{line}").map_err(backend_err)?;
        }
        Ok(())
    }
}

impl QueueBackend for FileQueue {
    fn push(&mut self, run: QueuedRun) -> Result<(), OrchestratorError> {
        self.append_to_disk(&run)?;
        self.runs.push_back(run);
        Ok(())
    }

    fn pop(&mut self) -> Result<Option<QueuedRun>, OrchestratorError> {
        let run = self.runs.pop_front();
        if run.is_some() {
            // A failed rewrite leaves the line on disk for re-delivery after a restart.
            if let Err(err) = self.rewrite_disk() {
                warn!(error = %err, "failed to persist queue after pop");
            }
        }
        Ok(run)
    }

    fn pending(&self) -> Vec<QueuedRun> {
        self.runs.iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.runs.len()
    }
}
