//! JSON-lines ledger sink.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::core::{LedgerEntry, LedgerSink, OrchestratorError};

/// Appends every ledger entry as one JSON line. Write failures are logged.
pub struct JsonlLedgerSink {
    path: PathBuf,
    file: File,
}

impl JsonlLedgerSink {
    /// Open `<dir>/ledger.jsonl` for appending.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(|e| OrchestratorError::Backend(e.to_string()))?;
        let path = dir.join("ledger.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| OrchestratorError::Backend(e.to_string()))?;
        Ok(Self { path, file })
    }
}

impl LedgerSink for JsonlLedgerSink {
    fn record(&mut self, entry: LedgerEntry) {
        let written = serde_json::to_string(&entry)
            .map_err(|e| e.to_string())
            .and_then(|line| writeln!(self.file, "{line}").map_err(|e| e.to_string()));
        if let Err(err) = written {
            warn!(run_id = %entry.run_id, error = %err, "failed to append ledger entry");
        }
    }

    fn entries(&self) -> Vec<LedgerEntry> {
        let Ok(file) = File::open(&self.path) else {
            return Vec::new();
        };
        BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transition;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        {
            let mut sink = JsonlLedgerSink::open(dir.path()).unwrap();
            for transition in [Transition::Enqueued, Transition::Started] {
                sink.record(LedgerEntry {
                    run_id,
                    job_id: None,
                    transition,
                    at: Utc::now(),
                    duration_secs: None,
                    error: None,
                });
            }
        }
        let sink = JsonlLedgerSink::open(dir.path()).unwrap();
        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].transition, Transition::Started);
    }
}
