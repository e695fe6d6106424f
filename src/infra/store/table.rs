//! Row table with optional JSON-lines persistence.
//!
//! The file is an append log: inserts and updates append the full row, and on load
//! the last line for each key wins. Removals and compaction rewrite the file.

use std::collections::HashMap;
use std::fs::{create_dir_all, rename, OpenOptions};
use std::hash::Hash;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::OrchestratorError;

/// Log lines allowed beyond twice the live row count before compaction.
const COMPACT_SLACK: usize = 64;

fn backend_err(e: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Backend(e.to_string())
}

/// A row with a stable identity, used to fold the append log on load.
pub trait Keyed {
    /// Key type.
    type Key: Eq + Hash;
    /// Identity of this row.
    fn key(&self) -> Self::Key;
}

/// Rows in insertion order. When backed by a file, a failed write leaves the
/// rows unchanged.
pub struct Table<T> {
    rows: Vec<T>,
    path: Option<PathBuf>,
    log_lines: usize,
}

impl<T> Table<T>
where
    T: Serialize + DeserializeOwned + Clone + Keyed,
{
    /// Table without persistence.
    #[must_use]
    pub const fn in_memory() -> Self {
        Self {
            rows: Vec::new(),
            path: None,
            log_lines: 0,
        }
    }

    /// Table persisted at `path`, loading existing rows. Corrupt lines are skipped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            create_dir_all(parent).map_err(backend_err)?;
        }
        let mut rows: Vec<T> = Vec::new();
        let mut index: HashMap<T::Key, usize> = HashMap::new();
        let mut log_lines = 0;
        if path.exists() {
            let file = OpenOptions::new().read(true).open(&path).map_err(backend_err)?;
            for (lineno, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(backend_err)?;
                if line.trim().is_empty() {
                    continue;
                }
                log_lines += 1;
                match serde_json::from_str::<T>(&line) {
                    Ok(row) => match index.get(&row.key()) {
                        Some(&at) => rows[at] = row,
                        None => {
                            index.insert(row.key(), rows.len());
                            rows.push(row);
                        }
                    },
                    Err(err) => warn!(
                        file = %path.display(),
                        line = lineno + 1,
                        error = %err,
                        "skipping corrupt row"
                    ),
                }
            }
        }
        Ok(Self {
            rows,
            path: Some(path),
            log_lines,
        })
    }

    /// All rows, oldest first.
    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    /// First row matching `pred`.
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<&T> {
        self.rows.iter().find(|r| pred(r))
    }

    /// Lines currently in the backing file, superseded versions included.
    pub const fn log_lines(&self) -> usize {
        self.log_lines
    }

    /// Append a row.
    pub fn insert(&mut self, row: T) -> Result<(), OrchestratorError> {
        self.append(std::slice::from_ref(&row))?;
        self.rows.push(row);
        Ok(())
    }

    /// Apply `f` to a copy of the first row matching `pred` and store it when `f`
    /// succeeds. Returns the stored row, or `None` when nothing matched.
    pub fn modify(
        &mut self,
        pred: impl Fn(&T) -> bool,
        f: impl FnOnce(&mut T) -> Result<(), OrchestratorError>,
    ) -> Result<Option<T>, OrchestratorError> {
        let Some(at) = self.rows.iter().position(|r| pred(r)) else {
            return Ok(None);
        };
        let mut row = self.rows[at].clone();
        f(&mut row)?;
        self.append(std::slice::from_ref(&row))?;
        self.rows[at] = row.clone();
        self.compact_if_bloated();
        Ok(Some(row))
    }

    /// Apply `f` to every row matching `pred`; returns how many matched.
    pub fn update_where(
        &mut self,
        pred: impl Fn(&T) -> bool,
        mut f: impl FnMut(&mut T),
    ) -> Result<usize, OrchestratorError> {
        let changed: Vec<(usize, T)> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| pred(r))
            .map(|(at, r)| {
                let mut row = r.clone();
                f(&mut row);
                (at, row)
            })
            .collect();
        if changed.is_empty() {
            return Ok(0);
        }
        let updated: Vec<T> = changed.iter().map(|(_, row)| row.clone()).collect();
        self.append(&updated)?;
        let count = changed.len();
        for (at, row) in changed {
            self.rows[at] = row;
        }
        self.compact_if_bloated();
        Ok(count)
    }

    /// Remove every row matching `pred`; returns how many were removed.
    pub fn remove_where(&mut self, pred: impl Fn(&T) -> bool) -> Result<usize, OrchestratorError> {
        let before = self.rows.len();
        let next: Vec<T> = self.rows.iter().filter(|r| !pred(r)).cloned().collect();
        let removed = before - next.len();
        if removed > 0 {
            self.rewrite(&next)?;
            self.rows = next;
        }
        Ok(removed)
    }

    fn append(&mut self, rows: &[T]) -> Result<(), OrchestratorError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut buf = String::new();
        for row in rows {
            buf.push_str(&serde_json::to_string(row).map_err(backend_err)?);
            buf.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(backend_err)?;
        file.write_all(buf.as_bytes()).map_err(backend_err)?;
        self.log_lines += rows.len();
        Ok(())
    }

    fn compact_if_bloated(&mut self) {
        if self.path.is_none() || self.log_lines <= self.rows.len() * 2 + COMPACT_SLACK {
            return;
        }
        let rows = self.rows.clone();
        match self.rewrite(&rows) {
            Ok(()) => debug!(rows = rows.len(), "table log compacted"),
            Err(err) => warn!(error = %err, "table compaction failed; log kept"),
        }
    }

    fn rewrite(&mut self, rows: &[T]) -> Result<(), OrchestratorError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("jsonl.tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(backend_err)?;
            let mut writer = BufWriter::new(file);
            for row in rows {
                let line = serde_json::to_string(row).map_err(backend_err)?;
                writeln!(writer, "{line}").map_err(backend_err)?;
            }
            writer.flush().map_err(backend_err)?;
        }
        rename(&tmp, path).map_err(backend_err)?;
        self.log_lines = rows.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u32,
        label: String,
    }

    impl Keyed for Row {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }
    }

    fn row(id: u32, label: &str) -> Row {
        Row {
            id,
            label: label.into(),
        }
    }

    #[test]
    fn persists_inserts_updates_and_removals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        {
            let mut table = Table::open(&path).unwrap();
            table.insert(row(1, "a")).unwrap();
            table.insert(row(2, "b")).unwrap();
            table.insert(row(3, "c")).unwrap();
            assert_eq!(table.update_where(|r| r.id == 2, |r| r.label = "B".into()).unwrap(), 1);
            assert_eq!(table.remove_where(|r| r.id == 1).unwrap(), 1);
        }
        let table: Table<Row> = Table::open(&path).unwrap();
        assert_eq!(table.rows(), &[row(2, "B"), row(3, "c")]);
    }

    #[test]
    fn updates_append_and_last_line_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        {
            let mut table = Table::open(&path).unwrap();
            table.insert(row(1, "a")).unwrap();
            table.insert(row(2, "b")).unwrap();
            for label in ["x", "y", "z"] {
                table.modify(|r| r.id == 1, |r| {
                    r.label = label.into();
                    Ok(())
                })
                .unwrap();
            }
            assert_eq!(table.log_lines(), 5);
        }
        let table: Table<Row> = Table::open(&path).unwrap();
        assert_eq!(table.rows(), &[row(1, "z"), row(2, "b")]);
        assert_eq!(table.log_lines(), 5);
    }

    #[test]
    fn bloated_log_is_compacted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        let mut table = Table::open(&path).unwrap();
        table.insert(row(1, "a")).unwrap();
        for i in 0..(COMPACT_SLACK + 10) {
            table.update_where(|r| r.id == 1, |r| r.label = i.to_string()).unwrap();
        }
        assert!(table.log_lines() <= 2 + COMPACT_SLACK + 1);
        drop(table);
        let table: Table<Row> = Table::open(&path).unwrap();
        assert_eq!(table.rows(), &[row(1, &(COMPACT_SLACK + 9).to_string())]);
    }

    #[test]
    fn failed_modify_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        let mut table = Table::open(&path).unwrap();
        table.insert(row(1, "a")).unwrap();
        let err = table
            .modify(|r| r.id == 1, |r| {
                r.label = "changed".into();
                Err(OrchestratorError::InvalidRequest("refused".into()))
            })
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
        assert_eq!(table.rows(), &[row(1, "a")]);
        assert_eq!(table.log_lines(), 1);
        assert_eq!(table.modify(|r| r.id == 9, |_| Ok(())).unwrap(), None);
    }

    #[test]
    fn no_match_is_not_a_write() {
        let mut table: Table<Row> = Table::in_memory();
        table.insert(row(1, "a")).unwrap();
        assert_eq!(table.update_where(|r| r.id == 9, |r| r.label.clear()).unwrap(), 0);
        assert_eq!(table.remove_where(|r| r.id == 9).unwrap(), 0);
        assert_eq!(table.find(|r| r.id == 1), Some(&row(1, "a")));
    }
}
