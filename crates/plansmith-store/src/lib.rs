use anyhow::{Context, Result};
use plansmith_core::{ChangeRecord, runtime_dir};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk form of the change log.
#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryJournal {
    current_checkpoint: usize,
    records: Vec<ChangeRecord>,
}

/// Append-only log of file changes with a checkpoint cursor.
///
/// Every write, accept, reject, revert and redo that touches the workspace
/// goes through this type. Records are never edited or removed once appended;
/// reverting only moves the cursor and rewrites files.
#[derive(Debug)]
pub struct ChangeCheckpointStore {
    workspace: PathBuf,
    history: Vec<ChangeRecord>,
    current_checkpoint: usize,
}

impl ChangeCheckpointStore {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            history: Vec::new(),
            current_checkpoint: 0,
        }
    }

    pub fn journal_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("history.json")
    }

    /// Restores a previously saved log, or starts empty when none exists.
    pub fn load(workspace: &Path) -> Result<Self> {
        let path = Self::journal_path(workspace);
        let mut store = Self::new(workspace);
        if !path.exists() {
            return Ok(store);
        }
        let raw = fs::read_to_string(&path)?;
        let journal: HistoryJournal = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt change journal at {}", path.display()))?;
        store.current_checkpoint = journal.current_checkpoint.min(journal.records.len());
        store.history = journal.records;
        Ok(store)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::journal_path(&self.workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid journal path"))?,
        )?;
        let journal = HistoryJournal {
            current_checkpoint: self.current_checkpoint,
            records: self.history.clone(),
        };
        fs::write(path, serde_json::to_vec_pretty(&journal)?)?;
        Ok(())
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn history(&self) -> &[ChangeRecord] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn current_checkpoint(&self) -> usize {
        self.current_checkpoint
    }

    /// Appends a record and moves the cursor to the end of the log.
    pub fn record(&mut self, mut record: ChangeRecord) -> usize {
        record.file_path = self.normalize_key(&record.file_path);
        self.history.push(record);
        self.current_checkpoint = self.history.len();
        self.history.len() - 1
    }

    /// Writes `content` to `rel_path` and records the transition.
    pub fn apply_write(&mut self, rel_path: &str, content: &str) -> Result<ChangeRecord> {
        let record = self.capture(rel_path, content)?;
        self.write_file(&record.file_path, content)?;
        self.record(record.clone());
        Ok(record)
    }

    /// Records a pending change without touching the file; `accept` applies it.
    pub fn stage(&mut self, rel_path: &str, content: &str) -> Result<ChangeRecord> {
        let record = self.capture(rel_path, content)?;
        self.record(record.clone());
        Ok(record)
    }

    /// Writes the `after` side of the most recent record for `path`.
    pub fn accept(&mut self, path: &str) -> Result<bool> {
        let Some(record) = self.latest_record(path).cloned() else {
            return Ok(false);
        };
        self.write_file(&record.file_path, &record.after)?;
        Ok(true)
    }

    /// Writes the `before` side of the most recent record for `path`, removing
    /// the file when that record created it.
    pub fn reject(&mut self, path: &str) -> Result<bool> {
        let Some(record) = self.latest_record(path).cloned() else {
            return Ok(false);
        };
        self.restore_before(&record)?;
        Ok(true)
    }

    pub fn revert_to_checkpoint(&mut self, index: i64) -> Result<bool> {
        Ok(self.revert(index)?.is_some())
    }

    /// Undoes every record at or after `index`. Each touched file is written
    /// once, to the `before` of its earliest record in that range. Returns the
    /// restored paths, or `None` when `index` is outside `0..=len`.
    pub fn revert(&mut self, index: i64) -> Result<Option<Vec<String>>> {
        let Some(index) = self.checked_index(index) else {
            return Ok(None);
        };
        let mut seen = HashSet::new();
        let mut earliest = Vec::new();
        for record in &self.history[index..] {
            if seen.insert(record.file_path.as_str()) {
                earliest.push(record.clone());
            }
        }
        for record in &earliest {
            self.restore_before(record)?;
        }
        self.current_checkpoint = index;
        Ok(Some(earliest.into_iter().map(|r| r.file_path).collect()))
    }

    pub fn redo_to_checkpoint(&mut self, index: i64) -> Result<bool> {
        Ok(self.redo(index)?.is_some())
    }

    /// Replays records between the cursor and `index` so that a revert can be
    /// undone. Each file ends at the `after` of its latest replayed record.
    pub fn redo(&mut self, index: i64) -> Result<Option<Vec<String>>> {
        let Some(index) = self.checked_index(index) else {
            return Ok(None);
        };
        if index < self.current_checkpoint {
            return Ok(None);
        }
        let mut order: Vec<String> = Vec::new();
        let mut latest: Vec<ChangeRecord> = Vec::new();
        for record in &self.history[self.current_checkpoint..index] {
            match order.iter().position(|path| *path == record.file_path) {
                Some(pos) => latest[pos] = record.clone(),
                None => {
                    order.push(record.file_path.clone());
                    latest.push(record.clone());
                }
            }
        }
        for record in &latest {
            self.write_file(&record.file_path, &record.after)?;
        }
        self.current_checkpoint = index;
        Ok(Some(order))
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.current_checkpoint = 0;
    }

    pub fn latest_record(&self, path: &str) -> Option<&ChangeRecord> {
        let key = self.normalize_key(path);
        self.history.iter().rev().find(|record| record.file_path == key)
    }

    fn checked_index(&self, index: i64) -> Option<usize> {
        usize::try_from(index)
            .ok()
            .filter(|index| *index <= self.history.len())
    }

    fn capture(&self, rel_path: &str, after: &str) -> Result<ChangeRecord> {
        let key = self.normalize_key(rel_path);
        let full = self.workspace.join(&key);
        let (before, created) = if full.is_file() {
            (
                fs::read_to_string(&full)
                    .with_context(|| format!("failed to read {}", full.display()))?,
                false,
            )
        } else {
            (String::new(), true)
        };
        Ok(ChangeRecord {
            file_path: key,
            before,
            after: after.to_string(),
            created,
        })
    }

    fn restore_before(&self, record: &ChangeRecord) -> Result<()> {
        if !record.created {
            return self.write_file(&record.file_path, &record.before);
        }
        let full = self.workspace.join(&record.file_path);
        if full.is_file() {
            fs::remove_file(&full)
                .with_context(|| format!("failed to remove {}", full.display()))?;
        }
        Ok(())
    }

    fn write_file(&self, key: &str, content: &str) -> Result<()> {
        let full = self.workspace.join(key);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        fs::write(&full, content).with_context(|| format!("failed to write {}", full.display()))
    }

    fn normalize_key(&self, path: &str) -> String {
        let candidate = Path::new(path);
        let rel = candidate
            .strip_prefix(&self.workspace)
            .unwrap_or(candidate)
            .to_string_lossy()
            .replace('\\', "/");
        let mut key = rel.as_str();
        while let Some(rest) = key.strip_prefix("./") {
            key = rest;
        }
        key.trim_start_matches('/').to_string()
    }
}
