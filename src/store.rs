//! Checkpoint & Ledger Store (spec §4.F).
//!
//! The checkpoint is a small JSON document rewritten atomically after every
//! task transition. The ledger is an append-only JSON-lines audit trail that
//! is never mutated.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{RunnerError, RunnerResult};

/// Crash-safe checkpoint state (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointState {
    #[serde(rename = "updatedAt")]
    pub updated_at: chrono::DateTime<Utc>,
    #[serde(default)]
    pub attempts: HashMap<String, u32>,
    #[serde(default, rename = "doneTaskIds")]
    pub done_task_ids: Vec<String>,
    #[serde(default, rename = "blockedTaskIds")]
    pub blocked_task_ids: Vec<String>,
    #[serde(default, rename = "lastTaskId", skip_serializing_if = "Option::is_none")]
    pub last_task_id: Option<String>,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            updated_at: Utc::now(),
            attempts: HashMap::new(),
            done_task_ids: Vec::new(),
            blocked_task_ids: Vec::new(),
            last_task_id: None,
        }
    }
}

impl CheckpointState {
    /// Record one more attempt at `id`, returning the new attempt count.
    pub fn bump_attempt(&mut self, id: &str) -> u32 {
        let count = self.attempts.entry(id.to_string()).or_insert(0);
        *count += 1;
        self.last_task_id = Some(id.to_string());
        *count
    }

    pub fn mark_done(&mut self, id: &str) {
        self.blocked_task_ids.retain(|x| x != id);
        if !self.done_task_ids.iter().any(|x| x == id) {
            self.done_task_ids.push(id.to_string());
        }
    }

    pub fn mark_blocked(&mut self, id: &str) {
        self.done_task_ids.retain(|x| x != id);
        if !self.blocked_task_ids.iter().any(|x| x == id) {
            self.blocked_task_ids.push(id.to_string());
        }
    }

    pub fn is_done(&self, id: &str) -> bool {
        self.done_task_ids.iter().any(|x| x == id)
    }

    pub fn is_blocked(&self, id: &str) -> bool {
        self.blocked_task_ids.iter().any(|x| x == id)
    }
}

/// Terminal status of a single attempt, as recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerStatus {
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "BLOCKED")]
    Blocked,
}

/// One append-only ledger record (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: chrono::DateTime<Utc>,
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub title: String,
    pub attempt: u32,
    pub status: LedgerStatus,
    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    #[serde(rename = "logFile")]
    pub log_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Read the checkpoint at `path`, tolerating a missing file. A present-but-
/// corrupt file is fatal (spec §7).
pub fn read_checkpoint(path: &Path) -> RunnerResult<CheckpointState> {
    if !path.exists() {
        return Ok(CheckpointState::default());
    }
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| {
        error!(path = %path.display(), error = %e, "checkpoint file is corrupt");
        RunnerError::corrupt_checkpoint(path, e)
    })
}

/// Write the checkpoint atomically (temp file then rename), bumping
/// `updatedAt` to the current time.
pub fn write_checkpoint(path: &Path, state: &mut CheckpointState) -> RunnerResult<()> {
    state.updated_at = Utc::now();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(state)?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, text)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Append one ledger entry, flushing after the write (spec §4.F).
pub fn append_ledger(path: &Path, entry: &LedgerEntry) -> RunnerResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let line = serde_json::to_string(entry)?;
    writeln!(file, "{line}")?;
    file.flush()?;
    Ok(())
}

/// Read every ledger entry in file order.
pub fn read_ledger(path: &Path) -> RunnerResult<Vec<LedgerEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(RunnerError::from))
        .collect()
}
