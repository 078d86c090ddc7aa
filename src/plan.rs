//! Plan Projection (spec §4.G).
//!
//! Renders the tabular plan (two schemas depending on mode) and the
//! task-map file from the current task list and checkpoint. Both files are
//! a view, not a source of truth, and are rewritten in full on every
//! transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Mode;
use crate::error::RunnerResult;
use crate::paths::SessionPaths;
use crate::store::CheckpointState;
use crate::task::{Task, TaskStatus};

/// Status projection for a single plan row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Todo,
    InProgress,
    Done,
    Failed,
}

impl RowStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Todo => "TODO",
            RowStatus::InProgress => "IN_PROGRESS",
            RowStatus::Done => "DONE",
            RowStatus::Failed => "FAILED",
        }
    }
}

const VALIDATION_COMMAND_PLACEHOLDER: &str = "echo SKIP";

/// One row of the projected plan.
#[derive(Debug, Clone)]
pub struct PlanRow {
    pub row_id: u32,
    pub display_id: String,
    pub task_id: String,
    pub title: String,
    pub status: RowStatus,
    pub acceptance: String,
    pub validation_command: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub notes: String,
    pub dependencies: Vec<String>,
}

/// Status projection precedence (spec §4.G), top first.
fn project_status(id: &str, underlying: TaskStatus, checkpoint: &CheckpointState) -> RowStatus {
    if checkpoint.is_done(id) {
        return RowStatus::Done;
    }
    if checkpoint.is_blocked(id) {
        return RowStatus::Failed;
    }
    match underlying {
        TaskStatus::Done | TaskStatus::Completed => RowStatus::Done,
        TaskStatus::InProgress => RowStatus::InProgress,
        TaskStatus::Blocked | TaskStatus::Cancelled | TaskStatus::Deferred => RowStatus::Failed,
        TaskStatus::Pending | TaskStatus::Review => RowStatus::Todo,
    }
}

/// Rewrite a sibling-relative subtask dependency (no `.`) as
/// `"<parentId>.<dep>"` (spec §4.G).
fn qualify_subtask_dependency(parent_id: &str, dep: &str) -> String {
    if dep.contains('.') {
        dep.to_string()
    } else {
        format!("{parent_id}.{dep}")
    }
}

/// Flatten the task list into dense, 1-based plan rows (spec §4.G).
pub fn project_rows(tasks: &[Task], checkpoint: &CheckpointState, now: DateTime<Utc>) -> Vec<PlanRow> {
    let mut rows = Vec::new();
    let mut row_id = 1;

    for task in tasks {
        rows.push(make_row(
            row_id,
            &task.id,
            &task.id,
            task,
            checkpoint,
            &task.dependencies,
            now,
        ));
        row_id += 1;

        for sub in &task.subtasks {
            let synthesized_id = format!("{}.{}", task.id, sub.id);
            let deps: Vec<String> = sub
                .dependencies
                .iter()
                .map(|d| qualify_subtask_dependency(&task.id, d))
                .collect();
            rows.push(make_row(
                row_id,
                &synthesized_id,
                &synthesized_id,
                sub,
                checkpoint,
                &deps,
                now,
            ));
            row_id += 1;
        }
    }

    rows
}

fn make_row(
    row_id: u32,
    lookup_id: &str,
    display_task_id: &str,
    task: &Task,
    checkpoint: &CheckpointState,
    dependencies: &[String],
    now: DateTime<Utc>,
) -> PlanRow {
    let status = project_status(lookup_id, task.status, checkpoint);
    let completed_at = if status == RowStatus::Done { Some(now) } else { None };
    let retry_count = checkpoint.attempts.get(lookup_id).copied().unwrap_or(0);
    let notes = if checkpoint.is_blocked(lookup_id) {
        "blocked by retry limit".to_string()
    } else {
        String::new()
    };

    PlanRow {
        row_id,
        display_id: format!("{display_task_id}: {}", task.title),
        task_id: lookup_id.to_string(),
        title: task.title.clone(),
        status,
        acceptance: task.test_strategy.clone().unwrap_or_default(),
        validation_command: VALIDATION_COMMAND_PLACEHOLDER.to_string(),
        completed_at,
        retry_count,
        notes,
        dependencies: dependencies.to_vec(),
    }
}

/// Quote a CSV cell per spec §4.G: quote iff it contains `"` or `,`;
/// newlines become spaces before quoting; embedded quotes are doubled.
fn csv_cell(value: &str) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    if flattened.contains('"') || flattened.contains(',') {
        format!("\"{}\"", flattened.replace('"', "\"\""))
    } else {
        flattened
    }
}

fn render_full_csv(rows: &[PlanRow]) -> String {
    let mut out = String::from("id,task,status,acceptance_criteria,validation_command,completed_at,retry_count,notes\n");
    for row in rows {
        let completed_at = row
            .completed_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            csv_cell(&row.row_id.to_string()),
            csv_cell(&row.display_id),
            csv_cell(row.status.as_str()),
            csv_cell(&row.acceptance),
            csv_cell(&row.validation_command),
            csv_cell(&completed_at),
            csv_cell(&row.retry_count.to_string()),
            csv_cell(&row.notes),
        ));
    }
    out
}

fn render_lite_csv(rows: &[PlanRow]) -> String {
    let mut out = String::from("id,task,status,completed_at,notes\n");
    for row in rows {
        let status = if row.status == RowStatus::Done {
            RowStatus::Done
        } else {
            RowStatus::Todo
        };
        let completed_at = row
            .completed_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            csv_cell(&row.row_id.to_string()),
            csv_cell(&row.display_id),
            csv_cell(status.as_str()),
            csv_cell(&completed_at),
            csv_cell(&row.notes),
        ));
    }
    out
}

/// One entry of the task-map file (full mode only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMapRow {
    #[serde(rename = "rowId")]
    pub row_id: u32,
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub title: String,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMap {
    #[serde(rename = "generatedAt")]
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<TaskMapRow>,
}

/// Rewrite the plan file (and, in full mode, the task-map file) in full.
pub fn sync_plan(
    tasks: &[Task],
    checkpoint: &CheckpointState,
    paths: &SessionPaths,
    mode: Mode,
    now: DateTime<Utc>,
) -> RunnerResult<()> {
    let rows = project_rows(tasks, checkpoint, now);

    let csv = match mode {
        Mode::Full => render_full_csv(&rows),
        Mode::Lite => render_lite_csv(&rows),
    };
    if let Some(parent) = paths.plan_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&paths.plan_file, csv)?;

    if matches!(mode, Mode::Full) {
        let task_map = TaskMap {
            generated_at: now,
            rows: rows
                .iter()
                .map(|r| TaskMapRow {
                    row_id: r.row_id,
                    task_id: r.task_id.clone(),
                    title: r.title.clone(),
                    dependencies: r.dependencies.clone(),
                })
                .collect(),
        };
        let text = serde_json::to_string_pretty(&task_map)?;
        std::fs::write(&paths.task_map_file, text)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::simple_task;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_status_precedence_checkpoint_wins() {
        let mut checkpoint = CheckpointState::default();
        checkpoint.mark_done("1");
        let task = simple_task("1", "demo", TaskStatus::Pending);
        let rows = project_rows(&[task], &checkpoint, fixed_now());
        assert_eq!(rows[0].status, RowStatus::Done);
    }

    #[test]
    fn test_blocked_checkpoint_projects_failed() {
        let mut checkpoint = CheckpointState::default();
        checkpoint.mark_blocked("1");
        let task = simple_task("1", "demo", TaskStatus::Pending);
        let rows = project_rows(&[task], &checkpoint, fixed_now());
        assert_eq!(rows[0].status, RowStatus::Failed);
        assert_eq!(rows[0].notes, "blocked by retry limit");
    }

    #[test]
    fn test_subtask_ids_and_sibling_dependency_rewrite() {
        let mut parent = simple_task("3", "parent", TaskStatus::Pending);
        let mut sub = simple_task("2", "child", TaskStatus::Pending);
        sub.dependencies = vec!["1".to_string()];
        parent.subtasks.push(sub);
        let checkpoint = CheckpointState::default();
        let rows = project_rows(&[parent], &checkpoint, fixed_now());

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].task_id, "3.2");
        assert_eq!(rows[1].dependencies, vec!["3.1".to_string()]);
    }

    #[test]
    fn test_csv_quoting_rules() {
        assert_eq!(csv_cell("plain"), "plain");
        assert_eq!(csv_cell("a,b"), "\"a,b\"");
        assert_eq!(csv_cell("a\"b"), "\"a\"\"b\"");
        assert_eq!(csv_cell("line1\nline2"), "line1 line2");
    }

    #[test]
    fn test_full_and_lite_headers() {
        let checkpoint = CheckpointState::default();
        let task = simple_task("1", "demo", TaskStatus::Pending);
        let rows = project_rows(&[task], &checkpoint, fixed_now());

        let full = render_full_csv(&rows);
        assert!(full.starts_with(
            "id,task,status,acceptance_criteria,validation_command,completed_at,retry_count,notes\n"
        ));

        let lite = render_lite_csv(&rows);
        assert!(lite.starts_with("id,task,status,completed_at,notes\n"));
    }

    #[test]
    fn test_lite_status_collapses_to_done_or_todo() {
        let mut checkpoint = CheckpointState::default();
        checkpoint.mark_blocked("1");
        let task = simple_task("1", "demo", TaskStatus::Pending);
        let rows = project_rows(&[task], &checkpoint, fixed_now());
        let lite = render_lite_csv(&rows);
        assert!(lite.contains(",TODO,"));
    }

    #[test]
    fn test_projection_deterministic_given_same_inputs() {
        let checkpoint = CheckpointState::default();
        let task = simple_task("1", "demo", TaskStatus::Pending);
        let rows1 = project_rows(std::slice::from_ref(&task), &checkpoint, fixed_now());
        let rows2 = project_rows(&[task], &checkpoint, fixed_now());
        assert_eq!(render_full_csv(&rows1), render_full_csv(&rows2));
    }
}
