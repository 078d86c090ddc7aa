//! Runner Loop (spec §4.H).
//!
//! Drives the task store, the Subprocess Executor, and the Outcome Resolver
//! through one task at a time, persisting the checkpoint and projecting the
//! plan after every transition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::config::RunnerOptions;
use crate::error::RunnerResult;
use crate::executor;
use crate::observer::{notify, RunnerObserver, TaskEndSummary};
use crate::outcome;
use crate::paths::SessionPaths;
use crate::plan;
use crate::store::{self, CheckpointState, LedgerEntry, LedgerStatus};
use crate::task::{Task, TaskStatus, TaskStore};

/// Returns the current time; production passes `Utc::now`, tests pass a
/// fixed-clock function so every timestamp in a test run is deterministic
/// while every timestamp in a real run reflects the moment it was sampled
/// (spec §9: the injected clock is a test-only affordance).
pub type Clock = fn() -> DateTime<Utc>;

/// Final classification of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStatus {
    AllComplete,
    Partial,
    Error,
}

/// The result of one `run()` call (spec §4.H).
#[derive(Debug, Clone)]
pub struct RunResult {
    pub completed_task_ids: Vec<String>,
    pub blocked_task_ids: Vec<String>,
    pub attempts: HashMap<String, u32>,
    pub total_runs: u32,
    pub final_status: FinalStatus,
    pub error_message: Option<String>,
}

fn persist(
    checkpoint: &mut CheckpointState,
    paths: &SessionPaths,
    tasks: &[Task],
    options: &RunnerOptions,
    clock: Clock,
) -> RunnerResult<()> {
    store::write_checkpoint(&paths.checkpoint_file, checkpoint)?;
    plan::sync_plan(tasks, checkpoint, paths, options.mode, clock())?;
    Ok(())
}

/// Run the loop to completion or a stop condition. `clock` is sampled fresh
/// for every ledger append and plan projection, so production callers pass
/// `Utc::now` and tests pass a fixed-clock function for determinism (spec
/// §9: the injected clock is a test-only affordance, not a frozen run-wide
/// timestamp).
pub async fn run(
    options: &RunnerOptions,
    task_store: &dyn TaskStore,
    paths: &SessionPaths,
    observer: &dyn RunnerObserver,
    clock: Clock,
) -> RunnerResult<RunResult> {
    let mut checkpoint = match store::read_checkpoint(&paths.checkpoint_file) {
        Ok(checkpoint) => checkpoint,
        Err(err) => {
            error!(error = %err, path = %paths.checkpoint_file.display(), "failed to read checkpoint");
            return Err(err);
        }
    };
    let mut total_runs = 0u32;

    loop {
        let tasks = task_store.all_tasks(options.tag.as_deref()).await?;

        let next = task_store.next_task(options.tag.as_deref()).await?;
        let Some(task) = next else {
            let final_status = if checkpoint.blocked_task_ids.is_empty() {
                FinalStatus::AllComplete
            } else {
                FinalStatus::Partial
            };
            persist(&mut checkpoint, paths, &tasks, options, clock)?;
            return Ok(finish(checkpoint, total_runs, final_status, None));
        };

        if let Some(max) = options.max_tasks {
            if total_runs >= max {
                let final_status = if checkpoint.blocked_task_ids.is_empty() {
                    FinalStatus::AllComplete
                } else {
                    FinalStatus::Partial
                };
                persist(&mut checkpoint, paths, &tasks, options, clock)?;
                return Ok(finish(checkpoint, total_runs, final_status, None));
            }
        }

        let attempt = checkpoint.bump_attempt(&task.id);
        task_store
            .set_status(&task.id, TaskStatus::InProgress)
            .await?;
        notify(|| observer.on_task_start(&task, attempt));

        total_runs += 1;
        let exec_outcome = executor::execute(&task, attempt, paths, options, observer).await?;
        let resolution = outcome::resolve(&exec_outcome);

        let ledger_status;
        if resolution.success {
            task_store.set_status(&task.id, TaskStatus::Done).await?;
            checkpoint.mark_done(&task.id);
            ledger_status = LedgerStatus::Done;
        } else if attempt > options.max_retries {
            task_store
                .set_status(&task.id, TaskStatus::Blocked)
                .await?;
            checkpoint.mark_blocked(&task.id);
            ledger_status = LedgerStatus::Blocked;
        } else {
            task_store
                .set_status(&task.id, TaskStatus::Pending)
                .await?;
            ledger_status = LedgerStatus::Failed;
            warn!(task_id = %task.id, attempt, "task failed, will retry");
            notify(|| observer.on_warning(&format!("task {} failed on attempt {attempt}, retrying", task.id)));
        }

        if let Err(err) = store::append_ledger(
            &paths.ledger_file,
            &LedgerEntry {
                timestamp: clock(),
                task_id: task.id.clone(),
                title: task.title.clone(),
                attempt,
                status: ledger_status,
                exit_code: exec_outcome.exit_code,
                duration_ms: exec_outcome.elapsed_ms,
                log_file: exec_outcome.log_path.clone(),
                notes: Some(resolution.note.clone()),
            },
        ) {
            error!(error = %err, task_id = %task.id, "failed to append ledger entry");
            return Err(err);
        }

        notify(|| {
            observer.on_task_end(&TaskEndSummary {
                task_id: task.id.clone(),
                attempt,
                success: resolution.success,
                note: resolution.note.clone(),
            })
        });

        if !resolution.success && !options.continue_on_failure {
            let tasks = task_store.all_tasks(options.tag.as_deref()).await?;
            persist(&mut checkpoint, paths, &tasks, options, clock)?;
            return Ok(finish(
                checkpoint,
                total_runs,
                FinalStatus::Error,
                Some(format!("task {} failed: {}", task.id, resolution.note)),
            ));
        }

        let tasks = task_store.all_tasks(options.tag.as_deref()).await?;
        persist(&mut checkpoint, paths, &tasks, options, clock)?;
    }
}

fn finish(
    checkpoint: CheckpointState,
    total_runs: u32,
    final_status: FinalStatus,
    error_message: Option<String>,
) -> RunResult {
    RunResult {
        completed_task_ids: checkpoint.done_task_ids,
        blocked_task_ids: checkpoint.blocked_task_ids,
        attempts: checkpoint.attempts,
        total_runs,
        final_status,
        error_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;
    use crate::paths::resolve_paths;
    use crate::task::simple_task;
    use std::path::Path;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn write_fixture_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn test_happy_path_single_task() {
        let dir = tempdir().unwrap();
        let script = write_fixture_script(dir.path(), "agent.sh", "echo hi; exit 0");
        let mut options = RunnerOptions::new(dir.path());
        options.executor = script.to_string_lossy().into_owned();
        let paths = resolve_paths(&options);
        let store = crate::task::MockTaskStore::new(vec![simple_task(
            "1",
            "demo",
            TaskStatus::Pending,
        )]);

        let result = run(&options, &store, &paths, &NullObserver, fixed_now)
            .await
            .unwrap();

        assert_eq!(result.completed_task_ids, vec!["1".to_string()]);
        assert_eq!(result.final_status, FinalStatus::AllComplete);
        assert_eq!(*result.attempts.get("1").unwrap(), 1);

        let ledger = store::read_ledger(&paths.ledger_file).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].status, LedgerStatus::Done);
    }

    #[tokio::test]
    async fn test_sentinel_overrides_exit_code() {
        let dir = tempdir().unwrap();
        let script = write_fixture_script(
            dir.path(),
            "agent.sh",
            "echo 'RESULT: {\"status\":\"done\",\"validation\":\"pass\",\"summary\":\"ok\"}'; exit 1",
        );
        let mut options = RunnerOptions::new(dir.path());
        options.executor = script.to_string_lossy().into_owned();
        let paths = resolve_paths(&options);
        let store = crate::task::MockTaskStore::new(vec![simple_task(
            "1",
            "demo",
            TaskStatus::Pending,
        )]);

        let result = run(&options, &store, &paths, &NullObserver, fixed_now)
            .await
            .unwrap();
        assert_eq!(result.final_status, FinalStatus::AllComplete);
        assert_eq!(result.completed_task_ids, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_timeout_is_failure_and_errors_without_continue() {
        let dir = tempdir().unwrap();
        let script = write_fixture_script(dir.path(), "agent.sh", "sleep 30");
        let mut options = RunnerOptions::new(dir.path());
        options.executor = script.to_string_lossy().into_owned();
        options.exec_idle_timeout_ms = 500;
        options.max_retries = 0;
        options.continue_on_failure = false;
        let paths = resolve_paths(&options);
        let store = crate::task::MockTaskStore::new(vec![simple_task(
            "1",
            "demo",
            TaskStatus::Pending,
        )]);

        let result = run(&options, &store, &paths, &NullObserver, fixed_now)
            .await
            .unwrap();
        assert_eq!(result.final_status, FinalStatus::Error);
        assert_eq!(result.blocked_task_ids, vec!["1".to_string()]);
        assert!(result.error_message.unwrap().contains("1"));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let dir = tempdir().unwrap();
        let counter_file = dir.path().join("counter");
        let script = write_fixture_script(
            dir.path(),
            "agent.sh",
            &format!(
                "n=$(cat {0} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {0}; \
                 if [ $n -ge 3 ]; then echo 'RESULT: {{\"status\":\"done\"}}'; exit 0; else exit 1; fi",
                counter_file.display()
            ),
        );
        let mut options = RunnerOptions::new(dir.path());
        options.executor = script.to_string_lossy().into_owned();
        options.max_retries = 2;
        let paths = resolve_paths(&options);
        let store = crate::task::MockTaskStore::new(vec![simple_task(
            "1",
            "demo",
            TaskStatus::Pending,
        )]);

        let result = run(&options, &store, &paths, &NullObserver, fixed_now)
            .await
            .unwrap();
        assert_eq!(result.final_status, FinalStatus::AllComplete);
        assert_eq!(*result.attempts.get("1").unwrap(), 3);

        let ledger = store::read_ledger(&paths.ledger_file).unwrap();
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger[0].status, LedgerStatus::Failed);
        assert_eq!(ledger[1].status, LedgerStatus::Failed);
        assert_eq!(ledger[2].status, LedgerStatus::Done);
    }

    #[tokio::test]
    async fn test_lite_mode_artifacts() {
        let dir = tempdir().unwrap();
        let script = write_fixture_script(dir.path(), "agent.sh", "exit 0");
        let mut options = RunnerOptions::new(dir.path());
        options.executor = script.to_string_lossy().into_owned();
        options.mode = crate::config::Mode::Lite;
        let paths = resolve_paths(&options);
        let store = crate::task::MockTaskStore::new(vec![simple_task(
            "1",
            "demo",
            TaskStatus::Pending,
        )]);

        run(&options, &store, &paths, &NullObserver, fixed_now)
            .await
            .unwrap();

        let todo = dir.path().join("TODO.csv");
        assert!(todo.exists());
        let text = std::fs::read_to_string(todo).unwrap();
        assert!(text.starts_with("id,task,status,completed_at,notes\n"));
        assert!(!paths.session_dir.join("SPEC.md").exists());
    }
}
