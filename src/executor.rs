//! Subprocess Executor (spec §4.D).
//!
//! Launches the agent executable, tees its output to a per-attempt log file
//! and the parent's own stdout/stderr, drives the idle/hard/result-grace
//! timers, and returns a structured [`ExecOutcome`].

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::RunnerOptions;
use crate::error::RunnerResult;
use crate::observer::{notify, RunnerObserver, Stream as ObsStream};
use crate::paths::{to_posix, SessionPaths};
use crate::sentinel::{self, ParsedResult};
use crate::task::Task;

const OUTPUT_BUFFER_CAP: usize = 200_000;
const TERMINATION_GRACE: Duration = Duration::from_secs(5);
const RESULT_GRACE: Duration = Duration::from_millis(1_500);

/// Which timer fired, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Idle,
    Hard,
}

/// Structured result of one subprocess attempt (spec §3).
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub elapsed_ms: u64,
    pub log_path: String,
    pub timed_out: bool,
    pub timeout_kind: Option<TimeoutKind>,
    pub timeout_bound_ms: Option<i64>,
    pub parsed_result: Option<ParsedResult>,
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_` (spec §5).
pub fn sanitize_task_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Compose the prompt embedding the context-file references, the
/// instructions, and the task description (spec §4.D).
pub fn build_prompt(task: &Task, paths: &SessionPaths) -> String {
    let root = &paths.project_root;
    let agent_context = to_posix(
        paths
            .agent_context
            .strip_prefix(root)
            .unwrap_or(&paths.agent_context),
    );
    let skill_side_agent = to_posix(
        paths
            .skill_side_agent
            .strip_prefix(root)
            .unwrap_or(&paths.skill_side_agent),
    );
    let skill_path = to_posix(
        paths
            .skill_path
            .strip_prefix(root)
            .unwrap_or(&paths.skill_path),
    );

    let mut prompt = String::new();
    prompt.push_str(&format!("@{agent_context}\n"));
    prompt.push_str(&format!("@{skill_side_agent}\n"));
    prompt.push_str(&format!("@{skill_path}\n\n"));
    prompt.push_str("Implement only the current task described below.\n");
    prompt.push_str(
        "You may update the plan/progress side files, but you must not mutate the external task store.\n",
    );
    prompt.push_str(
        "When finished, emit exactly one line: RESULT: {\"status\":\"done|failed\",\"validation\":\"pass|fail|unknown\",\"summary\":\"...\"}\n",
    );
    prompt.push_str("Terminate immediately after emitting that line.\n\n");
    prompt.push_str(&format!("Task id: {}\n", task.id));
    prompt.push_str(&format!("Title: {}\n", task.title));
    prompt.push_str(&format!(
        "Description: {}\n",
        task.description.as_deref().unwrap_or("")
    ));
    prompt.push_str(&format!("Details: {}\n", task.details.as_deref().unwrap_or("")));
    prompt.push_str(&format!(
        "Test strategy: {}\n",
        task.test_strategy.as_deref().unwrap_or("")
    ));
    prompt.push_str(&format!(
        "Dependencies: {}\n",
        task.comma_joined_dependencies()
    ));

    prompt
}

/// Assemble the executable + its arguments for one attempt (spec §4.D).
fn build_command(options: &RunnerOptions, prompt: &str) -> Command {
    let mut command = Command::new(&options.executor);
    command.arg("exec");
    if options.full_auto {
        command.arg("--full-auto");
    }
    if options.skip_git_repo_check {
        command.arg("--skip-git-repo-check");
    }
    if let Some(model) = &options.model {
        command.arg("-m").arg(model);
    }
    if let Some(effort) = &options.reasoning_effort {
        command
            .arg("--config")
            .arg(format!("model_reasoning_effort=\"{}\"", effort.as_str()));
    }
    command.arg(prompt);
    command
}

async fn soft_stop(child: &mut Child, log: &mut std::fs::File) {
    let _ = child.start_kill();
    let _ = writeln!(log, "[runner] termination requested (soft)");
}

async fn force_stop(child: &mut Child, log: &mut std::fs::File) {
    let _ = child.start_kill();
    let _ = writeln!(log, "[runner] termination requested (force-kill)");
}

/// Execute `task` for `attempt`, driving the three timers and returning the
/// collected outcome.
pub async fn execute(
    task: &Task,
    attempt: u32,
    paths: &SessionPaths,
    options: &RunnerOptions,
    observer: &dyn RunnerObserver,
) -> RunnerResult<ExecOutcome> {
    std::fs::create_dir_all(&paths.logs_dir)?;
    let log_file_name = format!("{}-attempt-{}.log", sanitize_task_id(&task.id), attempt);
    let log_path: PathBuf = paths.logs_dir.join(&log_file_name);
    let mut log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let prompt = build_prompt(task, paths);
    let mut command = build_command(options, &prompt);
    command
        .current_dir(&paths.project_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let start = Instant::now();
    let mut child = command.spawn()?;
    let mut stdout_lines = BufReader::new(child.stdout.take().expect("piped stdout")).lines();
    let mut stderr_lines = BufReader::new(child.stderr.take().expect("piped stderr")).lines();

    let idle_ms = RunnerOptions::clamp_timer_ms(options.exec_idle_timeout_ms);
    let hard_ms = RunnerOptions::clamp_timer_ms(options.exec_hard_timeout_ms);
    let idle_enabled = idle_ms > 0;
    let hard_enabled = hard_ms > 0;

    let mut idle_deadline = Instant::now() + Duration::from_millis(idle_ms.max(0) as u64);
    let hard_deadline = Instant::now() + Duration::from_millis(hard_ms.max(0) as u64);

    let mut buffer = String::new();
    let mut parsed_result: Option<ParsedResult> = None;
    let mut timed_out = false;
    let mut timeout_kind: Option<TimeoutKind> = None;
    let mut timeout_bound_ms: Option<i64> = None;
    let mut terminating = false;
    let mut result_deadline: Option<Instant> = None;

    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut exit_status: Option<std::process::ExitStatus> = None;
    let mut force_sent = false;
    let mut term_deadline: Option<Instant> = None;

    loop {
        if stdout_done && stderr_done && exit_status.is_some() {
            break;
        }

        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(text)) => {
                        debug!(task_id = %task.id, bytes = text.len(), "stdout chunk read");
                        handle_chunk(ObsStream::Stdout, &text, &mut log, &mut buffer, &mut parsed_result, observer);
                        if parsed_result.is_some() && options.terminate_on_result && result_deadline.is_none() {
                            result_deadline = Some(Instant::now() + RESULT_GRACE);
                        }
                        idle_deadline = Instant::now() + Duration::from_millis(idle_ms.max(0) as u64);
                        debug!(task_id = %task.id, "idle timer reset");
                    }
                    _ => stdout_done = true,
                }
            }
            line = stderr_lines.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(text)) => {
                        debug!(task_id = %task.id, bytes = text.len(), "stderr chunk read");
                        handle_chunk(ObsStream::Stderr, &text, &mut log, &mut buffer, &mut parsed_result, observer);
                        if parsed_result.is_some() && options.terminate_on_result && result_deadline.is_none() {
                            result_deadline = Some(Instant::now() + RESULT_GRACE);
                        }
                        idle_deadline = Instant::now() + Duration::from_millis(idle_ms.max(0) as u64);
                        debug!(task_id = %task.id, "idle timer reset");
                    }
                    _ => stderr_done = true,
                }
            }
            status = child.wait(), if exit_status.is_none() => {
                exit_status = Some(status?);
            }
            _ = tokio::time::sleep_until(idle_deadline.into()), if idle_enabled && !terminating => {
                debug!(task_id = %task.id, idle_ms, "idle timer fired");
                timed_out = true;
                timeout_kind = Some(TimeoutKind::Idle);
                timeout_bound_ms = Some(idle_ms);
                soft_stop(&mut child, &mut log).await;
                terminating = true;
                term_deadline = Some(Instant::now() + TERMINATION_GRACE);
            }
            _ = tokio::time::sleep_until(hard_deadline.into()), if hard_enabled && !terminating => {
                debug!(task_id = %task.id, hard_ms, "hard timer fired");
                timed_out = true;
                timeout_kind = Some(TimeoutKind::Hard);
                timeout_bound_ms = Some(hard_ms);
                soft_stop(&mut child, &mut log).await;
                terminating = true;
                term_deadline = Some(Instant::now() + TERMINATION_GRACE);
            }
            _ = tokio::time::sleep_until(result_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)).into()), if result_deadline.is_some() && !terminating => {
                debug!(task_id = %task.id, "result grace timer fired");
                soft_stop(&mut child, &mut log).await;
                terminating = true;
                term_deadline = Some(Instant::now() + TERMINATION_GRACE);
            }
            _ = tokio::time::sleep_until(term_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)).into()), if term_deadline.is_some() && !force_sent && exit_status.is_none() => {
                debug!(task_id = %task.id, "termination grace elapsed, force-killing");
                force_stop(&mut child, &mut log).await;
                force_sent = true;
            }
        }
    }

    let status = exit_status.expect("loop only exits once the process has exited");
    let elapsed_ms = start.elapsed().as_millis() as u64;

    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|s| s.to_string())
    };
    #[cfg(not(unix))]
    let signal: Option<String> = None;

    Ok(ExecOutcome {
        exit_code: status.code(),
        signal,
        elapsed_ms,
        log_path: log_path.to_string_lossy().into_owned(),
        timed_out,
        timeout_kind,
        timeout_bound_ms,
        parsed_result,
    })
}

fn handle_chunk(
    stream: ObsStream,
    text: &str,
    log: &mut std::fs::File,
    buffer: &mut String,
    parsed_result: &mut Option<ParsedResult>,
    observer: &dyn RunnerObserver,
) {
    match stream {
        ObsStream::Stdout => {
            let mut out = std::io::stdout();
            let _ = writeln!(out, "{text}");
        }
        ObsStream::Stderr => {
            let mut err = std::io::stderr();
            let _ = writeln!(err, "{text}");
        }
    }
    let _ = writeln!(log, "{text}");

    buffer.push_str(text);
    buffer.push('\n');
    if buffer.len() > OUTPUT_BUFFER_CAP {
        let excess = buffer.len() - OUTPUT_BUFFER_CAP;
        buffer.drain(..excess);
    }

    if parsed_result.is_none() {
        if let Some(result) = sentinel::extract(buffer) {
            *parsed_result = Some(result);
        }
    }

    notify(|| observer.on_chunk(stream, text));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerOptions;
    use crate::observer::NullObserver;
    use crate::paths::resolve_paths;
    use crate::task::{simple_task, TaskStatus};
    use std::path::Path;
    use tempfile::tempdir;

    fn paths_for(dir: &Path) -> SessionPaths {
        let options = RunnerOptions::new(dir);
        resolve_paths(&options)
    }

    #[test]
    fn test_sanitize_task_id() {
        assert_eq!(sanitize_task_id("3.2"), "3.2");
        assert_eq!(sanitize_task_id("a/b c"), "a_b_c");
    }

    #[test]
    fn test_prompt_carries_sentinel_instructions() {
        let dir = tempdir().unwrap();
        let paths = paths_for(dir.path());
        let task = simple_task("1", "demo", TaskStatus::Pending);
        let prompt = build_prompt(&task, &paths);
        assert!(prompt.contains("RESULT:"));
        assert!(prompt.contains("must not mutate the external task store"));
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
    async fn test_execute_exit_zero_no_sentinel() {
        let dir = tempdir().unwrap();
        let script = write_fixture_script(dir.path(), "agent.sh", "echo hello; exit 0");
        let mut options = RunnerOptions::new(dir.path());
        options.executor = script.to_string_lossy().into_owned();
        let paths = resolve_paths(&options);
        let task = simple_task("1", "demo", TaskStatus::Pending);

        let outcome = execute(&task, 1, &paths, &options, &NullObserver)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.timed_out);
        assert!(outcome.parsed_result.is_none());
    }

    #[tokio::test]
    async fn test_execute_picks_up_sentinel() {
        let dir = tempdir().unwrap();
        let script = write_fixture_script(
            dir.path(),
            "agent.sh",
            "echo 'RESULT: {\"status\":\"done\",\"validation\":\"pass\"}'; exit 1",
        );
        let mut options = RunnerOptions::new(dir.path());
        options.executor = script.to_string_lossy().into_owned();
        let paths = resolve_paths(&options);
        let task = simple_task("1", "demo", TaskStatus::Pending);

        let outcome = execute(&task, 1, &paths, &options, &NullObserver)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(1));
        assert!(outcome.parsed_result.is_some());
    }

    #[tokio::test]
    async fn test_idle_timeout_terminates() {
        let dir = tempdir().unwrap();
        let script = write_fixture_script(dir.path(), "agent.sh", "sleep 30");
        let mut options = RunnerOptions::new(dir.path());
        options.executor = script.to_string_lossy().into_owned();
        options.exec_idle_timeout_ms = 1_000;
        let paths = resolve_paths(&options);
        let task = simple_task("1", "demo", TaskStatus::Pending);

        let outcome = execute(&task, 1, &paths, &options, &NullObserver)
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.timeout_kind, Some(TimeoutKind::Idle));
    }
}
