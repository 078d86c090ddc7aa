//! Runtime configuration: the runner's knobs (spec §6, §12).

use std::path::PathBuf;

use crate::error::{RunnerError, RunnerResult};

/// Plan-projection / asset-initialization mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    Lite,
    #[default]
    Full,
}

/// What to do when neither hook marker is present in the agent-context file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AgentsMode {
    #[default]
    Append,
    Skip,
    Fail,
}

/// Reasoning-effort knob passed through to the agent executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
    Xhigh,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::Xhigh => "xhigh",
        }
    }
}

/// The full set of runtime knobs for a single run of the runner loop.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub project_root: PathBuf,

    pub mode: Mode,
    pub agents_mode: AgentsMode,

    pub executor: String,
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,

    pub exec_idle_timeout_ms: i64,
    pub exec_hard_timeout_ms: i64,
    pub terminate_on_result: bool,
    pub full_auto: bool,
    pub skip_git_repo_check: bool,

    pub max_retries: u32,
    pub max_tasks: Option<u32>,
    pub continue_on_failure: bool,
    pub tag: Option<String>,

    /// Path overrides (spec §4.A); `None` uses the default derivation.
    pub agent_context_override: Option<PathBuf>,
    pub skill_path_override: Option<PathBuf>,
    pub session_dir_override: Option<PathBuf>,

    /// Forces template fetching to always fall back to the deterministic
    /// literal, for deterministic tests (spec §4.B, §9).
    pub disable_remote_fetch: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            mode: Mode::default(),
            agents_mode: AgentsMode::default(),
            executor: "codex".to_string(),
            model: None,
            reasoning_effort: None,
            exec_idle_timeout_ms: 20 * 60 * 1000,
            exec_hard_timeout_ms: 0,
            terminate_on_result: true,
            full_auto: true,
            skip_git_repo_check: true,
            max_retries: 3,
            max_tasks: None,
            continue_on_failure: true,
            tag: None,
            agent_context_override: None,
            skill_path_override: None,
            session_dir_override: None,
            disable_remote_fetch: false,
        }
    }
}

impl RunnerOptions {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Default::default()
        }
    }

    /// The result-grace timer is fixed at 1.5s, clamped like all timers.
    pub const RESULT_GRACE_MS: i64 = 1_500;

    /// Every timer value is clamped to at least one second and truncated to
    /// an integer millisecond count (spec §4.D).
    pub fn clamp_timer_ms(value: i64) -> i64 {
        if value <= 0 {
            value
        } else {
            value.max(1_000)
        }
    }

    pub fn validate(&self) -> RunnerResult<()> {
        if !self.project_root.exists() {
            return Err(RunnerError::invalid_config(format!(
                "project root does not exist: {}",
                self.project_root.display()
            )));
        }
        Ok(())
    }
}
