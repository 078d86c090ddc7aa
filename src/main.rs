use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;

use taskmaster_longrun::observer::TracingObserver;
use taskmaster_longrun::{assets, runner};
use taskmaster_longrun::{AgentsMode, JsonTaskStore, Mode, ReasoningEffort, RunnerOptions};

/// Drive an external coding-agent subprocess through a task graph, one task
/// per invocation.
#[derive(Debug, Parser)]
#[command(name = "taskmaster-longrun", version)]
struct Cli {
    /// Project root directory.
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Path to the flat-file task store (JSON array of tasks).
    #[arg(long, default_value = "tasks.json")]
    tasks_file: PathBuf,

    #[arg(long, value_enum, default_value = "full")]
    mode: Mode,

    #[arg(long, value_enum, default_value = "append")]
    agents_mode: AgentsMode,

    /// Agent executable to invoke.
    #[arg(long, default_value = "codex")]
    executor: String,

    #[arg(long)]
    model: Option<String>,

    #[arg(long, value_enum)]
    reasoning_effort: Option<ReasoningEffort>,

    #[arg(long, default_value_t = 20 * 60 * 1000)]
    exec_idle_timeout_ms: i64,

    #[arg(long, default_value_t = 0)]
    exec_hard_timeout_ms: i64,

    #[arg(long, default_value_t = true)]
    terminate_on_result: bool,

    #[arg(long, default_value_t = true)]
    full_auto: bool,

    #[arg(long, default_value_t = true)]
    skip_git_repo_check: bool,

    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    #[arg(long)]
    max_tasks: Option<u32>,

    #[arg(long, default_value_t = true)]
    continue_on_failure: bool,

    #[arg(long)]
    tag: Option<String>,

    #[arg(long)]
    disable_remote_fetch: bool,
}

impl From<Cli> for RunnerOptions {
    fn from(cli: Cli) -> Self {
        let mut options = RunnerOptions::new(cli.project_root);
        options.mode = cli.mode;
        options.agents_mode = cli.agents_mode;
        options.executor = cli.executor;
        options.model = cli.model;
        options.reasoning_effort = cli.reasoning_effort;
        options.exec_idle_timeout_ms = cli.exec_idle_timeout_ms;
        options.exec_hard_timeout_ms = cli.exec_hard_timeout_ms;
        options.terminate_on_result = cli.terminate_on_result;
        options.full_auto = cli.full_auto;
        options.skip_git_repo_check = cli.skip_git_repo_check;
        options.max_retries = cli.max_retries;
        options.max_tasks = cli.max_tasks;
        options.continue_on_failure = cli.continue_on_failure;
        options.tag = cli.tag;
        options.disable_remote_fetch = cli.disable_remote_fetch;
        options
    }
}

fn format_run_summary(result: &runner::RunResult) -> String {
    format!(
        "final_status={:?} completed={} blocked={} total_runs={}{}",
        result.final_status,
        result.completed_task_ids.len(),
        result.blocked_task_ids.len(),
        result.total_runs,
        result
            .error_message
            .as_ref()
            .map(|m| format!(" error=\"{m}\""))
            .unwrap_or_default(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let tasks_file = cli.tasks_file.clone();
    let options: RunnerOptions = cli.into();
    options.validate().context("invalid configuration")?;

    let paths = taskmaster_longrun::paths::resolve_paths(&options);
    info!(session_dir = %paths.session_dir.display(), "resolved session paths");

    let fetcher: Box<dyn assets::TemplateFetcher> = if options.disable_remote_fetch {
        Box::new(assets::DisabledFetcher)
    } else {
        Box::new(assets::HttpTemplateFetcher {
            skill_url: "https://raw.githubusercontent.com/taskmaster-ai/taskmaster-skill/main/SKILL.md"
                .to_string(),
            global_agent_rules_url:
                "https://raw.githubusercontent.com/taskmaster-ai/taskmaster-skill/main/AGENTS.md"
                    .to_string(),
        })
    };
    let init_result = assets::init_assets(&options, &paths, fetcher.as_ref()).await?;
    info!(files = init_result.files.len(), "asset initialization complete");

    let store_path = if tasks_file.is_absolute() {
        tasks_file
    } else {
        options.project_root.join(tasks_file)
    };
    let task_store = JsonTaskStore::new(store_path);

    let result = runner::run(&options, &task_store, &paths, &TracingObserver, Utc::now).await?;
    println!("{}", format_run_summary(&result));

    if result.final_status == runner::FinalStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}
