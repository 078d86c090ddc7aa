//! Asset Initializer (spec §4.B).
//!
//! Ensures the hook-marked agent-context file, the skill file with its
//! integration addendum, the session directory with its gitignore, and
//! (full mode only) the spec/progress templates all exist. Idempotent under
//! repeated calls.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use crate::config::{AgentsMode, Mode, RunnerOptions};
use crate::error::{RunnerError, RunnerResult};
use crate::paths::{relative_to_root, SessionPaths};

const HOOK_START: &str = "<!-- TM-LONGRUN-START -->";
const HOOK_END: &str = "<!-- TM-LONGRUN-END -->";
const ADDENDUM_START: &str = "<!-- TM-INTEGRATION-START -->";
const ADDENDUM_END: &str = "<!-- TM-INTEGRATION-END -->";

const HOOK_BLOCK_BODY: &str = "Before starting work, read the task the runner assigned you. \
On completion, emit a single `RESULT:` line as your last line of output.";

const SKILL_TEMPLATE_FALLBACK: &str = "---\nname: taskmaster-longrun\ndescription: Runs one task per invocation against a task graph.\n---\n\n# taskmaster-longrun\n\nThis skill drives a single task to completion per invocation.\n";

const GLOBAL_AGENT_RULES_FALLBACK: &str = "# Global Agent Rules\n\nFollow the project's existing conventions. Do not modify the external task store directly.\n";

const DEFAULT_SPEC_TEMPLATE: &str = "# SPEC\n\nDescribe the project here.\n";
const DEFAULT_PROGRESS_TEMPLATE: &str = "# PROGRESS\n\n(runner-managed; edit freely between runs)\n";

/// How a touched file was handled by [`init_assets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Created,
    Updated,
    Skipped,
}

/// Outcome of one `init_assets` call: every touched file, keyed by path
/// relative to the project root.
#[derive(Debug, Default, Clone)]
pub struct InitResult {
    pub files: BTreeMap<String, Classification>,
}

impl InitResult {
    fn record(&mut self, root: &Path, path: &Path, classification: Classification) {
        self.files
            .insert(relative_to_root(root, path), classification);
    }
}

/// The kind of upstream template an asset initializer step may need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Skill,
    GlobalAgentRules,
}

/// A pluggable source of upstream template content (spec §4.B.3-4, §9).
#[async_trait]
pub trait TemplateFetcher: Send + Sync {
    /// Return the upstream template text, or `None` to fall back to the
    /// deterministic literal.
    async fn fetch(&self, kind: TemplateKind) -> Option<String>;
}

/// Fetches templates over HTTP; any failure (network, status, disabled)
/// falls back to `None`. Uses the async `reqwest::Client` so this can be
/// awaited from the runner's own Tokio runtime instead of spinning up a
/// nested blocking one.
pub struct HttpTemplateFetcher {
    pub skill_url: String,
    pub global_agent_rules_url: String,
}

#[async_trait]
impl TemplateFetcher for HttpTemplateFetcher {
    async fn fetch(&self, kind: TemplateKind) -> Option<String> {
        let url = match kind {
            TemplateKind::Skill => &self.skill_url,
            TemplateKind::GlobalAgentRules => &self.global_agent_rules_url,
        };
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .ok()?;
        let response = client.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().await.ok()
    }
}

/// Always falls back; used when remote fetching is disabled (spec §4.B,
/// §9 "tests require the remote-fetch disable to be injectable").
pub struct DisabledFetcher;

#[async_trait]
impl TemplateFetcher for DisabledFetcher {
    async fn fetch(&self, _kind: TemplateKind) -> Option<String> {
        None
    }
}

fn fallback_for(kind: TemplateKind) -> &'static str {
    match kind {
        TemplateKind::Skill => SKILL_TEMPLATE_FALLBACK,
        TemplateKind::GlobalAgentRules => GLOBAL_AGENT_RULES_FALLBACK,
    }
}

fn marker_state(text: &str, start: &str, end: &str) -> (bool, bool) {
    (text.contains(start), text.contains(end))
}

fn strip_block(text: &str, start: &str, end: &str) -> String {
    let Some(start_idx) = text.find(start) else {
        return text.to_string();
    };
    let Some(end_idx) = text.find(end) else {
        return text.to_string();
    };
    let end_idx = end_idx + end.len();
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..start_idx]);
    out.push_str(&text[end_idx..]);
    out
}

/// Step 2: the agent-context file's hook block.
fn ensure_hook_block(
    path: &Path,
    agents_mode: AgentsMode,
    root: &Path,
    result: &mut InitResult,
) -> RunnerResult<()> {
    if !path.exists() {
        let block = format!("{HOOK_START}\n{HOOK_BLOCK_BODY}\n{HOOK_END}\n");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, block)?;
        result.record(root, path, Classification::Created);
        return Ok(());
    }

    let text = std::fs::read_to_string(path)?;
    let (has_start, has_end) = marker_state(&text, HOOK_START, HOOK_END);

    match (has_start, has_end) {
        (true, true) => {
            result.record(root, path, Classification::Skipped);
        }
        (true, false) | (false, true) => {
            return Err(RunnerError::corrupt_markers(path));
        }
        (false, false) => match agents_mode {
            AgentsMode::Append => {
                let block = format!("{text}\n{HOOK_START}\n{HOOK_BLOCK_BODY}\n{HOOK_END}\n");
                std::fs::write(path, block)?;
                result.record(root, path, Classification::Updated);
            }
            AgentsMode::Skip => {
                result.record(root, path, Classification::Skipped);
            }
            AgentsMode::Fail => {
                return Err(RunnerError::hook_missing(path));
            }
        },
    }
    Ok(())
}

/// Step 3: the skill file, with its YAML frontmatter and addendum block.
async fn ensure_skill_file(
    path: &Path,
    fetcher: &dyn TemplateFetcher,
    root: &Path,
    result: &mut InitResult,
) -> RunnerResult<()> {
    let existing = if path.exists() {
        Some(std::fs::read_to_string(path)?)
    } else {
        None
    };

    let looks_upstream = existing
        .as_deref()
        .map(|t| t.starts_with("---\n") && t.matches("---").count() >= 2)
        .unwrap_or(false);
    let has_addendum =
        existing.as_deref().map(has_both_markers(ADDENDUM_START, ADDENDUM_END)).unwrap_or(false);

    if looks_upstream && has_addendum {
        result.record(root, path, Classification::Skipped);
        return Ok(());
    }

    let base = fetcher
        .fetch(TemplateKind::Skill)
        .await
        .unwrap_or_else(|| fallback_for(TemplateKind::Skill).to_string());
    let base = strip_block(&base, ADDENDUM_START, ADDENDUM_END);
    let addendum = format!(
        "\n{ADDENDUM_START}\nThis project is driven by taskmaster-longrun; see AGENTS.md.\n{ADDENDUM_END}\n"
    );
    let full = format!("{base}{addendum}");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, full)?;
    result.record(
        root,
        path,
        if existing.is_some() {
            Classification::Updated
        } else {
            Classification::Created
        },
    );
    Ok(())
}

fn has_both_markers<'a>(start: &'a str, end: &'a str) -> impl Fn(&str) -> bool + 'a {
    move |text| text.contains(start) && text.contains(end)
}

/// Step 4: the skill-side agent file (global agent rules).
async fn ensure_skill_side_agent(
    path: &Path,
    fetcher: &dyn TemplateFetcher,
    root: &Path,
    result: &mut InitResult,
) -> RunnerResult<()> {
    let looks_upstream = if path.exists() {
        std::fs::read_to_string(path)?.contains("# Global Agent Rules")
    } else {
        false
    };

    if looks_upstream {
        result.record(root, path, Classification::Skipped);
        return Ok(());
    }

    let text = fetcher
        .fetch(TemplateKind::GlobalAgentRules)
        .await
        .unwrap_or_else(|| fallback_for(TemplateKind::GlobalAgentRules).to_string());

    let existed = path.exists();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    result.record(
        root,
        path,
        if existed {
            Classification::Updated
        } else {
            Classification::Created
        },
    );
    Ok(())
}

/// Step 1: session directory, logs directory, and `.codex-tasks/.gitignore`.
fn ensure_session_skeleton(
    paths: &SessionPaths,
    root: &Path,
    result: &mut InitResult,
) -> RunnerResult<()> {
    std::fs::create_dir_all(&paths.session_dir)?;
    std::fs::create_dir_all(&paths.logs_dir)?;

    let tasks_dir = root.join(".codex-tasks");
    let gitignore = tasks_dir.join(".gitignore");

    if gitignore.exists() {
        result.record(root, &gitignore, Classification::Skipped);
    } else {
        std::fs::create_dir_all(&tasks_dir)?;
        std::fs::write(&gitignore, "*\n!.gitignore\n")?;
        result.record(root, &gitignore, Classification::Created);
    }
    Ok(())
}

/// Step 5: full-mode SPEC.md/PROGRESS.md templates.
fn ensure_full_mode_templates(
    paths: &SessionPaths,
    root: &Path,
    result: &mut InitResult,
) -> RunnerResult<()> {
    for (path, template) in [
        (&paths.spec_file, DEFAULT_SPEC_TEMPLATE),
        (&paths.progress_file, DEFAULT_PROGRESS_TEMPLATE),
    ] {
        if path.exists() {
            result.record(root, path, Classification::Skipped);
        } else {
            std::fs::write(path, template)?;
            result.record(root, path, Classification::Created);
        }
    }
    Ok(())
}

/// Run all five asset-initialization guarantees.
pub async fn init_assets(
    options: &RunnerOptions,
    paths: &SessionPaths,
    fetcher: &dyn TemplateFetcher,
) -> RunnerResult<InitResult> {
    let root = &paths.project_root;
    let mut result = InitResult::default();

    ensure_session_skeleton(paths, root, &mut result)?;
    ensure_hook_block(&paths.agent_context, options.agents_mode, root, &mut result)?;
    ensure_skill_file(&paths.skill_path, fetcher, root, &mut result).await?;
    ensure_skill_side_agent(&paths.skill_side_agent, fetcher, root, &mut result).await?;

    if matches!(options.mode, Mode::Full) {
        ensure_full_mode_templates(paths, root, &mut result)?;
    }

    Ok(result)
}
