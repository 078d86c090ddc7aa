//! Path Resolver (spec §4.A).
//!
//! Derives every session file path from the project root, run mode, and
//! path overrides. All paths returned are canonical and absolute.

use std::path::{Path, PathBuf};

use crate::config::{Mode, RunnerOptions};

/// Fully-resolved absolute paths for a single session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub agent_context: PathBuf,
    pub skill_side_agent: PathBuf,
    pub skill_path: PathBuf,
    pub session_dir: PathBuf,
    pub spec_file: PathBuf,
    pub progress_file: PathBuf,
    pub plan_file: PathBuf,
    pub task_map_file: PathBuf,
    pub checkpoint_file: PathBuf,
    pub ledger_file: PathBuf,
    pub logs_dir: PathBuf,
    pub project_root: PathBuf,
}

const SESSION_DIR_REL: &str = ".codex-tasks/taskmaster-longrun";
const SKILL_PATH_REL: &str = ".codex/skills/taskmaster-longrun/SKILL.md";

/// Resolve overrides against the project root; absolute overrides pass
/// through unchanged.
fn resolve_against_root(root: &Path, override_path: Option<&Path>, default_rel: &str) -> PathBuf {
    match override_path {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => root.join(p),
        None => root.join(default_rel),
    }
}

/// Render a path in POSIX forward-slash form for cross-platform comparisons
/// (spec §4.A: "path comparisons elsewhere use POSIX forward-slash form").
pub fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Render `path` relative to `root` in POSIX form, for the asset
/// initializer's created/updated/skipped classification (spec §4.B, §14).
pub fn relative_to_root(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => to_posix(rel),
        Err(_) => to_posix(path),
    }
}

/// Resolve all session paths for `options`.
pub fn resolve_paths(options: &RunnerOptions) -> SessionPaths {
    let root = options
        .project_root
        .canonicalize()
        .unwrap_or_else(|_| options.project_root.clone());

    let session_dir = resolve_against_root(
        &root,
        options.session_dir_override.as_deref(),
        SESSION_DIR_REL,
    );
    let skill_path = resolve_against_root(
        &root,
        options.skill_path_override.as_deref(),
        SKILL_PATH_REL,
    );
    let skill_side_agent = skill_path
        .parent()
        .map(|p| p.join("AGENTS.md"))
        .unwrap_or_else(|| root.join("AGENTS.md"));

    let agent_context = match &options.agent_context_override {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => root.join(p),
        None => {
            let upper = root.join("AGENTS.md");
            let lower = root.join("agent.md");
            if upper.exists() {
                upper
            } else if lower.exists() {
                lower
            } else {
                upper
            }
        }
    };

    let plan_file = match options.mode {
        Mode::Lite => root.join("TODO.csv"),
        Mode::Full => session_dir.join("TODO.csv"),
    };

    SessionPaths {
        agent_context,
        skill_side_agent,
        skill_path,
        spec_file: session_dir.join("SPEC.md"),
        progress_file: session_dir.join("PROGRESS.md"),
        plan_file,
        task_map_file: session_dir.join("taskmaster-map.json"),
        checkpoint_file: session_dir.join("checkpoint.json"),
        ledger_file: session_dir.join("ledger.jsonl"),
        logs_dir: session_dir.join("logs"),
        session_dir,
        project_root: root,
    }
}
