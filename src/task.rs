//! Task data model and the external Task Store collaborator (spec §3, §1).
//!
//! The task store itself is explicitly out of scope for this crate — it is
//! the "ordered next task selection" collaborator the runner loop is built
//! against. `TaskStore` is the seam; `JsonTaskStore` is a small default
//! implementation (a flat `tasks.json`) so the binary has something to run
//! against out of the box, and `MockTaskStore` is the test double used by
//! the runner's own unit and end-to-end tests.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

/// Status of a task in the external store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Completed,
    Blocked,
    Cancelled,
    Deferred,
    Review,
}

impl TaskStatus {
    pub fn is_done_like(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Completed)
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::Blocked | TaskStatus::Cancelled | TaskStatus::Deferred
        )
    }
}

/// A single task, possibly carrying subtasks of the same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default, rename = "testStrategy")]
    pub test_strategy: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub subtasks: Vec<Task>,
}

impl Task {
    pub fn comma_joined_dependencies(&self) -> String {
        if self.dependencies.is_empty() {
            "none".to_string()
        } else {
            self.dependencies.join(", ")
        }
    }
}

/// External collaborator supplying ordered "next task" selection and
/// persisting status transitions. The runner only ever writes status to
/// pending/in-progress/done/blocked (spec §3).
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// The next task to execute for `tag`, or `None` when exhausted. The
    /// store is trusted to skip tasks already `done`/`completed` (spec §9).
    async fn next_task(&self, tag: Option<&str>) -> RunnerResult<Option<Task>>;

    /// The full, flattened task list (tasks then their subtasks, in order),
    /// used by the Plan Projection component.
    async fn all_tasks(&self, tag: Option<&str>) -> RunnerResult<Vec<Task>>;

    /// Persist a status transition for `id`.
    async fn set_status(&self, id: &str, status: TaskStatus) -> RunnerResult<()>;
}

/// A flat-file task store backed by a `tasks.json` array of [`Task`]s.
pub struct JsonTaskStore {
    path: PathBuf,
}

impl JsonTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> RunnerResult<Vec<Task>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write(&self, tasks: &[Task]) -> RunnerResult<()> {
        let text = serde_json::to_string_pretty(tasks)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }

    fn dependencies_satisfied(task: &Task, done: &HashSet<String>) -> bool {
        task.dependencies.iter().all(|d| done.contains(d))
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn next_task(&self, _tag: Option<&str>) -> RunnerResult<Option<Task>> {
        let tasks = self.read()?;
        let done: HashSet<String> = tasks
            .iter()
            .filter(|t| t.status.is_done_like())
            .map(|t| t.id.clone())
            .collect();

        for task in &tasks {
            if !task.status.is_done_like()
                && !task.status.is_terminal_failure()
                && Self::dependencies_satisfied(task, &done)
            {
                return Ok(Some(task.clone()));
            }
            for sub in &task.subtasks {
                if !sub.status.is_done_like()
                    && !sub.status.is_terminal_failure()
                    && Self::dependencies_satisfied(sub, &done)
                {
                    return Ok(Some(sub.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn all_tasks(&self, _tag: Option<&str>) -> RunnerResult<Vec<Task>> {
        self.read()
    }

    async fn set_status(&self, id: &str, status: TaskStatus) -> RunnerResult<()> {
        let mut tasks = self.read()?;
        let mut found = false;
        for task in &mut tasks {
            if task.id == id {
                task.status = status;
                found = true;
                break;
            }
            for sub in &mut task.subtasks {
                if sub.id == id {
                    sub.status = status;
                    found = true;
                    break;
                }
            }
        }
        if !found {
            return Err(RunnerError::task_store(format!(
                "no such task id: {id}"
            )));
        }
        self.write(&tasks)
    }
}

/// In-memory task store for tests, configured with a fixed list of tasks
/// and a linear "next pending" selection policy.
pub struct MockTaskStore {
    tasks: Mutex<Vec<Task>>,
}

impl MockTaskStore {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
        }
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }

    fn find_mut<'a>(tasks: &'a mut [Task], id: &str) -> Option<&'a mut Task> {
        for task in tasks.iter_mut() {
            if task.id == id {
                return Some(task);
            }
            if let Some(found) = Self::find_mut(&mut task.subtasks, id) {
                return Some(found);
            }
        }
        None
    }
}

#[async_trait]
impl TaskStore for MockTaskStore {
    async fn next_task(&self, _tag: Option<&str>) -> RunnerResult<Option<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let done: HashSet<String> = tasks
            .iter()
            .filter(|t| t.status.is_done_like())
            .map(|t| t.id.clone())
            .collect();
        for task in tasks.iter() {
            if !task.status.is_done_like()
                && !task.status.is_terminal_failure()
                && JsonTaskStore::dependencies_satisfied(task, &done)
            {
                return Ok(Some(task.clone()));
            }
            for sub in &task.subtasks {
                if !sub.status.is_done_like()
                    && !sub.status.is_terminal_failure()
                    && JsonTaskStore::dependencies_satisfied(sub, &done)
                {
                    return Ok(Some(sub.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn all_tasks(&self, _tag: Option<&str>) -> RunnerResult<Vec<Task>> {
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn set_status(&self, id: &str, status: TaskStatus) -> RunnerResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        match Self::find_mut(&mut tasks, id) {
            Some(task) => {
                task.status = status;
                Ok(())
            }
            None => Err(RunnerError::task_store(format!("no such task id: {id}"))),
        }
    }
}

/// Helper for building a single top-level task with no subtasks, dependencies,
/// or extra text fields — used throughout the test suite.
pub fn simple_task(id: &str, title: &str, status: TaskStatus) -> Task {
    Task {
        id: id.to_string(),
        title: title.to_string(),
        description: None,
        details: None,
        test_strategy: None,
        dependencies: Vec::new(),
        status,
        subtasks: Vec::new(),
    }
}
