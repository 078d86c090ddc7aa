//! taskmaster-longrun: a long-horizon task runner that drives an external
//! coding-agent subprocess through a task graph, one task per invocation.

pub mod assets;
pub mod config;
pub mod error;
pub mod executor;
pub mod observer;
pub mod outcome;
pub mod paths;
pub mod plan;
pub mod runner;
pub mod sentinel;
pub mod store;
pub mod task;

pub use config::{AgentsMode, Mode, ReasoningEffort, RunnerOptions};
pub use error::{RunnerError, RunnerResult};
pub use runner::{run, FinalStatus, RunResult};
pub use task::{JsonTaskStore, MockTaskStore, Task, TaskStatus, TaskStore};
