//! Runner observer callback surface (spec §4.H, §14).
//!
//! Observers are notified of task lifecycle events and raw subprocess
//! output. A failing observer must never abort the run (spec §7); callers
//! should route observer invocations through [`notify`] rather than calling
//! trait methods directly so that panics/errors are contained.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::task::Task;

/// A chunk of raw stdout/stderr output from the running subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Summary of one completed attempt, passed to `on_task_end`.
#[derive(Debug, Clone)]
pub struct TaskEndSummary {
    pub task_id: String,
    pub attempt: u32,
    pub success: bool,
    pub note: String,
}

/// Observer hooks for the runner loop. All methods have no-op defaults so
/// implementers only override what they need.
pub trait RunnerObserver: Send + Sync {
    fn on_task_start(&self, _task: &Task, _attempt: u32) {}
    fn on_task_end(&self, _summary: &TaskEndSummary) {}
    fn on_info(&self, _message: &str) {}
    fn on_warning(&self, _message: &str) {}
    fn on_chunk(&self, _stream: Stream, _data: &str) {}
}

/// An observer that logs every callback through `tracing`.
pub struct TracingObserver;

impl RunnerObserver for TracingObserver {
    fn on_task_start(&self, task: &Task, attempt: u32) {
        tracing::info!(task_id = %task.id, attempt, "task start");
    }

    fn on_task_end(&self, summary: &TaskEndSummary) {
        tracing::info!(
            task_id = %summary.task_id,
            attempt = summary.attempt,
            success = summary.success,
            note = %summary.note,
            "task end"
        );
    }

    fn on_info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn on_warning(&self, message: &str) {
        tracing::warn!("{message}");
    }

    fn on_chunk(&self, _stream: Stream, _data: &str) {
        // deliberately silent: chunk volume is too high for info-level logs
    }
}

/// An observer that does nothing; the default when none is supplied.
pub struct NullObserver;

impl RunnerObserver for NullObserver {}

/// Invoke `f` against `observer`, swallowing panics so a broken observer
/// cannot poison the run (spec §7, "Observer errors").
pub fn notify<F: FnOnce()>(f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!("observer callback panicked; ignoring");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingObserver;
    impl RunnerObserver for PanickingObserver {
        fn on_info(&self, _message: &str) {
            panic!("boom");
        }
    }

    #[test]
    fn test_observer_panic_is_contained() {
        let observer = PanickingObserver;
        notify(|| observer.on_info("hello"));
    }

    #[test]
    fn test_null_observer_is_inert() {
        let observer = NullObserver;
        let task = crate::task::simple_task("1", "demo", crate::task::TaskStatus::Pending);
        observer.on_task_start(&task, 1);
        observer.on_info("hi");
        observer.on_warning("hi");
        observer.on_chunk(Stream::Stdout, "data");
    }
}
