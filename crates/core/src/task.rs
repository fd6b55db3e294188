//! Join-to-completion task handles.
//!
//! Structured replacement for ad-hoc "run this in a thread if requested"
//! call shapes: work is submitted with [`Task::spawn`] and collected with
//! [`Task::join`]. There is no cancellation; callers wanting a bounded wait
//! must wrap externally. Concurrency across tasks is bounded only by the
//! [`RateGate`](crate::RateGate) the work flows through.

use std::thread::{self, JoinHandle};

/// Handle to a spawned unit of work.
///
/// # Example
///
/// ```rust
/// use fanarchive_core::Task;
///
/// let task = Task::spawn(|| 2 + 2);
/// assert_eq!(task.join(), 4);
/// ```
#[derive(Debug)]
pub struct Task<T> {
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Task<T> {
    /// Runs `work` on its own thread and returns a handle to its result.
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self { handle: thread::spawn(work) }
    }

    /// Blocks until the task finishes and returns its result.
    ///
    /// A panic inside the task is resumed on the joining thread.
    pub fn join(self) -> T {
        match self.handle.join() {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Whether the task has finished without having been joined yet.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_returns_value() {
        let task = Task::spawn(|| "done".to_string());
        assert_eq!(task.join(), "done");
    }

    #[test]
    fn test_tasks_run_concurrently() {
        let tasks: Vec<Task<usize>> = (0..4).map(|i| Task::spawn(move || i * 2)).collect();
        let results: Vec<usize> = tasks.into_iter().map(Task::join).collect();
        assert_eq!(results, vec![0, 2, 4, 6]);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn test_panic_is_resumed_on_join() {
        let task: Task<()> = Task::spawn(|| panic!("boom"));
        task.join();
    }
}
