use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// A unit of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    /// Back up, transfer, and request the remote restore of one job.
    Backup { job_id: i64 },
    /// Restore one transferred archive into a new course.
    Restore { job_id: i64 },
    /// Remove a half-restored course whose inline deletion failed.
    CourseCleanup { course_id: i64 },
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Backup { job_id } => write!(f, "backup(job {})", job_id),
            Task::Restore { job_id } => write!(f, "restore(job {})", job_id),
            Task::CourseCleanup { course_id } => write!(f, "course_cleanup(course {})", course_id),
        }
    }
}

/// A task together with the number of times it already failed retryably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueuedTask {
    pub task: Task,
    pub attempt: u32,
}

impl QueuedTask {
    pub fn first(task: Task) -> Self {
        Self { task, attempt: 0 }
    }

    pub fn next_attempt(self) -> Self {
        Self {
            task: self.task,
            attempt: self.attempt + 1,
        }
    }
}

/// Result of one run of a task, reported by the pool.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task: Task,
    pub attempt: u32,
    pub result: Result<(), String>,
    /// True when the pool queued another attempt.
    pub rescheduled: bool,
}

/// Hands tasks to whatever executes them.
pub trait TaskDispatcher: Send + Sync {
    fn dispatch(&self, task: Task) -> Result<(), WorkerError>;
}

/// Executes tasks on behalf of the pool.
pub trait TaskRunner: Send + Sync {
    /// Runs one attempt. `attempt` is 0 for the first run.
    fn run(&self, task: &Task, attempt: u32) -> Result<(), WorkerError>;

    /// Called once when a task failed retryably and no retries remain.
    fn give_up(&self, task: &Task, attempts: u32, error: &WorkerError);

    /// Called once when a task failed with an error no retry can fix,
    /// including a panic inside the run.
    fn abandon(&self, task: &Task, error: &WorkerError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_serde_tagged() {
        let json = serde_json::to_string(&Task::Restore { job_id: 4 }).unwrap();
        assert_eq!(json, r#"{"type":"restore","job_id":4}"#);
        let parsed: Task = serde_json::from_str(r#"{"type":"course_cleanup","course_id":9}"#).unwrap();
        assert_eq!(parsed, Task::CourseCleanup { course_id: 9 });
    }

    #[test]
    fn test_task_payload_without_id_is_rejected() {
        let parsed: Result<Task, _> = serde_json::from_str(r#"{"type":"backup"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_next_attempt() {
        let queued = QueuedTask::first(Task::Backup { job_id: 1 });
        assert_eq!(queued.attempt, 0);
        assert_eq!(queued.next_attempt().attempt, 1);
    }
}
