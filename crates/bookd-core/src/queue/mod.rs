//! Queue operations (§3.2, §4.7): a `task_id -> Task` map plus a derived
//! priority ordering, with every mutation atomic with respect to a single
//! mutex (§9 redesign: "global mutable module state" collapsed into one
//! struct owning a mutex).

mod task;

pub use task::{Task, TaskStatus};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{info, warn};

/// Tasks older than this are eligible for `clear_completed` (an implicit
/// default; callers may also force-clear everything).
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task already active: {0}")]
    AlreadyActive(String),
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("invalid status transition for {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("download_path may only be set when transitioning to COMPLETE")]
    PathNotAllowed,
    #[error("priority changes are only permitted on QUEUED tasks")]
    NotQueued,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Validates a status transition against §4.7's state machine. All
/// non-{QUEUED,CANCELLED} transitions originate from the worker owning the
/// task, so this only rules out transitions that skip states or leave a
/// terminal status.
fn valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Queued, Resolving)
            | (Queued, Cancelled)
            | (Resolving, Downloading)
            | (Resolving, Cancelled)
            | (Resolving, Error)
            | (Downloading, Complete)
            | (Downloading, Error)
            | (Downloading, Cancelled)
            | (Complete, Available)
            | (Complete, Done)
    )
}

#[derive(Default)]
pub struct Queue {
    tasks: Mutex<HashMap<String, Task>>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects if `task_id` is already present in any active (non-terminal)
    /// status; assigns `added_time`; places into QUEUED.
    pub fn add(&self, mut task: Task) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(existing) = tasks.get(&task.task_id) {
            if !existing.status.is_terminal() {
                return Err(QueueError::AlreadyActive(task.task_id));
            }
        }
        task.added_time = now_millis();
        task.status = TaskStatus::Queued;
        info!(task_id = %task.task_id, "queue: task added");
        tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    /// Returns the QUEUED task with lowest `(priority, added_time)`,
    /// atomically transitioning it to RESOLVING.
    pub fn get_next(&self) -> Option<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let next_id = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .min_by_key(|t| (t.priority, t.added_time))
            .map(|t| t.task_id.clone())?;
        let task = tasks.get_mut(&next_id)?;
        task.status = TaskStatus::Resolving;
        Some(task.clone())
    }

    /// Sets progress, clamped so it never regresses within a span (§I6).
    pub fn update_progress(&self, id: &str, pct: f64) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| QueueError::UnknownTask(id.to_string()))?;
        task.progress = pct.max(task.progress).clamp(0.0, 100.0);
        Ok(())
    }

    pub fn update_status(&self, id: &str, status: TaskStatus) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| QueueError::UnknownTask(id.to_string()))?;
        if !valid_transition(task.status, status) {
            return Err(QueueError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status,
                to: status,
            });
        }
        task.status = status;
        Ok(())
    }

    pub fn update_status_message(&self, id: &str, message: impl Into<String>) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| QueueError::UnknownTask(id.to_string()))?;
        task.status_message = Some(message.into());
        Ok(())
    }

    /// Permitted only when the task is transitioning (or has transitioned)
    /// to COMPLETE.
    pub fn update_download_path(&self, id: &str, path: std::path::PathBuf) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| QueueError::UnknownTask(id.to_string()))?;
        if task.status != TaskStatus::Complete {
            return Err(QueueError::PathNotAllowed);
        }
        task.download_path = Some(path);
        Ok(())
    }

    /// Sets the task's cancel flag; if QUEUED, immediately transitions to
    /// CANCELLED. Otherwise the worker owning the task observes the flag.
    pub fn cancel_download(&self, id: &str) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| QueueError::UnknownTask(id.to_string()))?;
        task.cancel_flag.cancel();
        if task.status == TaskStatus::Queued {
            task.status = TaskStatus::Cancelled;
        }
        Ok(())
    }

    /// Priority changes are permitted only on QUEUED tasks; they take effect
    /// at the next `get_next`.
    pub fn set_priority(&self, id: &str, priority: i64) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| QueueError::UnknownTask(id.to_string()))?;
        if task.status != TaskStatus::Queued {
            return Err(QueueError::NotQueued);
        }
        task.priority = priority;
        Ok(())
    }

    /// Bulk priority reassignment: `{task_id: priority}`. Returns the number
    /// of QUEUED tasks updated; entries for unknown or non-QUEUED tasks are
    /// skipped rather than erroring the whole batch.
    pub fn reorder_queue(&self, priorities: &HashMap<String, i64>) -> usize {
        let mut tasks = self.tasks.lock().unwrap();
        let mut updated = 0;
        for (id, prio) in priorities {
            if let Some(task) = tasks.get_mut(id) {
                if task.status == TaskStatus::Queued {
                    task.priority = *prio;
                    updated += 1;
                }
            }
        }
        updated
    }

    /// QUEUED task ids in scheduling order.
    pub fn get_queue_order(&self) -> Vec<String> {
        let tasks = self.tasks.lock().unwrap();
        let mut queued: Vec<&Task> = tasks.values().filter(|t| t.status == TaskStatus::Queued).collect();
        queued.sort_by_key(|t| (t.priority, t.added_time));
        queued.into_iter().map(|t| t.task_id.clone()).collect()
    }

    /// Snapshot grouped by status, for the API and Broadcaster.
    pub fn snapshot_by_status(&self) -> HashMap<TaskStatus, Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut grouped: HashMap<TaskStatus, Vec<Task>> = HashMap::new();
        for task in tasks.values() {
            grouped.entry(task.status).or_default().push(task.clone());
        }
        grouped
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().get(id).cloned()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Resolving | TaskStatus::Downloading))
            .map(|t| t.task_id.clone())
            .collect()
    }

    /// Removes terminal tasks. If `all`, removes every terminal task
    /// regardless of age; otherwise only those older than `STATUS_TIMEOUT`.
    pub fn clear_completed(&self, all: bool) -> usize {
        let mut tasks = self.tasks.lock().unwrap();
        let now = now_millis();
        let before = tasks.len();
        tasks.retain(|_, t| {
            if !t.status.is_terminal() {
                return true;
            }
            if all {
                return false;
            }
            let age = Duration::from_millis(now.saturating_sub(t.added_time));
            age < STATUS_TIMEOUT
        });
        let removed = before - tasks.len();
        if removed > 0 {
            warn!(removed, "queue: cleared completed tasks");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_and_fifo_ordering() {
        let q = Queue::new();
        let mut a = Task::new("a", "x", 5);
        a.added_time = 1;
        let mut b = Task::new("b", "x", 1);
        b.added_time = 2;
        let mut c = Task::new("c", "x", 1);
        c.added_time = 1;
        q.tasks.lock().unwrap().insert(a.task_id.clone(), a);
        q.tasks.lock().unwrap().insert(b.task_id.clone(), b);
        q.tasks.lock().unwrap().insert(c.task_id.clone(), c);

        let first = q.get_next().unwrap();
        assert_eq!(first.task_id, "c");
        let second = q.get_next().unwrap();
        assert_eq!(second.task_id, "b");
        let third = q.get_next().unwrap();
        assert_eq!(third.task_id, "a");
    }

    #[test]
    fn add_rejects_duplicate_active_task_id() {
        let q = Queue::new();
        q.add(Task::new("dup", "x", 1)).unwrap();
        let err = q.add(Task::new("dup", "x", 1)).unwrap_err();
        assert!(matches!(err, QueueError::AlreadyActive(_)));
    }

    #[test]
    fn add_allows_reuse_after_terminal() {
        let q = Queue::new();
        q.add(Task::new("reused", "x", 1)).unwrap();
        q.update_status("reused", TaskStatus::Resolving).unwrap();
        q.update_status("reused", TaskStatus::Downloading).unwrap();
        q.update_status("reused", TaskStatus::Cancelled).unwrap();
        q.add(Task::new("reused", "x", 1)).unwrap();
    }

    #[test]
    fn progress_never_regresses() {
        let q = Queue::new();
        q.add(Task::new("p", "x", 1)).unwrap();
        q.update_progress("p", 50.0).unwrap();
        q.update_progress("p", 30.0).unwrap();
        assert_eq!(q.get("p").unwrap().progress, 50.0);
    }

    #[test]
    fn invalid_transition_rejected() {
        let q = Queue::new();
        q.add(Task::new("t", "x", 1)).unwrap();
        let err = q.update_status("t", TaskStatus::Complete).unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));
    }

    #[test]
    fn download_path_requires_complete_status() {
        let q = Queue::new();
        q.add(Task::new("t", "x", 1)).unwrap();
        let err = q
            .update_download_path("t", "/tmp/x".into())
            .unwrap_err();
        assert!(matches!(err, QueueError::PathNotAllowed));

        q.update_status("t", TaskStatus::Resolving).unwrap();
        q.update_status("t", TaskStatus::Downloading).unwrap();
        q.update_status("t", TaskStatus::Complete).unwrap();
        q.update_download_path("t", "/tmp/x".into()).unwrap();
        assert_eq!(q.get("t").unwrap().download_path, Some("/tmp/x".into()));
    }

    #[test]
    fn cancel_queued_task_transitions_immediately() {
        let q = Queue::new();
        q.add(Task::new("t", "x", 1)).unwrap();
        q.cancel_download("t").unwrap();
        let task = q.get("t").unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.cancel_flag.is_cancelled());
    }

    #[test]
    fn cancel_downloading_task_sets_flag_without_transition() {
        let q = Queue::new();
        q.add(Task::new("t", "x", 1)).unwrap();
        q.update_status("t", TaskStatus::Resolving).unwrap();
        q.update_status("t", TaskStatus::Downloading).unwrap();
        q.cancel_download("t").unwrap();
        let task = q.get("t").unwrap();
        assert_eq!(task.status, TaskStatus::Downloading);
        assert!(task.cancel_flag.is_cancelled());
    }

    #[test]
    fn set_priority_only_on_queued() {
        let q = Queue::new();
        q.add(Task::new("t", "x", 1)).unwrap();
        q.update_status("t", TaskStatus::Resolving).unwrap();
        let err = q.set_priority("t", 9).unwrap_err();
        assert!(matches!(err, QueueError::NotQueued));
    }

    #[test]
    fn clear_completed_all_removes_terminal_tasks() {
        let q = Queue::new();
        q.add(Task::new("t", "x", 1)).unwrap();
        q.cancel_download("t").unwrap();
        let removed = q.clear_completed(true);
        assert_eq!(removed, 1);
        assert!(q.get("t").is_none());
    }

    #[test]
    fn get_next_returns_none_when_empty() {
        let q = Queue::new();
        assert!(q.get_next().is_none());
    }
}
