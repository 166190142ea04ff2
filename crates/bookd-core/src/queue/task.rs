//! Task: the unit of scheduling (§3.1).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Queued,
    Resolving,
    Downloading,
    Complete,
    Available,
    Error,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Error | TaskStatus::Cancelled | TaskStatus::Done
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub task_id: String,
    pub source: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub format: Option<String>,
    pub size: Option<String>,
    pub preview: Option<String>,
    pub priority: i64,
    pub added_time: u64,
    pub status: TaskStatus,
    pub status_message: Option<String>,
    pub progress: f64,
    pub download_path: Option<std::path::PathBuf>,
    #[serde(skip)]
    pub cancel_flag: CancelToken,
}

impl Task {
    pub fn new(task_id: impl Into<String>, source: impl Into<String>, priority: i64) -> Self {
        let added_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            task_id: task_id.into(),
            source: source.into(),
            title: None,
            author: None,
            format: None,
            size: None,
            preview: None,
            priority,
            added_time,
            status: TaskStatus::Queued,
            status_message: None,
            progress: 0.0,
            download_path: None,
            cancel_flag: CancelToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_queued_with_zero_progress() {
        let t = Task::new("abc", "direct", 5);
        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(t.progress, 0.0);
        assert!(t.download_path.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Done.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Resolving.is_terminal());
        assert!(!TaskStatus::Downloading.is_terminal());
    }
}
