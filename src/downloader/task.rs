use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed(String),
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed(_) | TaskStatus::Cancelled
        )
    }
}

/// Authoritative record for one requested transfer, owned by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadTask {
    pub task_id: String,
    pub url: String,
    pub output_path: PathBuf,
    /// 0 until the server reports a content length; never changes once known.
    pub total_size: u64,
    pub downloaded: u64,
    /// Bytes per second over the last reporting window; 0 while paused.
    pub speed: f64,
    pub status: TaskStatus,
}

impl DownloadTask {
    /// Applies a status transition if the state machine allows it.
    ///
    /// Terminal states are absorbing, `Paused` is only reachable from
    /// `Running`, and nothing ever goes back to `Pending`. Returns whether
    /// the transition happened, so racing writers (registry commands vs the
    /// transfer unit finishing) settle on exactly one terminal state.
    pub(crate) fn try_set_status(&mut self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        let allowed = match (&self.status, &next) {
            (current, _) if current.is_terminal() => false,
            (Pending, Running | Failed(_) | Cancelled) => true,
            (Running, Paused | Completed | Failed(_) | Cancelled) => true,
            (Paused, Running | Completed | Failed(_) | Cancelled) => true,
            _ => false,
        };
        if allowed {
            self.status = next;
        }
        allowed
    }
}

/// Snapshot forwarded to observers; superseded by each newer sample.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSample {
    pub task_id: String,
    /// Absent when the total size is unknown.
    pub percent: Option<u32>,
    pub downloaded: u64,
    pub total_size: u64,
    pub speed: f64,
}

impl ProgressSample {
    pub(crate) fn of(task: &DownloadTask) -> Self {
        Self {
            task_id: task.task_id.clone(),
            percent: percent_of(task.downloaded, task.total_size),
            downloaded: task.downloaded,
            total_size: task.total_size,
            speed: task.speed,
        }
    }
}

pub(crate) fn percent_of(downloaded: u64, total_size: u64) -> Option<u32> {
    if total_size == 0 {
        return None;
    }
    Some(((downloaded as f64 / total_size as f64) * 100.0).min(100.0) as u32)
}
