use async_trait::async_trait;
use std::path::Path;

use super::task::{DownloadTask, ProgressSample};

/// Contract between the download engine and any presentation layer.
///
/// The aggregator calls these methods on every subscribed observer. For a
/// given task, `on_progress` samples arrive in non-decreasing byte order and
/// exactly one terminal callback (`on_completed`, `on_failed` or
/// `on_cancelled`) fires. Ordering across different tasks is unspecified.
#[async_trait]
pub trait DownloadObserver: Send + Sync + 'static {
    /// A task was accepted by the registry and is queued or starting.
    async fn on_task_created(&self, task: &DownloadTask);

    /// Latest coalesced progress for one task, at most once per reporting
    /// interval.
    async fn on_progress(&self, sample: &ProgressSample);

    /// The transfer finished and the file at `path` is complete.
    async fn on_completed(&self, task_id: &str, path: &Path);

    /// The transfer failed; partial bytes stay on disk for a later resume.
    async fn on_failed(&self, task_id: &str, error: &str);

    /// The transfer was cancelled by the caller.
    async fn on_cancelled(&self, _task_id: &str) {}
}
