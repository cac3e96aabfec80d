pub mod error;
pub mod manager;
pub mod observer;
pub mod task;

mod progress;
mod transfer;

pub use error::DownloadError;
pub use manager::{DownloadManager, ManagerConfig};
pub use observer::DownloadObserver;
pub use task::{DownloadTask, ProgressSample, TaskStatus};
