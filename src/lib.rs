pub mod downloader;
pub mod extractor;
pub mod resolver;

pub use downloader::{
    DownloadError, DownloadManager, DownloadObserver, DownloadTask, ManagerConfig, ProgressSample,
    TaskStatus,
};
