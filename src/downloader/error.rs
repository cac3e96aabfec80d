use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Rejected before any task was created: empty or malformed URL.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The existence probe failed; no task was created.
    #[error("probe failed for {url}: {reason}")]
    ProbeFailure { url: String, reason: String },
    /// Connection, timeout or HTTP error during streaming. Partial bytes
    /// already on disk are retained.
    #[error("transport failure: {0}")]
    TransportFailure(String),
    /// Lifecycle command for a task id that does not exist, is already
    /// terminal, or cannot accept the command in its current state.
    #[error("unknown or finished task: {0}")]
    UnknownTask(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
