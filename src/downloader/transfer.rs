use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::error::DownloadError;
use super::progress::TransferEvent;
use super::task::{DownloadTask, ProgressSample, TaskStatus};

/// Poll cadence while paused. The loop sleeps rather than spinning and
/// re-checks the cancel flag on every pass.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Wall-clock gap between progress reports.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Executes a single HTTP download: streams the body to the destination file
/// in append mode, honours the pause and cancel flags at chunk boundaries,
/// and reports progress once per second through the event channel.
///
/// The unit never decides the task's lifecycle on its own; it only executes
/// and reports back. The registry owns the record and the flags.
pub(crate) struct TransferUnit {
    task: Arc<Mutex<DownloadTask>>,
    client: reqwest::Client,
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TransferEvent>,
}

impl TransferUnit {
    pub(crate) fn new(
        task: Arc<Mutex<DownloadTask>>,
        client: reqwest::Client,
        paused: Arc<AtomicBool>,
        cancelled: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Self {
        Self {
            task,
            client,
            paused,
            cancelled,
            events,
        }
    }

    pub(crate) async fn run(self) {
        let (task_id, url, output_path) = {
            let task = self.task.lock().await;
            if task.status.is_terminal() {
                // Cancelled while still queued; already settled by the registry.
                return;
            }
            (
                task.task_id.clone(),
                task.url.clone(),
                task.output_path.clone(),
            )
        };

        let result = if self.cancelled.load(Ordering::SeqCst) {
            Ok(false)
        } else {
            info!("starting transfer {}: {}", task_id, url);
            self.stream(&task_id, &url, &output_path).await
        };

        // Whoever wins the terminal transition emits the event; a lost race
        // means another writer (registry cancel) already reported it.
        let mut task = self.task.lock().await;
        match result {
            Ok(true) => {
                if task.try_set_status(TaskStatus::Completed) {
                    task.speed = 0.0;
                    info!("transfer {} completed: {}", task_id, output_path.display());
                    let _ = self.events.send(TransferEvent::Completed {
                        task_id,
                        path: output_path,
                    });
                }
            }
            Ok(false) => {
                if task.try_set_status(TaskStatus::Cancelled) {
                    task.speed = 0.0;
                    info!(
                        "transfer {} cancelled, {} bytes retained",
                        task_id, task.downloaded
                    );
                    let _ = self.events.send(TransferEvent::Cancelled { task_id });
                }
            }
            Err(e) => {
                let detail = e.to_string();
                if task.try_set_status(TaskStatus::Failed(detail.clone())) {
                    task.speed = 0.0;
                    error!("transfer {} failed: {}", task_id, detail);
                    let _ = self.events.send(TransferEvent::Failed {
                        task_id,
                        error: detail,
                    });
                }
            }
        }
    }

    /// Streams the response body to disk. Returns `Ok(true)` on a complete
    /// download and `Ok(false)` when the cancel flag stopped the loop.
    async fn stream(
        &self,
        task_id: &str,
        url: &str,
        output_path: &Path,
    ) -> Result<bool, DownloadError> {
        // Bytes already on disk from a previous attempt drive the resume offset.
        let existing = match tokio::fs::metadata(output_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = self.client.get(url);
        if existing > 0 {
            debug!("resuming {} from byte {}", task_id, existing);
            request = request.header(reqwest::header::RANGE, format!("bytes={existing}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::TransportFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::TransportFailure(format!(
                "HTTP status {status} for {url}"
            )));
        }

        // A 200 answer to a ranged request means the server ignored the
        // range; appending would duplicate bytes, so start over.
        let restart = existing > 0 && status != StatusCode::PARTIAL_CONTENT;
        let mut downloaded = if restart {
            warn!("server ignored range request for {}, restarting", task_id);
            0
        } else {
            existing
        };

        let remaining: Option<u64> = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .and_then(|len| len.parse().ok());
        let total_size = remaining.map(|len| len + downloaded).unwrap_or(0);

        {
            let mut task = self.task.lock().await;
            if !task.try_set_status(TaskStatus::Running) {
                // Cancelled between spawn and the response arriving.
                return Ok(false);
            }
            task.downloaded = downloaded;
            if total_size > 0 {
                task.total_size = total_size;
            }
        }

        let mut open = OpenOptions::new();
        if restart {
            open.write(true).truncate(true).create(true);
        } else {
            open.append(true).create(true);
        }
        let mut file = open.open(output_path).await?;

        let mut stream = response.bytes_stream();
        let mut last_report = Instant::now();
        let mut last_bytes = downloaded;
        let mut was_paused = false;

        // Chunks arrive at whatever size the transport reads; that size is
        // also the pause/cancel reaction bound, since the flags are only
        // checked between chunks.
        loop {
            // Pause gate, checked before consuming the next chunk. No data
            // is lost: the connection and file offset stay valid.
            while self.paused.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst) {
                was_paused = true;
                tokio::time::sleep(PAUSE_POLL).await;
            }
            if self.cancelled.load(Ordering::SeqCst) {
                file.flush().await?;
                return Ok(false);
            }
            if was_paused {
                // Fresh rate baseline, otherwise the first sample after a
                // resume reports a stale near-zero speed.
                last_report = Instant::now();
                last_bytes = downloaded;
                was_paused = false;
            }

            let chunk = match stream.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    // Partial bytes stay on disk for a later resume.
                    file.flush().await?;
                    return Err(DownloadError::TransportFailure(e.to_string()));
                }
                None => break,
            };

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            {
                let mut task = self.task.lock().await;
                task.downloaded = downloaded;
            }

            let elapsed = last_report.elapsed();
            if elapsed >= REPORT_INTERVAL {
                let speed = (downloaded - last_bytes) as f64 / elapsed.as_secs_f64();
                last_report = Instant::now();
                last_bytes = downloaded;
                let sample = {
                    let mut task = self.task.lock().await;
                    task.speed = speed;
                    ProgressSample::of(&task)
                };
                let _ = self.events.send(TransferEvent::Progress(sample));
            }
        }

        file.flush().await?;

        // Final sample so observers see the closing byte count.
        let sample = {
            let mut task = self.task.lock().await;
            task.downloaded = downloaded;
            let elapsed = last_report.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                task.speed = (downloaded - last_bytes) as f64 / elapsed;
            }
            ProgressSample::of(&task)
        };
        let _ = self.events.send(TransferEvent::Progress(sample));
        Ok(true)
    }
}

/// Destination file name derived from the URL's final path segment.
pub(crate) fn file_name_from_url(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
        .unwrap_or_else(|| "download".to_string())
}
