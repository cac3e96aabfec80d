use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::error::DownloadError;
use super::observer::DownloadObserver;
use super::progress::{ObserverSet, ProgressAggregator, TransferEvent};
use super::task::{DownloadTask, TaskStatus};
use super::transfer::{TransferUnit, file_name_from_url};

const USER_AGENT: &str = "Mozilla/5.0";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Upper bound on simultaneously running transfer units.
    pub max_concurrent: usize,
    /// Directory destination files are written into.
    pub output_dir: PathBuf,
    /// Aggregator reporting interval; observers receive at most one progress
    /// update per task per interval.
    pub report_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            output_dir: PathBuf::from("."),
            report_interval: Duration::from_secs(1),
        }
    }
}

struct TaskEntry {
    task: Arc<Mutex<DownloadTask>>,
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    join: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Owner of all task records and coordinator of lifecycle commands.
///
/// Constructed once by the process entry point and passed by reference; the
/// task table is the only structure touched from multiple execution contexts
/// and lives behind a concurrent map. Each task runs on its own spawned
/// tokio task, gated by a semaphore sized to the worker pool.
pub struct DownloadManager {
    tasks: Arc<DashMap<String, TaskEntry>>,
    semaphore: Arc<Semaphore>,
    client: reqwest::Client,
    events: mpsc::UnboundedSender<TransferEvent>,
    observers: ObserverSet,
    aggregator: JoinHandle<()>,
    output_dir: PathBuf,
}

impl DownloadManager {
    pub fn new(config: ManagerConfig) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| DownloadError::TransportFailure(e.to_string()))?;

        let (events, rx) = mpsc::unbounded_channel();
        let observers: ObserverSet = Arc::new(RwLock::new(Vec::new()));
        let aggregator =
            ProgressAggregator::spawn(rx, Arc::clone(&observers), config.report_interval);

        Ok(Self {
            tasks: Arc::new(DashMap::new()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            client,
            events,
            observers,
            aggregator,
            output_dir: config.output_dir,
        })
    }

    /// Registers an observer for task creation, progress and terminal events.
    pub async fn subscribe(&self, observer: Arc<dyn DownloadObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Validates the URL, probes the server and queues a new transfer.
    ///
    /// Fails fast with `InvalidInput` or `ProbeFailure` before creating any
    /// task. Submission never blocks on the worker pool: tasks beyond the
    /// pool bound sit in `Pending` until a slot frees.
    pub async fn submit(&self, url: &str) -> Result<String, DownloadError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DownloadError::InvalidInput("empty url".to_string()));
        }
        let parsed =
            Url::parse(url).map_err(|e| DownloadError::InvalidInput(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidInput(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        // Existence probe: reject doomed transfers before creating a task.
        let probe = self
            .client
            .head(parsed.as_str())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| DownloadError::ProbeFailure {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if !probe.status().is_success() {
            return Err(DownloadError::ProbeFailure {
                url: url.to_string(),
                reason: format!("HTTP status {}", probe.status()),
            });
        }
        let probed_size: u64 = probe
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .and_then(|len| len.parse().ok())
            .unwrap_or(0);

        let output_path = self.output_dir.join(file_name_from_url(&parsed));
        self.reject_duplicate_target(&output_path).await?;
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let task_id = uuid::Uuid::new_v4().to_string();
        let task = DownloadTask {
            task_id: task_id.clone(),
            url: url.to_string(),
            output_path,
            total_size: probed_size,
            downloaded: 0,
            speed: 0.0,
            status: TaskStatus::Pending,
        };
        debug!("submitting task {}: {}", task_id, url);

        let record = Arc::new(Mutex::new(task.clone()));
        let paused = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));

        // Table entry goes in before the creation event: observers may look
        // the task up from their `on_task_created` callback.
        self.tasks.insert(
            task_id.clone(),
            TaskEntry {
                task: Arc::clone(&record),
                paused: Arc::clone(&paused),
                cancelled: Arc::clone(&cancelled),
                join: std::sync::Mutex::new(None),
            },
        );
        let _ = self.events.send(TransferEvent::Created(task));

        let unit = TransferUnit::new(
            Arc::clone(&record),
            self.client.clone(),
            paused,
            cancelled,
            self.events.clone(),
        );

        let semaphore = Arc::clone(&self.semaphore);
        let events = self.events.clone();
        let queued_record = record;
        let queued_id = task_id.clone();
        let join = tokio::spawn(async move {
            // Queued tasks stay Pending until a pool slot frees up.
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Pool closed mid-queue (shutdown); settle the task here.
                    let mut task = queued_record.lock().await;
                    if task.try_set_status(TaskStatus::Cancelled) {
                        let _ = events.send(TransferEvent::Cancelled { task_id: queued_id });
                    }
                    return;
                }
            };
            let _permit = permit;
            unit.run().await;
        });
        if let Some(entry) = self.tasks.get(&task_id)
            && let Ok(mut slot) = entry.join.lock()
        {
            *slot = Some(join);
        }
        Ok(task_id)
    }

    /// Pauses a running transfer at the next chunk boundary.
    pub async fn pause(&self, task_id: &str) -> Result<(), DownloadError> {
        let (record, paused, _) = self.entry_handles(task_id)?;
        let mut task = record.lock().await;
        if !task.try_set_status(TaskStatus::Paused) {
            return Err(DownloadError::UnknownTask(task_id.to_string()));
        }
        paused.store(true, Ordering::SeqCst);
        task.speed = 0.0;
        info!("paused task {}", task_id);
        Ok(())
    }

    /// Resumes a paused transfer from the same connection and offset.
    pub async fn resume(&self, task_id: &str) -> Result<(), DownloadError> {
        let (record, paused, _) = self.entry_handles(task_id)?;
        let mut task = record.lock().await;
        if task.status != TaskStatus::Paused || !task.try_set_status(TaskStatus::Running) {
            return Err(DownloadError::UnknownTask(task_id.to_string()));
        }
        paused.store(false, Ordering::SeqCst);
        info!("resumed task {}", task_id);
        Ok(())
    }

    /// Cancels a pending, running or paused transfer. Cooperative: a running
    /// unit stops at the next chunk boundary and keeps its partial bytes.
    pub async fn cancel(&self, task_id: &str) -> Result<(), DownloadError> {
        let (record, _, cancelled) = self.entry_handles(task_id)?;
        let mut task = record.lock().await;
        if task.status.is_terminal() {
            return Err(DownloadError::UnknownTask(task_id.to_string()));
        }
        cancelled.store(true, Ordering::SeqCst);
        if task.status == TaskStatus::Pending {
            // Never started; settle it now instead of waiting for a pool slot.
            if task.try_set_status(TaskStatus::Cancelled) {
                let _ = self.events.send(TransferEvent::Cancelled {
                    task_id: task_id.to_string(),
                });
            }
        }
        info!("cancelled task {}", task_id);
        Ok(())
    }

    /// Snapshot of one task, if it exists.
    pub async fn task(&self, task_id: &str) -> Option<DownloadTask> {
        let record = {
            let entry = self.tasks.get(task_id)?;
            Arc::clone(&entry.task)
        };
        Some(record.lock().await.clone())
    }

    /// Snapshots of all known tasks, in no particular order.
    pub async fn tasks(&self) -> Vec<DownloadTask> {
        let records: Vec<Arc<Mutex<DownloadTask>>> = self
            .tasks
            .iter()
            .map(|entry| Arc::clone(&entry.task))
            .collect();
        let mut snapshots = Vec::with_capacity(records.len());
        for record in records {
            snapshots.push(record.lock().await.clone());
        }
        snapshots
    }

    /// Waits until every submitted task has reached a terminal state.
    pub async fn wait_all(&self) {
        loop {
            if self
                .tasks()
                .await
                .iter()
                .all(|task| task.status.is_terminal())
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Signals every live unit to stop, joins them all, then drains the
    /// aggregator. No writes reach disk after this returns.
    pub async fn shutdown(self) {
        let Self {
            tasks,
            semaphore,
            events,
            aggregator,
            ..
        } = self;

        semaphore.close();
        for entry in tasks.iter() {
            entry.cancelled.store(true, Ordering::SeqCst);
        }
        let handles: Vec<JoinHandle<()>> = tasks
            .iter()
            .filter_map(|entry| {
                entry
                    .join
                    .lock()
                    .ok()
                    .and_then(|mut handle| handle.take())
            })
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("transfer task panicked during shutdown: {}", e);
            }
        }

        // Closing the event channel stops the aggregator after a final flush.
        drop(events);
        let _ = aggregator.await;
        debug!("download manager stopped");
    }

    fn entry_handles(
        &self,
        task_id: &str,
    ) -> Result<(Arc<Mutex<DownloadTask>>, Arc<AtomicBool>, Arc<AtomicBool>), DownloadError> {
        let entry = self
            .tasks
            .get(task_id)
            .ok_or_else(|| DownloadError::UnknownTask(task_id.to_string()))?;
        Ok((
            Arc::clone(&entry.task),
            Arc::clone(&entry.paused),
            Arc::clone(&entry.cancelled),
        ))
    }

    /// The destination file is exclusively owned by a single transfer unit;
    /// a second live task for the same path is rejected.
    async fn reject_duplicate_target(&self, output_path: &PathBuf) -> Result<(), DownloadError> {
        let records: Vec<Arc<Mutex<DownloadTask>>> = self
            .tasks
            .iter()
            .map(|entry| Arc::clone(&entry.task))
            .collect();
        for record in records {
            let task = record.lock().await;
            if &task.output_path == output_path && !task.status.is_terminal() {
                return Err(DownloadError::InvalidInput(format!(
                    "{} is already being downloaded",
                    output_path.display()
                )));
            }
        }
        Ok(())
    }
}
