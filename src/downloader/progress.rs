use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::observer::DownloadObserver;
use super::task::{DownloadTask, ProgressSample};

/// Raw events sent from transfer units to the aggregator.
#[derive(Debug)]
pub(crate) enum TransferEvent {
    Created(DownloadTask),
    Progress(ProgressSample),
    Completed { task_id: String, path: PathBuf },
    Failed { task_id: String, error: String },
    Cancelled { task_id: String },
}

pub(crate) type ObserverSet = Arc<RwLock<Vec<Arc<dyn DownloadObserver>>>>;

/// Rate-limiting relay between transfer units and observers.
///
/// Progress bursts are coalesced per task: only the newest sample survives
/// until the next tick, so observers see at most one update per task per
/// reporting interval no matter how many chunks arrived. Lifecycle events
/// pass through immediately, flushing that task's pending sample first so
/// per-task ordering stays non-decreasing.
pub(crate) struct ProgressAggregator {
    rx: mpsc::UnboundedReceiver<TransferEvent>,
    observers: ObserverSet,
    interval: Duration,
    pending: HashMap<String, ProgressSample>,
}

impl ProgressAggregator {
    pub(crate) fn spawn(
        rx: mpsc::UnboundedReceiver<TransferEvent>,
        observers: ObserverSet,
        interval: Duration,
    ) -> JoinHandle<()> {
        let aggregator = Self {
            rx,
            observers,
            interval,
            pending: HashMap::new(),
        };
        tokio::spawn(aggregator.run())
    }

    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    // Channel closed: the registry shut down.
                    None => break,
                },
                _ = tick.tick() => self.flush_all().await,
            }
        }
        self.flush_all().await;
        debug!("progress aggregator stopped");
    }

    async fn handle(&mut self, event: TransferEvent) {
        match event {
            TransferEvent::Created(task) => {
                for observer in self.observers().await {
                    observer.on_task_created(&task).await;
                }
            }
            TransferEvent::Progress(sample) => {
                // Newer samples supersede older ones for the same task.
                self.pending.insert(sample.task_id.clone(), sample);
            }
            TransferEvent::Completed { task_id, path } => {
                self.flush_one(&task_id).await;
                for observer in self.observers().await {
                    observer.on_completed(&task_id, &path).await;
                }
            }
            TransferEvent::Failed { task_id, error } => {
                self.flush_one(&task_id).await;
                for observer in self.observers().await {
                    observer.on_failed(&task_id, &error).await;
                }
            }
            TransferEvent::Cancelled { task_id } => {
                self.flush_one(&task_id).await;
                for observer in self.observers().await {
                    observer.on_cancelled(&task_id).await;
                }
            }
        }
    }

    async fn flush_one(&mut self, task_id: &str) {
        if let Some(sample) = self.pending.remove(task_id) {
            for observer in self.observers().await {
                observer.on_progress(&sample).await;
            }
        }
    }

    async fn flush_all(&mut self) {
        let samples: Vec<ProgressSample> = self.pending.drain().map(|(_, s)| s).collect();
        for sample in samples {
            for observer in self.observers().await {
                observer.on_progress(&sample).await;
            }
        }
    }

    async fn observers(&self) -> Vec<Arc<dyn DownloadObserver>> {
        self.observers.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::task::TaskStatus;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct Recorder {
        created: AtomicUsize,
        progress: AtomicUsize,
        completed: AtomicUsize,
        last_sample: Mutex<Option<ProgressSample>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                progress: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                last_sample: Mutex::new(None),
            }
        }
    }

    #[async_trait::async_trait]
    impl DownloadObserver for Recorder {
        async fn on_task_created(&self, _task: &DownloadTask) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_progress(&self, sample: &ProgressSample) {
            self.progress.fetch_add(1, Ordering::SeqCst);
            *self.last_sample.lock().await = Some(sample.clone());
        }
        async fn on_completed(&self, _task_id: &str, _path: &Path) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_failed(&self, _task_id: &str, _error: &str) {}
    }

    fn sample(downloaded: u64) -> ProgressSample {
        ProgressSample {
            task_id: "t1".to_string(),
            percent: Some((downloaded / 10) as u32),
            downloaded,
            total_size: 1000,
            speed: 100.0,
        }
    }

    #[tokio::test]
    async fn bursts_are_coalesced_to_the_newest_sample() {
        let (tx, rx) = mpsc::unbounded_channel();
        let observers: ObserverSet = Arc::new(RwLock::new(Vec::new()));
        let recorder = Arc::new(Recorder::new());
        observers.write().await.push(recorder.clone());
        let handle = ProgressAggregator::spawn(rx, observers, Duration::from_millis(50));

        for i in 1..=20u64 {
            tx.send(TransferEvent::Progress(sample(i * 10))).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(120)).await;

        // 20 events in well under one interval collapse to very few deliveries.
        let delivered = recorder.progress.load(Ordering::SeqCst);
        assert!(delivered >= 1 && delivered <= 3, "delivered {delivered}");
        let last = recorder.last_sample.lock().await.clone().unwrap();
        assert_eq!(last.downloaded, 200);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn terminal_event_flushes_pending_progress_first() {
        let (tx, rx) = mpsc::unbounded_channel();
        let observers: ObserverSet = Arc::new(RwLock::new(Vec::new()));
        let recorder = Arc::new(Recorder::new());
        observers.write().await.push(recorder.clone());
        let handle = ProgressAggregator::spawn(rx, observers, Duration::from_secs(60));

        let task = DownloadTask {
            task_id: "t1".to_string(),
            url: "http://example.com/a".to_string(),
            output_path: "a".into(),
            total_size: 1000,
            downloaded: 0,
            speed: 0.0,
            status: TaskStatus::Pending,
        };
        tx.send(TransferEvent::Created(task)).unwrap();
        tx.send(TransferEvent::Progress(sample(1000))).unwrap();
        tx.send(TransferEvent::Completed {
            task_id: "t1".to_string(),
            path: "a".into(),
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(recorder.created.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
        // The interval never ticked, yet the final sample was delivered
        // before the completion callback.
        assert_eq!(recorder.progress.load(Ordering::SeqCst), 1);
        let last = recorder.last_sample.lock().await.clone().unwrap();
        assert_eq!(last.downloaded, 1000);
    }
}
