use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{error, warn};

use dlmanager::downloader::{
    DownloadManager, DownloadObserver, DownloadTask, ManagerConfig, ProgressSample, TaskStatus,
};
use dlmanager::extractor::{LinkCategory, LinkExtractor};

mod cli;

/// Presentation layer: renders one progress bar per task from observer
/// callbacks. All lifecycle decisions stay in the download manager.
struct ConsoleObserver {
    multi: MultiProgress,
    bars: tokio::sync::Mutex<HashMap<String, ProgressBar>>,
}

impl ConsoleObserver {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn bar(&self, task_id: &str) -> Option<ProgressBar> {
        self.bars.lock().await.get(task_id).cloned()
    }
}

#[async_trait]
impl DownloadObserver for ConsoleObserver {
    async fn on_task_created(&self, task: &DownloadTask) {
        let pb = self.multi.add(ProgressBar::new(task.total_size));
        pb.set_style(
            ProgressStyle::with_template(
                "{msg} [{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} ({binary_bytes_per_sec})",
            )
            .unwrap(),
        );
        let name = task
            .output_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| task.task_id.clone());
        pb.set_message(name);
        self.bars.lock().await.insert(task.task_id.clone(), pb);
    }

    async fn on_progress(&self, sample: &ProgressSample) {
        if let Some(pb) = self.bar(&sample.task_id).await {
            if sample.total_size > 0 {
                pb.set_length(sample.total_size);
            }
            pb.set_position(sample.downloaded);
        }
    }

    async fn on_completed(&self, task_id: &str, path: &Path) {
        if let Some(pb) = self.bar(task_id).await {
            pb.finish_with_message(format!("{} {}", "done".green(), path.display()));
        }
    }

    async fn on_failed(&self, task_id: &str, error: &str) {
        if let Some(pb) = self.bar(task_id).await {
            pb.abandon_with_message(format!("{} {}", "failed".red(), error));
        }
    }

    async fn on_cancelled(&self, task_id: &str) {
        if let Some(pb) = self.bar(task_id).await {
            pb.abandon_with_message("cancelled".yellow().to_string());
        }
    }
}

async fn run_get(urls: Vec<String>, output_dir: PathBuf, concurrency: usize) -> anyhow::Result<()> {
    let manager = DownloadManager::new(ManagerConfig {
        max_concurrent: concurrency,
        output_dir,
        ..Default::default()
    })?;
    manager.subscribe(Arc::new(ConsoleObserver::new())).await;

    let mut submitted = 0usize;
    for url in &urls {
        match manager.submit(url).await {
            Ok(_) => submitted += 1,
            Err(e) => error!("{}: {}", url, e),
        }
    }
    if submitted == 0 {
        anyhow::bail!("no downloads started");
    }

    tokio::select! {
        _ = manager.wait_all() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping transfers");
        }
    }

    let failures = manager
        .tasks()
        .await
        .iter()
        .filter(|task| matches!(task.status, TaskStatus::Failed(_)))
        .count();
    manager.shutdown().await;
    if failures > 0 {
        anyhow::bail!("{failures} download(s) failed");
    }
    Ok(())
}

async fn run_links(url: String, filter: LinkCategory) -> anyhow::Result<()> {
    let extractor = LinkExtractor::new()?;
    let pb = ProgressBar::new(100);
    pb.set_style(ProgressStyle::with_template("scanning [{wide_bar}] {pos}%").unwrap());
    let links = extractor
        .extract(&url, filter, |percent| pb.set_position(percent as u64))
        .await?;
    pb.finish_and_clear();

    if links.is_empty() {
        println!("{}", "no links found".yellow());
        return Ok(());
    }
    for link in &links {
        println!("{link}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let args = cli::Cli::parse();
    match args.command {
        cli::Command::Get {
            urls,
            output_dir,
            concurrency,
        } => run_get(urls, output_dir, concurrency).await,
        cli::Command::Links { url, filter } => run_links(url, filter).await,
    }
}
