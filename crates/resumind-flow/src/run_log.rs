use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use resumind_core::config::AppConfig;
use resumind_core::event::{EventBus, FlowEvent};
use resumind_core::types::RunId;

/// JSONL run logger.
///
/// Follows one run on the event bus and appends every event at or below
/// the configured level to `{log_dir}/{run_id}.jsonl`, one JSON object per
/// line, flushed after each write.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a FlowEvent,
}

impl RunLogger {
    /// `level` controls verbosity: 1 = run summary, 2 = steps, 3 = branches.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// `None` when run logging is not enabled in the config.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let dir = config.log_dir()?;
        let level = config.log.as_ref().map_or(2, |l| l.level);
        Some(Self::new(dir, level))
    }

    pub fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.log_dir.join(format!("{}.jsonl", run_id))
    }

    /// Subscribe now and write in a background task.
    ///
    /// The subscription happens before this returns, so a run started right
    /// after is logged from its first event.
    pub fn spawn(self, bus: &EventBus, run_id: RunId, cancel: CancellationToken) -> JoinHandle<()> {
        let rx = bus.subscribe();
        tokio::spawn(self.run(rx, run_id, cancel))
    }

    /// Write events for `run_id` until its `RunComplete`, cancellation, or
    /// the bus closing.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<FlowEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let log_path = self.path_for(&run_id);
        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if event.run_id() != &run_id {
                                continue;
                            }
                            if let Some(line) = self.render(&event) {
                                if let Err(e) = writer.write_all(line.as_bytes()).await {
                                    error!(error = %e, "Failed to write log entry");
                                    break;
                                }
                                if let Err(e) = writer.flush().await {
                                    error!(error = %e, "Failed to flush log");
                                }
                            }
                            if matches!(event, FlowEvent::RunComplete { .. }) {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// One JSONL line for `event`, or `None` if filtered out by level.
    fn render(&self, event: &FlowEvent) -> Option<String> {
        if event.level() > self.level {
            return None;
        }
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            event,
        };
        serde_json::to_string(&entry).ok().map(|json| json + "\n")
    }
}
