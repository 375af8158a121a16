use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Records older than this are pruned at startup and then daily.
pub(crate) const RETENTION_DAYS: i64 = 90;
/// How often a running server prunes the history file.
pub(crate) const PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// One admitted submission, as written to the history sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Absent when the request never reached sandbox creation.
    pub sandbox_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub identity: String,
    pub code: String,
    pub output: String,
    /// Error text, empty on success.
    pub error: String,
}

#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, record: ExecutionRecord) -> AppResult<()>;
}

/// Append-only JSON-lines history file.
pub struct JsonlHistory {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlHistory {
    /// Open the history file at `path`, creating its directory.
    pub async fn open(path: &Path) -> AppResult<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AppError::History(format!("create {}: {e}", dir.display())))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop records that finished before `now - retention_days`.
    ///
    /// Lines that fail to parse are kept as-is. Returns the number removed.
    pub async fn prune(&self, retention_days: i64, now: DateTime<Utc>) -> AppResult<usize> {
        let _guard = self.lock.lock().await;
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AppError::History(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let cutoff = now - ChronoDuration::days(retention_days);
        let mut kept = String::with_capacity(content.len());
        let mut removed = 0;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<ExecutionRecord>(line) {
                Ok(record) if record.finished_at < cutoff => removed += 1,
                Ok(_) => {
                    kept.push_str(line);
                    kept.push('\n');
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "unparseable history line kept");
                    kept.push_str(line);
                    kept.push('\n');
                }
            }
        }

        if removed > 0 {
            let tmp = self.path.with_extension("jsonl.tmp");
            tokio::fs::write(&tmp, kept)
                .await
                .map_err(|e| AppError::History(format!("write {}: {e}", tmp.display())))?;
            tokio::fs::rename(&tmp, &self.path)
                .await
                .map_err(|e| AppError::History(format!("replace {}: {e}", self.path.display())))?;
            info!(path = %self.path.display(), removed, "pruned history");
        }
        Ok(removed)
    }

    /// Prune every [`PRUNE_INTERVAL`] until the handle is aborted.
    ///
    /// The first pass runs one interval after spawning; startup prunes
    /// separately.
    pub fn spawn_pruner(self: Arc<Self>, retention_days: i64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.prune(retention_days, Utc::now()).await {
                    warn!(path = %self.path.display(), error = %e, "history prune failed");
                }
            }
        })
    }
}

#[async_trait]
impl HistorySink for JsonlHistory {
    async fn record(&self, record: ExecutionRecord) -> AppResult<()> {
        let mut line = serde_json::to_string(&record)
            .map_err(|e| AppError::History(format!("serialize record: {e}")))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AppError::History(format!("open {}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AppError::History(format!("append {}: {e}", self.path.display())))?;
        file.flush()
            .await
            .map_err(|e| AppError::History(format!("flush {}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identity: &str, finished_at: DateTime<Utc>) -> ExecutionRecord {
        ExecutionRecord {
            sandbox_id: Some("sandbox-1".into()),
            submitted_at: finished_at,
            finished_at,
            elapsed_ms: 12,
            identity: identity.into(),
            code: "main".into(),
            output: "ok\n".into(),
            error: String::new(),
        }
    }

    async fn read_records(path: &Path) -> Vec<ExecutionRecord> {
        let content = tokio::fs::read_to_string(path).await.unwrap();
        content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn open_creates_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/history.jsonl");
        let history = JsonlHistory::open(&path).await.unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert_eq!(history.path(), path);
    }

    #[tokio::test]
    async fn records_are_appended_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let history = JsonlHistory::open(&path).await.unwrap();

        let now = Utc::now();
        history.record(record("10.0.0.1", now)).await.unwrap();
        history.record(record("10.0.0.2", now)).await.unwrap();

        let records = read_records(&path).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identity, "10.0.0.1");
        assert_eq!(records[1].identity, "10.0.0.2");
    }

    #[tokio::test]
    async fn prune_removes_only_expired_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let history = JsonlHistory::open(&path).await.unwrap();

        let now = Utc::now();
        history
            .record(record("old", now - ChronoDuration::days(RETENTION_DAYS + 1)))
            .await
            .unwrap();
        history
            .record(record("recent", now - ChronoDuration::days(1)))
            .await
            .unwrap();

        assert_eq!(history.prune(RETENTION_DAYS, now).await.unwrap(), 1);
        let records = read_records(&path).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "recent");
    }

    #[tokio::test(start_paused = true)]
    async fn pruner_runs_daily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let history = Arc::new(JsonlHistory::open(&path).await.unwrap());

        let now = Utc::now();
        history
            .record(record("old", now - ChronoDuration::days(RETENTION_DAYS + 1)))
            .await
            .unwrap();
        history
            .record(record("recent", now - ChronoDuration::days(1)))
            .await
            .unwrap();

        let pruner = Arc::clone(&history).spawn_pruner(RETENTION_DAYS);
        tokio::time::sleep(PRUNE_INTERVAL / 2).await;
        assert_eq!(read_records(&path).await.len(), 2);

        tokio::time::sleep(PRUNE_INTERVAL / 2 + Duration::from_secs(60)).await;
        let records = read_records(&path).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "recent");
        pruner.abort();
    }

    #[tokio::test]
    async fn prune_without_a_file_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let history = JsonlHistory::open(&dir.path().join("history.jsonl"))
            .await
            .unwrap();
        assert_eq!(history.prune(RETENTION_DAYS, Utc::now()).await.unwrap(), 0);
    }
}
