use chrono::{DateTime, Local, NaiveDate};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// A single JSONL log entry written to the daily log file.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub ts: String,
    pub action: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl LogEntry {
    pub fn endpoint(mut self, url: &str) -> Self {
        self.endpoint = Some(url.to_string());
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}

fn entry_internal(action: &str, message: &str, error: Option<String>) -> LogEntry {
    LogEntry {
        ts: Local::now().to_rfc3339(),
        action: action.to_string(),
        message: message.to_string(),
        endpoint: None,
        attempt: None,
        error,
        duration_ms: None,
    }
}

/// Convenience: build a LogEntry for a lifecycle event.
pub fn event_entry(action: &str, message: &str) -> LogEntry {
    entry_internal(action, message, None)
}

/// Convenience: build a LogEntry for a failure.
pub fn error_entry(action: &str, message: &str, error: &str) -> LogEntry {
    entry_internal(action, message, Some(error.to_string()))
}

#[derive(Debug, Clone)]
pub struct ActivityLine {
    pub at: DateTime<Local>,
    pub message: String,
}

impl ActivityLine {
    pub fn render(&self) -> String {
        format!("{} - {}", self.at.format("%Y-%m-%d %H:%M:%S"), self.message)
    }
}

/// Lines kept in memory; older ones survive only in the daily files.
pub const MAX_LINES: usize = 1000;

/// Append-only, ordered record of what the core did. The newest
/// `MAX_LINES` are kept in memory for the `logs` view and, when a directory
/// is set, every entry is mirrored to `<dir>/YYYY-MM-DD.jsonl`.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    lines: Arc<Mutex<VecDeque<ActivityLine>>>,
    dir: Option<PathBuf>,
}

impl ActivityLog {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_dir(dir: PathBuf) -> Self {
        Self {
            lines: Arc::default(),
            dir: Some(dir),
        }
    }

    pub async fn record(&self, entry: LogEntry) {
        let message = match &entry.error {
            Some(error) => format!("{} ({})", entry.message, error),
            None => entry.message.clone(),
        };
        let mut lines = self.lines.lock().await;
        if lines.len() == MAX_LINES {
            lines.pop_front();
        }
        lines.push_back(ActivityLine {
            at: Local::now(),
            message,
        });
        drop(lines);

        if let Some(dir) = &self.dir {
            if let Err(err) = append(dir, &entry).await {
                warn!("failed to write activity log: {err}");
            }
        }
    }

    pub async fn lines(&self) -> Vec<ActivityLine> {
        self.lines.lock().await.iter().cloned().collect()
    }
}

fn daily_file(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(format!("{}.jsonl", day.format("%Y-%m-%d")))
}

/// Appends a `LogEntry` as one JSONL line to today's file in `dir`.
pub async fn append(dir: &Path, entry: &LogEntry) -> Result<(), String> {
    let mut line = serde_json::to_string(entry).map_err(|err| format!("serialize log entry: {err}"))?;
    line.push('\n');

    fs::create_dir_all(dir)
        .await
        .map_err(|err| format!("create {}: {err}", dir.display()))?;
    let path = daily_file(dir, Local::now().date_naive());
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|err| format!("open {}: {err}", path.display()))?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|err| format!("append to {}: {err}", path.display()))
}

/// True for a `YYYY-MM-DD.jsonl` name dated more than `max_days` before `today`.
fn is_expired(file_name: &str, today: NaiveDate, max_days: i64) -> bool {
    let Some(stem) = file_name.strip_suffix(".jsonl") else {
        return false;
    };
    match NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
        Ok(day) => (today - day).num_days() > max_days,
        Err(_) => false,
    }
}

/// Deletes daily log files older than `max_days`. Other files are left alone.
pub async fn cleanup_old_logs(dir: &Path, max_days: i64) {
    let Ok(mut entries) = fs::read_dir(dir).await else {
        debug!("no log directory at {}", dir.display());
        return;
    };
    let today = Local::now().date_naive();
    let mut removed = 0;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if !is_expired(&name.to_string_lossy(), today, max_days.max(1)) {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(err) => warn!("failed to delete old log {}: {err}", entry.path().display()),
        }
    }
    if removed > 0 {
        info!("removed {removed} expired log file(s) from {}", dir.display());
    }
}
