//! Append-only structured log (spec.md §4.3), grounded in
//! `original_source/shared/logger.py`'s line format and query operations,
//! with writes serialized behind a single mutex the way the teacher guards
//! its shared file/state handles (e.g. `Arc<RwLock<..>>` in
//! `knhk-workflow-engine/src/executor/engine.rs`).

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Record kind for one log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Status,
    Log,
    Error,
}

impl LogKind {
    fn as_str(self) -> &'static str {
        match self {
            LogKind::Status => "STATUS",
            LogKind::Log => "LOG",
            LogKind::Error => "ERROR",
        }
    }
}

/// Append-only, line-oriented log indexed by run ID.
pub struct StructuredLogger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StructuredLogger {
    /// Open (creating if necessary) the log file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// `logStatus(runID, name, status)`.
    pub async fn log_status(&self, run_id: u64, name: &str, status: &str) {
        self.write_line(run_id, name, LogKind::Status, status, None)
            .await;
        info!(run_id, step = name, status, "run status");
    }

    /// `logOutput(runID, name, text)` — one LOG record per non-empty line.
    pub async fn log_output(&self, run_id: u64, name: &str, text: &str) {
        for line in text.split('\n') {
            if line.trim().is_empty() {
                continue;
            }
            self.write_line(run_id, name, LogKind::Log, line, None).await;
            info!(run_id, step = name, "{}", line);
        }
    }

    /// `logError(runID, name, message)`.
    pub async fn log_error(&self, run_id: u64, name: &str, message: &str) {
        self.write_line(run_id, name, LogKind::Error, message, None)
            .await;
        error!(run_id, step = name, "{}", message);
    }

    /// `logStepCompletion(runID, name, exitCode)`.
    pub async fn log_step_completion(&self, run_id: u64, name: &str, exit_code: i32) {
        let status = if exit_code == 0 { "success" } else { "failed" };
        self.write_line(run_id, name, LogKind::Status, status, Some(exit_code))
            .await;
        info!(run_id, step = name, exit_code, status, "step completed");
    }

    async fn write_line(
        &self,
        run_id: u64,
        name: &str,
        kind: LogKind,
        content: &str,
        exit_code: Option<i32>,
    ) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut line = format!(
            "[{timestamp}] JOB:{run_id} STEP:{name} {}:{content}",
            kind.as_str()
        );
        if let Some(code) = exit_code {
            line.push_str(&format!(" EXIT:{code}"));
        }

        let _guard = self.write_lock.lock().await;
        if let Err(e) = append_line(&self.path, &line) {
            error!(run_id, "failed to append log line: {e}");
        }
    }

    /// `getRunLog(runID)` — every line mentioning `JOB:<runID> `, newline-joined.
    pub async fn get_run_log(&self, run_id: u64) -> String {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_run_log(&path, run_id))
            .await
            .unwrap_or_default()
    }

    /// `getLastStatus(runID)` — the last STATUS value observed for the run.
    pub async fn get_last_status(&self, run_id: u64) -> Option<String> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_last_status(&path, run_id))
            .await
            .ok()
            .flatten()
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    writeln!(file, "{line}")
}

fn read_run_log(path: &Path, run_id: u64) -> String {
    let needle = format!("JOB:{run_id} ");
    let Ok(file) = File::open(path) else {
        return String::new();
    };
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter(|line| line.contains(&needle))
        .collect();
    lines.join("\n")
}

fn read_last_status(path: &Path, run_id: u64) -> Option<String> {
    let needle = format!("JOB:{run_id} ");
    let file = File::open(path).ok()?;
    let mut last = None;
    for line in BufReader::new(file).lines().map_while(Result::ok) {
        if !line.contains(&needle) {
            continue;
        }
        if let Some(idx) = line.find("STATUS:") {
            let rest = &line[idx + "STATUS:".len()..];
            let status = rest.split_whitespace().next();
            if let Some(status) = status {
                last = Some(status.to_string());
            }
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_status_log_and_error_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logger = StructuredLogger::open(dir.path().join("cicd.log")).unwrap();

        logger.log_status(1, "a", "running").await;
        logger.log_output(1, "a", "line one\n\nline two").await;
        logger.log_step_completion(1, "a", 0).await;
        logger.log_error(2, "b", "boom").await;

        let run1 = logger.get_run_log(1).await;
        assert!(run1.contains("STATUS:running"));
        assert!(run1.contains("LOG:line one"));
        assert!(run1.contains("LOG:line two"));
        assert!(run1.contains("EXIT:0"));
        assert!(!run1.contains("JOB:2 "));

        assert_eq!(logger.get_last_status(1).await.as_deref(), Some("success"));
        assert_eq!(logger.get_last_status(2).await, None);
    }

    #[tokio::test]
    async fn unknown_run_has_no_log_or_status() {
        let dir = tempfile::tempdir().unwrap();
        let logger = StructuredLogger::open(dir.path().join("cicd.log")).unwrap();
        assert_eq!(logger.get_run_log(99).await, "");
        assert_eq!(logger.get_last_status(99).await, None);
    }
}
