//! Run registry (spec.md §4.4): the in-memory table of active runs plus the
//! on-disk sidecar caches for manifest discovery and chat subscriptions.

pub mod sidecar;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::manifest::Pipeline;

/// Terminal and in-flight states a [`Run`] moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Emoji used by the status pusher, grounded in
    /// `original_source/bot/orchestrator.py`'s `status_emoji` table.
    pub fn emoji(self) -> &'static str {
        match self {
            RunStatus::Pending => "\u{23F3}",
            RunStatus::Running => "\u{1F504}",
            RunStatus::Success => "\u{2705}",
            RunStatus::Failed => "\u{274C}",
            RunStatus::Cancelled => "\u{1F6AB}",
        }
    }

    /// Lowercase status vocabulary used in structured log lines (spec.md §6).
    pub fn log_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Where a run should post/edit its live status, if the operator asked for it.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChatCoordinates {
    pub chat_id: i64,
    pub message_id: i64,
}

/// One pipeline execution (spec.md §3 `Run`).
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: u64,
    pub manifest_name: String,
    #[serde(skip)]
    pub pipeline: Arc<Pipeline>,
    pub requester: String,
    pub chat: Option<ChatCoordinates>,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub jobs_completed: u32,
    pub jobs_failed: u32,
    pub error: Option<String>,
}

impl Run {
    fn new(id: u64, manifest_name: String, pipeline: Arc<Pipeline>, requester: String, chat: Option<ChatCoordinates>) -> Self {
        Self {
            id,
            manifest_name,
            pipeline,
            requester,
            chat,
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            jobs_completed: 0,
            jobs_failed: 0,
            error: None,
        }
    }

    /// One-line status summary used by the status pusher and the CLI.
    pub fn status_line(&self, total_jobs: usize) -> String {
        format!(
            "{} {} — {}\nJobs: {}/{}",
            self.status.emoji(),
            self.manifest_name,
            format!("{:?}", self.status).to_uppercase(),
            self.jobs_completed,
            total_jobs,
        )
    }
}

/// In-memory table of active runs: RunID -> Run, exclusively owned here.
///
/// Grounded in `knhk-workflow-engine/src/executor/engine.rs`'s
/// `Arc<DashMap<CaseId, Case>>` registry, wrapping each entry in its own
/// `RwLock` so a run's driving engine task is the single writer while every
/// other reader (status pusher, Control API) only ever takes a read lock.
#[derive(Default)]
pub struct RunRegistry {
    runs: DashMap<u64, Arc<RwLock<Run>>>,
    next_id: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            runs: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next RunID and create a `Pending` run.
    pub fn create(
        &self,
        manifest_name: String,
        pipeline: Arc<Pipeline>,
        requester: String,
        chat: Option<ChatCoordinates>,
    ) -> Arc<RwLock<Run>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let run = Arc::new(RwLock::new(Run::new(id, manifest_name, pipeline, requester, chat)));
        self.runs.insert(id, run.clone());
        run
    }

    /// Fetch the handle for a run, if it exists. No eviction: every RunID
    /// created since process start remains queryable.
    pub fn get(&self, id: u64) -> Option<Arc<RwLock<Run>>> {
        self.runs.get(&id).map(|entry| entry.clone())
    }

    /// Read-only snapshot of a run's current state.
    pub async fn snapshot(&self, id: u64) -> Option<Run> {
        let handle = self.get(id)?;
        Some(handle.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn empty_pipeline() -> Arc<Pipeline> {
        Arc::new(Pipeline {
            name: "p".into(),
            job_order: vec![],
            jobs: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn run_ids_are_monotonic_and_not_evicted() {
        let registry = RunRegistry::new();
        let r1 = registry.create("p.yaml".into(), empty_pipeline(), "alice".into(), None);
        let r2 = registry.create("p.yaml".into(), empty_pipeline(), "alice".into(), None);
        assert_eq!(r1.read().await.id, 1);
        assert_eq!(r2.read().await.id, 2);
        assert!(registry.snapshot(1).await.is_some());
        assert!(registry.snapshot(2).await.is_some());
        assert!(registry.snapshot(3).await.is_none());
    }
}
