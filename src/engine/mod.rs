//! Pipeline Engine (spec.md §4.6): drives a Run top-to-bottom over its
//! collaborators. Grounded in `original_source/worker/job_processor.py`'s
//! `process_pipeline`/`process_job` for the top-level iteration and
//! short-circuit policy, with the status-pusher task and panic isolation
//! added per spec.md §4.6/§9.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::executors::{dispatch, CancelToken, ConfirmationRegistry, ExecutionContext};
use crate::logger::StructuredLogger;
use crate::manifest_source::ManifestSource;
use crate::notifier::NotifierAdapter;
use crate::registry::sidecar::{PipelineInfo, PipelinesTable, SidecarStore};
use crate::registry::{ChatCoordinates, Run, RunRegistry, RunStatus};
use crate::runner::ContainerRunner;

/// The pseudo step-name used for run-level (not step- or job-level) log
/// lines, matching the original `job_processor.py`'s `"orchestrator"`.
const ORCHESTRATOR: &str = "orchestrator";

/// Owns every collaborator the driver task needs; cheap to clone since
/// every field is an `Arc`.
#[derive(Clone)]
pub struct PipelineEngine {
    registry: Arc<RunRegistry>,
    logger: Arc<StructuredLogger>,
    runner: Arc<ContainerRunner>,
    notifier: Arc<NotifierAdapter>,
    confirmations: Arc<ConfirmationRegistry>,
    source: Arc<dyn ManifestSource>,
    sidecar: Arc<SidecarStore>,
}

impl PipelineEngine {
    pub fn new(
        registry: Arc<RunRegistry>,
        logger: Arc<StructuredLogger>,
        runner: Arc<ContainerRunner>,
        notifier: Arc<NotifierAdapter>,
        confirmations: Arc<ConfirmationRegistry>,
        source: Arc<dyn ManifestSource>,
        sidecar: Arc<SidecarStore>,
    ) -> Self {
        Self {
            registry,
            logger,
            runner,
            notifier,
            confirmations,
            source,
            sidecar,
        }
    }

    /// `discover()` — list manifests, parse each, record newly-seen ones in
    /// the discovery sidecar with `auto_run: false`. Parse/fetch failures
    /// are logged and the entry is skipped, preserving any existing entry.
    pub async fn discover(&self) -> EngineResult<Vec<String>> {
        let names = self.source.list().await?;
        let existing = self.sidecar.get_all_pipelines();

        let mut fresh = PipelinesTable::new();
        for name in &names {
            if existing.contains_key(name) {
                continue;
            }
            match self.source.fetch(name).await {
                Ok(text) => match crate::manifest::parse(&text) {
                    Ok(_) => {
                        fresh.insert(name.clone(), PipelineInfo::default());
                    }
                    Err(e) => tracing::warn!("manifest '{name}' failed to parse: {e}"),
                },
                Err(e) => tracing::warn!("failed to fetch manifest '{name}': {e}"),
            }
        }

        if !fresh.is_empty() {
            self.sidecar.update_pipelines(fresh).await;
        }
        Ok(names)
    }

    /// `start(manifestName, userID, chatID?, messageID?) → runID`.
    pub async fn start(
        &self,
        manifest_name: &str,
        requester: impl Into<String>,
        chat: Option<ChatCoordinates>,
    ) -> EngineResult<u64> {
        let text = self.source.fetch(manifest_name).await?;
        let pipeline = Arc::new(crate::manifest::parse(&text)?);

        if pipeline.list_jobs().is_empty() {
            return Err(EngineError::EmptyPipeline(pipeline.name.clone()));
        }

        let run_handle = self
            .registry
            .create(manifest_name.to_string(), pipeline, requester.into(), chat);
        let run_id = run_handle.read().await.id;

        if let Some(chat) = chat {
            self.sidecar
                .update_subscription_job(chat.chat_id, manifest_name, run_id)
                .await;
        }

        let engine = self.clone();
        tokio::spawn(async move { engine.drive(run_handle).await });

        Ok(run_id)
    }

    pub async fn status(&self, run_id: u64) -> Option<Run> {
        self.registry.snapshot(run_id).await
    }

    pub async fn logs(&self, run_id: u64) -> EngineResult<String> {
        if self.registry.get(run_id).is_none() {
            return Err(EngineError::RunNotFound(run_id));
        }
        Ok(self.logger.get_run_log(run_id).await)
    }

    pub fn list_pipelines(&self) -> PipelinesTable {
        self.sidecar.get_all_pipelines()
    }

    /// The driver task: one per Run.
    async fn drive(&self, run_handle: Arc<RwLock<Run>>) {
        let (run_id, pipeline, chat) = {
            let mut run = run_handle.write().await;
            run.status = RunStatus::Running;
            run.started_at = Some(Utc::now());
            (run.id, run.pipeline.clone(), run.chat)
        };
        self.logger.log_status(run_id, ORCHESTRATOR, "running").await;

        if let Some(chat) = chat {
            let notifier = self.notifier.clone();
            let pusher_handle = run_handle.clone();
            let total_jobs = pipeline.list_jobs().len();
            tokio::spawn(async move { status_pusher(notifier, pusher_handle, chat, total_jobs).await });
        }

        let ctx = ExecutionContext {
            run_id,
            pipeline: pipeline.clone(),
            logger: self.logger.clone(),
            runner: self.runner.clone(),
            notifier: self.notifier.clone(),
            confirmations: self.confirmations.clone(),
            chat,
            cancel: CancelToken::new(),
        };

        let job_names: Vec<String> = pipeline.list_jobs().to_vec();
        let run_handle_for_loop = run_handle.clone();
        let outcome = std::panic::AssertUnwindSafe(async move {
            let mut jobs_completed = 0u32;
            let mut jobs_failed = 0u32;
            let mut run_failed = false;

            for job_name in &job_names {
                let result = dispatch(&ctx, job_name).await;
                if result.status.is_success() {
                    jobs_completed += 1;
                } else {
                    jobs_failed += 1;
                    run_failed = true;
                }

                {
                    let mut run = run_handle_for_loop.write().await;
                    run.jobs_completed = jobs_completed;
                    run.jobs_failed = jobs_failed;
                }

                if run_failed {
                    break;
                }
            }
            run_failed
        })
        .catch_unwind()
        .await;

        let (final_status, error) = match outcome {
            Ok(run_failed) => (
                if run_failed { RunStatus::Failed } else { RunStatus::Success },
                None,
            ),
            Err(panic) => (RunStatus::Failed, Some(panic_message(panic))),
        };

        {
            let mut run = run_handle.write().await;
            run.status = final_status;
            run.finished_at = Some(Utc::now());
            run.error = error;
        }
        self.logger
            .log_status(run_id, ORCHESTRATOR, final_status.log_str())
            .await;

        if let Some(chat) = chat {
            let text = format!("{} {} \u{2014} completed", final_status.emoji(), pipeline.name);
            if let Err(e) = self.notifier.post(chat.chat_id, &text, None).await {
                tracing::warn!(run_id, "failed to post completion message: {e}");
            }
        }
    }
}

/// Edits the subscribed chat message with the current status line every 5
/// seconds, stopping once the Run is terminal and performing one last edit
/// (spec.md §9 — tolerant of a duplicate final edit).
async fn status_pusher(
    notifier: Arc<NotifierAdapter>,
    run_handle: Arc<RwLock<Run>>,
    chat: ChatCoordinates,
    total_jobs: usize,
) {
    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let run = run_handle.read().await.clone();
        let text = run.status_line(total_jobs);
        notifier.edit(chat.chat_id, chat.message_id, &text).await;
        if run.status.is_terminal() {
            break;
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic during run orchestration".to_string()
    }
}
