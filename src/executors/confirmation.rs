//! Confirmation Job executor and the PendingConfirmation table (spec.md
//! §4.5.3, §5, §9): a job that posts an interactive gate and suspends until
//! a button callback, a timeout, or an external cancellation resolves it.
//! Grounded in `original_source/worker/job_executors.py`'s confirmation
//! handling, re-expressed as a one-shot `tokio::sync::Notify` per pending
//! key rather than a polling loop.

use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::warn;

use crate::manifest::ConfirmationJob;

use super::{ExecutionContext, JobResult, JobStatus};

/// How a PendingConfirmation was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Cancelled,
}

/// The action half of a parsed callback key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Confirm,
    Cancel,
}

/// One suspended Confirmation Job awaiting a decision.
struct PendingEntry {
    chat_id: i64,
    message_id: i64,
    decision: Mutex<Option<Decision>>,
    notify: Notify,
}

impl PendingEntry {
    fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
            decision: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    fn set(&self, decision: Decision) {
        *self.decision.lock().unwrap() = Some(decision);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> Decision {
        loop {
            if let Some(d) = *self.decision.lock().unwrap() {
                return d;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            if let Some(d) = *self.decision.lock().unwrap() {
                return d;
            }
            notified.await;
        }
    }
}

/// Shared table of in-flight confirmations, keyed by `"<runID>_<jobName>"`.
/// Each key has at most one resolver: the first of {callback, timeout,
/// cancellation} to call [`resolve`](Self::resolve) or
/// [`unregister`](Self::unregister) wins.
#[derive(Default)]
pub struct ConfirmationRegistry {
    pending: DashMap<String, std::sync::Arc<PendingEntry>>,
}

impl ConfirmationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, key: String, chat_id: i64, message_id: i64) -> std::sync::Arc<PendingEntry> {
        let entry = std::sync::Arc::new(PendingEntry::new(chat_id, message_id));
        self.pending.insert(key, entry.clone());
        entry
    }

    /// Resolve a pending entry by key. Returns `false` if no entry was
    /// registered under this key (already resolved, timed out, or never
    /// existed) — the caller should acknowledge silently in that case.
    pub fn resolve(&self, key: &str, decision: Decision) -> bool {
        match self.pending.remove(key) {
            Some((_, entry)) => {
                entry.set(decision);
                true
            }
            None => false,
        }
    }

    fn unregister(&self, key: &str) {
        self.pending.remove(key);
    }
}

/// Outcome of routing one chat callback, handed back to the host.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub action: CallbackAction,
    pub run_id: u64,
    pub job_name: String,
}

/// Parse `confirm_<runID>_<jobName>` / `cancel_<runID>_<jobName>`. The job
/// name is the remainder after the second underscore and may itself
/// contain underscores.
pub fn parse_callback_data(data: &str) -> Option<(CallbackAction, u64, String)> {
    let mut parts = data.splitn(3, '_');
    let action = match parts.next()? {
        "confirm" => CallbackAction::Confirm,
        "cancel" => CallbackAction::Cancel,
        _ => return None,
    };
    let run_id: u64 = parts.next()?.parse().ok()?;
    let job_name = parts.next()?.to_string();
    Some((action, run_id, job_name))
}

fn registry_key(run_id: u64, job_name: &str) -> String {
    format!("{run_id}_{job_name}")
}

pub async fn execute(ctx: &ExecutionContext, job_name: &str, job: &ConfirmationJob) -> JobResult {
    let Some(chat) = ctx.chat else {
        ctx.logger
            .log_error(ctx.run_id, job_name, "confirmation job requires chat coordinates")
            .await;
        return JobResult::failed();
    };

    ctx.logger.log_status(ctx.run_id, job_name, "waiting").await;

    let key = registry_key(ctx.run_id, job_name);
    let buttons = vec![
        ("Confirm".to_string(), format!("confirm_{key}")),
        ("Cancel".to_string(), format!("cancel_{key}")),
    ];

    let message_id = match ctx
        .notifier
        .post(chat.chat_id, &job.message, Some(buttons))
        .await
    {
        Ok(id) => id,
        Err(e) => {
            ctx.logger
                .log_error(ctx.run_id, job_name, &format!("failed to post confirmation prompt: {e}"))
                .await;
            return JobResult::failed();
        }
    };

    let entry = ctx.confirmations.register(key.clone(), chat.chat_id, message_id);

    let result = tokio::select! {
        decision = entry.wait() => ResolvedBy::Decision(decision),
        _ = tokio::time::sleep(Duration::from_secs(job.timeout_secs)) => ResolvedBy::Timeout,
        _ = ctx.cancel.cancelled() => ResolvedBy::ExternalCancel,
    };

    match result {
        ResolvedBy::Decision(Decision::Approved) => {
            ctx.notifier.edit(chat.chat_id, message_id, "Confirmed").await;
            ctx.logger.log_status(ctx.run_id, job_name, "success").await;
            JobResult { status: JobStatus::Success, completed: 1, failed: 0 }
        }
        ResolvedBy::Decision(Decision::Cancelled) => {
            ctx.notifier.edit(chat.chat_id, message_id, "Cancelled").await;
            ctx.logger.log_status(ctx.run_id, job_name, "cancelled").await;
            JobResult { status: JobStatus::Cancelled, completed: 0, failed: 0 }
        }
        ResolvedBy::Timeout => {
            ctx.confirmations.unregister(&key);
            ctx.notifier.edit(chat.chat_id, message_id, "Timeout").await;
            ctx.logger
                .log_error(ctx.run_id, job_name, "confirmation timed out")
                .await;
            JobResult::failed()
        }
        ResolvedBy::ExternalCancel => {
            ctx.confirmations.unregister(&key);
            ctx.logger.log_status(ctx.run_id, job_name, "cancelled").await;
            JobResult { status: JobStatus::Cancelled, completed: 0, failed: 0 }
        }
    }
}

enum ResolvedBy {
    Decision(Decision),
    Timeout,
    ExternalCancel,
}

/// Route one chat callback to its PendingConfirmation, if any (spec.md
/// §4.5.3). A callback with no matching registration is a no-op — the
/// caller still acknowledges it to the chat surface.
pub fn route_callback(data: &str, registry: &ConfirmationRegistry) -> Option<CallbackOutcome> {
    let (action, run_id, job_name) = parse_callback_data(data)?;
    let key = registry_key(run_id, &job_name);
    let decision = match action {
        CallbackAction::Confirm => Decision::Approved,
        CallbackAction::Cancel => Decision::Cancelled,
    };
    if !registry.resolve(&key, decision) {
        warn!(data, "callback for unknown or already-resolved confirmation");
    }
    Some(CallbackOutcome { action, run_id, job_name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_confirm_and_cancel_keys_with_underscored_job_names() {
        let (action, run_id, job) = parse_callback_data("confirm_42_deploy_prod").unwrap();
        assert_eq!(action, CallbackAction::Confirm);
        assert_eq!(run_id, 42);
        assert_eq!(job, "deploy_prod");

        let (action, _, _) = parse_callback_data("cancel_1_x").unwrap();
        assert_eq!(action, CallbackAction::Cancel);
    }

    #[test]
    fn rejects_malformed_callback_data() {
        assert!(parse_callback_data("bogus").is_none());
        assert!(parse_callback_data("confirm_notanumber_job").is_none());
    }

    #[tokio::test]
    async fn resolve_wins_once_and_wakes_waiter() {
        let registry = ConfirmationRegistry::new();
        let entry = registry.register("1_gate".into(), 10, 20);

        let waiter = tokio::spawn(async move { entry.wait().await });
        assert!(registry.resolve("1_gate", Decision::Approved));
        assert_eq!(waiter.await.unwrap(), Decision::Approved);

        assert!(!registry.resolve("1_gate", Decision::Cancelled));
    }
}
