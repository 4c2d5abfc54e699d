//! Job Group executor (spec.md §4.5.4, §5): runs every entry concurrently,
//! cancelling still-pending siblings the moment a necessary entry fails and
//! waiting for that cancellation to settle before returning. Grounded in
//! `knhk-workflow-engine/src/concurrency/nursery.rs`'s `wait_any`, extended
//! from "first-completion wins" to "necessary failures cancel the rest,
//! everything else runs to completion".

use tokio::task::JoinHandle;

use crate::manifest::GroupJob;

use super::{dispatch, CancelToken, ExecutionContext, JobResult, JobStatus};

struct ChildMeta {
    is_necessary: bool,
    cancel: CancelToken,
}

pub async fn execute(ctx: &ExecutionContext, job_name: &str, job: &GroupJob) -> JobResult {
    ctx.logger.log_status(ctx.run_id, job_name, "running").await;

    if job.entries.is_empty() {
        ctx.logger.log_status(ctx.run_id, job_name, "success").await;
        return JobResult::success();
    }

    let mut metas = Vec::with_capacity(job.entries.len());
    let mut handles: Vec<JoinHandle<JobResult>> = Vec::with_capacity(job.entries.len());

    for entry in &job.entries {
        let child_cancel = ctx.cancel.child_token();
        let child_ctx = ctx.child(child_cancel.clone());
        let target = entry.target.clone();
        handles.push(tokio::spawn(async move { dispatch(&child_ctx, &target).await }));
        metas.push(ChildMeta { is_necessary: entry.is_necessary, cancel: child_cancel });
    }

    let mut completed = 0u32;
    let mut failed = 0u32;
    let mut necessary_failed = false;

    while !handles.is_empty() {
        let (outcome, index, remaining) = futures::future::select_all(handles).await;
        handles = remaining;
        let meta = metas.remove(index);

        let result = outcome.unwrap_or_else(|_join_err| JobResult::failed());

        if result.status.is_success() {
            completed += 1;
        } else {
            failed += 1;
            if meta.is_necessary && result.status != JobStatus::Cancelled {
                necessary_failed = true;
            }
        }

        if necessary_failed {
            for sibling in &metas {
                sibling.cancel.cancel();
            }
        }
    }

    let status = if ctx.cancel.is_cancelled() {
        JobStatus::Cancelled
    } else if necessary_failed {
        JobStatus::Failed
    } else {
        JobStatus::Success
    };

    ctx.logger.log_status(ctx.run_id, job_name, status.as_str()).await;

    JobResult { status, completed, failed }
}
