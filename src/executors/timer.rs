//! Timer Job executor (spec.md §4.5.2): sleeps for a fixed duration,
//! honoring cancellation immediately.

use std::time::Duration;

use crate::manifest::TimerJob;

use super::{ExecutionContext, JobResult, JobStatus};

pub async fn execute(ctx: &ExecutionContext, job_name: &str, job: &TimerJob) -> JobResult {
    ctx.logger.log_status(ctx.run_id, job_name, "running").await;
    ctx.logger
        .log_output(ctx.run_id, job_name, &format!("waiting {} seconds\u{2026}", job.duration_secs))
        .await;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(job.duration_secs)) => {
            ctx.logger.log_status(ctx.run_id, job_name, "success").await;
            JobResult { status: JobStatus::Success, completed: 1, failed: 0 }
        }
        _ = ctx.cancel.cancelled() => {
            ctx.logger.log_status(ctx.run_id, job_name, "cancelled").await;
            JobResult { status: JobStatus::Cancelled, completed: 0, failed: 0 }
        }
    }
}
