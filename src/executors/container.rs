//! Container Job executor (spec.md §4.5.1): runs an ordered sequence of
//! steps through the [`crate::runner::ContainerRunner`], stopping at the
//! first failing step.

use crate::manifest::ContainerJob;

use super::{ExecutionContext, JobResult};

pub async fn execute(ctx: &ExecutionContext, job_name: &str, job: &ContainerJob) -> JobResult {
    if job.steps.is_empty() {
        ctx.logger.log_error(ctx.run_id, job_name, "job has no steps").await;
        return JobResult::failed();
    }

    ctx.logger.log_status(ctx.run_id, job_name, "running").await;

    let mut steps_completed = 0u32;
    let mut steps_failed = 0u32;
    let mut failed = false;

    for step in &job.steps {
        if ctx.cancel.is_cancelled() {
            ctx.logger.log_status(ctx.run_id, job_name, "cancelled").await;
            return JobResult {
                status: super::JobStatus::Cancelled,
                completed: steps_completed,
                failed: steps_failed,
            };
        }

        let Some(image) = step.resolve_image(job.default_image.as_deref()) else {
            ctx.logger
                .log_error(ctx.run_id, job_name, &format!("step '{}' has no resolvable image", step.name))
                .await;
            steps_failed += 1;
            failed = true;
            break;
        };

        ctx.logger.log_status(ctx.run_id, &step.name, "running").await;

        let (exit_code, output) = ctx.runner.run(image, &step.run, &step.env).await;
        ctx.logger.log_output(ctx.run_id, &step.name, &output).await;
        ctx.logger
            .log_step_completion(ctx.run_id, &step.name, exit_code)
            .await;

        if exit_code != 0 {
            ctx.logger
                .log_error(
                    ctx.run_id,
                    &step.name,
                    &format!("step '{}' exited with code {exit_code}", step.name),
                )
                .await;
            steps_failed += 1;
            failed = true;
            break;
        }

        steps_completed += 1;
    }

    let status = if failed {
        super::JobStatus::Failed
    } else {
        super::JobStatus::Success
    };
    ctx.logger
        .log_status(ctx.run_id, job_name, status.as_str())
        .await;

    JobResult {
        status,
        completed: steps_completed,
        failed: steps_failed,
    }
}
