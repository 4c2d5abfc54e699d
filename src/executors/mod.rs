//! Job Executors (spec.md §4.5): four job kinds behind one execution
//! contract, `{status, completed, failed}`, plus the dispatcher a Job Group
//! uses to recurse into whichever kind each of its entries names.

pub mod cancel;
pub mod confirmation;
pub mod container;
pub mod group;
pub mod timer;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::logger::StructuredLogger;
use crate::manifest::{JobSpec, Pipeline};
use crate::notifier::NotifierAdapter;
use crate::registry::ChatCoordinates;
use crate::runner::ContainerRunner;

pub use cancel::CancelToken;
pub use confirmation::ConfirmationRegistry;

/// Terminal outcome of one executor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, JobStatus::Success)
    }
}

/// `{status, …metrics}` (spec.md §4.5). `completed`/`failed` mean "steps"
/// for a Container Job and "children" for a Job Group; Timer and
/// Confirmation Jobs report 0/1 and 1/0 respectively.
#[derive(Debug, Clone, Copy)]
pub struct JobResult {
    pub status: JobStatus,
    pub completed: u32,
    pub failed: u32,
}

impl JobResult {
    pub fn success() -> Self {
        Self { status: JobStatus::Success, completed: 1, failed: 0 }
    }

    pub fn failed() -> Self {
        Self { status: JobStatus::Failed, completed: 0, failed: 1 }
    }

    pub fn cancelled() -> Self {
        Self { status: JobStatus::Cancelled, completed: 0, failed: 0 }
    }
}

/// Everything an executor needs: the shared collaborators plus the
/// cancellation token scoped to this job (spec.md §9 — "model as an
/// interface or function value rather than by mutual import" is satisfied
/// here by [`dispatch`] itself, which every Group entry calls through).
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: u64,
    pub pipeline: Arc<Pipeline>,
    pub logger: Arc<StructuredLogger>,
    pub runner: Arc<ContainerRunner>,
    pub notifier: Arc<NotifierAdapter>,
    pub confirmations: Arc<ConfirmationRegistry>,
    pub chat: Option<ChatCoordinates>,
    pub cancel: CancelToken,
}

impl ExecutionContext {
    /// A copy of this context scoped to a child cancellation token, used by
    /// Job Group when spawning one task per entry.
    pub fn child(&self, cancel: CancelToken) -> Self {
        Self { cancel, ..self.clone() }
    }
}

type DispatchFuture<'a> = Pin<Box<dyn Future<Output = JobResult> + Send + 'a>>;

/// Resolve `job_name` in `ctx.pipeline` and run it through the matching
/// executor, recursing into [`group::execute`] for nested groups. Boxed
/// because Group → dispatch → Group is mutually recursive.
pub fn dispatch<'a>(ctx: &'a ExecutionContext, job_name: &'a str) -> DispatchFuture<'a> {
    Box::pin(async move {
        let Some(spec) = ctx.pipeline.get_job(job_name) else {
            ctx.logger
                .log_error(ctx.run_id, job_name, &format!("job '{job_name}' not found in pipeline"))
                .await;
            return JobResult::failed();
        };

        match spec {
            JobSpec::Container(job) => container::execute(ctx, job_name, job).await,
            JobSpec::Timer(job) => timer::execute(ctx, job_name, job).await,
            JobSpec::Confirmation(job) => confirmation::execute(ctx, job_name, job).await,
            JobSpec::Group(job) => group::execute(ctx, job_name, job).await,
        }
    })
}
