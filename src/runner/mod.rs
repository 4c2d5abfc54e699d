//! Container runner (spec.md §4.2), grounded in
//! `original_source/worker/docker_executor.py`. The `ContainerRuntime` trait
//! abstracts the Docker Engine API calls the original makes through the
//! `docker` SDK; [`ContainerRunner`] owns the timeout/retry/pool policy on
//! top of whichever runtime is plugged in, mirroring how the teacher swaps
//! backends behind a trait (e.g. `Timebase` in the workflow engine).

pub mod docker;
pub mod limits;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{RunnerError, RunnerResult};

pub use limits::{parse_cpu_quota, parse_memory_limit, ResourceLimits};

/// Hard wall-clock timeout for one container run (spec.md §4.2).
pub const HARD_TIMEOUT: Duration = Duration::from_secs(3600);
/// Grace period given to a container after a stop request.
pub const STOP_GRACE: Duration = Duration::from_secs(10);
/// Default size of the bounded worker pool.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Opaque handle to a created container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle(pub String);

/// Everything needed to create one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub command: String,
    pub env: HashMap<String, String>,
    pub limits: ResourceLimits,
}

/// Low-level container lifecycle operations. One production implementation
/// ([`docker::DockerRuntime`]) talks to the Docker Engine API; tests use an
/// in-memory fake.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_present(&self, image: &str) -> RunnerResult<bool>;
    async fn pull_image(&self, image: &str) -> RunnerResult<()>;
    async fn create(&self, spec: &ContainerSpec) -> RunnerResult<ContainerHandle>;
    async fn start(&self, handle: &ContainerHandle) -> RunnerResult<()>;
    /// Blocks until the container exits and returns its exit code. Callers
    /// are expected to race this against their own timeout.
    async fn wait(&self, handle: &ContainerHandle) -> RunnerResult<i32>;
    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> RunnerResult<()>;
    async fn logs(&self, handle: &ContainerHandle) -> RunnerResult<String>;
    async fn remove(&self, handle: &ContainerHandle) -> RunnerResult<()>;
}

/// Executes one step in isolation, applying the hard timeout, resource
/// limits and bounded concurrency spec.md §4.2 requires over whatever
/// [`ContainerRuntime`] is configured.
pub struct ContainerRunner {
    runtime: Arc<dyn ContainerRuntime>,
    limits: ResourceLimits,
    pool: Arc<Semaphore>,
}

impl ContainerRunner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, limits: ResourceLimits) -> Self {
        Self::with_pool_size(runtime, limits, DEFAULT_POOL_SIZE)
    }

    pub fn with_pool_size(
        runtime: Arc<dyn ContainerRuntime>,
        limits: ResourceLimits,
        pool_size: usize,
    ) -> Self {
        Self {
            runtime,
            limits,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// `run(image, command, env, stepName) -> (exitCode, combinedOutput)`.
    pub async fn run(
        &self,
        image: &str,
        command: &str,
        env: &HashMap<String, String>,
    ) -> (i32, String) {
        let _permit = self
            .pool
            .acquire()
            .await
            .expect("semaphore is never closed");

        if let Err(e) = self.ensure_image(image).await {
            return (1, format!("image unavailable: {e}"));
        }

        let spec = ContainerSpec {
            image: image.to_string(),
            command: command.to_string(),
            env: env.clone(),
            limits: self.limits.clone(),
        };

        let handle = match self.runtime.create(&spec).await {
            Ok(h) => h,
            Err(e) => return (1, format!("execution error: {e}")),
        };

        let result = self.run_to_completion(&handle).await;

        if let Err(e) = self.runtime.remove(&handle).await {
            warn!("failed to remove container {}: {e}", handle.0);
        }

        result
    }

    async fn ensure_image(&self, image: &str) -> RunnerResult<()> {
        if self.runtime.image_present(image).await? {
            return Ok(());
        }
        self.runtime.pull_image(image).await
    }

    async fn run_to_completion(&self, handle: &ContainerHandle) -> (i32, String) {
        if let Err(e) = self.runtime.start(handle).await {
            return (1, format!("execution error: {e}"));
        }

        let wait = tokio::time::timeout(HARD_TIMEOUT, self.runtime.wait(handle)).await;
        let exit_code = match wait {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => return (1, format!("execution error: {e}")),
            Err(_) => {
                if let Err(e) = self.runtime.stop(handle, STOP_GRACE).await {
                    warn!("failed to stop timed-out container {}: {e}", handle.0);
                }
                return (1, "execution error: step exceeded hard timeout".to_string());
            }
        };

        let logs = self
            .runtime
            .logs(handle)
            .await
            .unwrap_or_else(|e| format!("execution error: failed to collect logs: {e}"));

        (exit_code, logs)
    }
}

/// In-memory fake runtime for tests: scripted by exit code and output, never
/// touches a real container engine.
#[derive(Default)]
pub struct FakeRuntime {
    pub outcomes: dashmap::DashMap<String, (i32, String)>,
    pub missing_images: dashmap::DashSet<String>,
    pub unpullable_images: dashmap::DashSet<String>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, command: &str, exit_code: i32, output: &str) {
        self.outcomes
            .insert(command.to_string(), (exit_code, output.to_string()));
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_present(&self, image: &str) -> RunnerResult<bool> {
        Ok(!self.missing_images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> RunnerResult<()> {
        if self.unpullable_images.contains(image) {
            return Err(RunnerError::Runtime(format!("cannot pull {image}")));
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> RunnerResult<ContainerHandle> {
        Ok(ContainerHandle(spec.command.clone()))
    }

    async fn start(&self, _handle: &ContainerHandle) -> RunnerResult<()> {
        Ok(())
    }

    async fn wait(&self, handle: &ContainerHandle) -> RunnerResult<i32> {
        let (code, _) = self
            .outcomes
            .get(&handle.0)
            .map(|e| e.clone())
            .unwrap_or((0, String::new()));
        Ok(code)
    }

    async fn stop(&self, _handle: &ContainerHandle, _grace: Duration) -> RunnerResult<()> {
        Ok(())
    }

    async fn logs(&self, handle: &ContainerHandle) -> RunnerResult<String> {
        let (_, output) = self
            .outcomes
            .get(&handle.0)
            .map(|e| e.clone())
            .unwrap_or((0, String::new()));
        Ok(output)
    }

    async fn remove(&self, _handle: &ContainerHandle) -> RunnerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_with(fake: FakeRuntime) -> ContainerRunner {
        ContainerRunner::new(Arc::new(fake), ResourceLimits::default())
    }

    #[tokio::test]
    async fn successful_step_returns_exit_zero_and_output() {
        let fake = FakeRuntime::new();
        fake.script("true", 0, "hello\n");
        let runner = runner_with(fake);
        let (code, output) = runner.run("alpine", "true", &HashMap::new()).await;
        assert_eq!(code, 0);
        assert_eq!(output, "hello\n");
    }

    #[tokio::test]
    async fn unavailable_image_fails_without_running() {
        let fake = FakeRuntime::new();
        fake.missing_images.insert("ghost".to_string());
        fake.unpullable_images.insert("ghost".to_string());
        let runner = runner_with(fake);
        let (code, output) = runner.run("ghost", "true", &HashMap::new()).await;
        assert_eq!(code, 1);
        assert!(output.starts_with("image unavailable:"));
    }

    #[tokio::test]
    async fn failing_step_reports_nonzero_exit() {
        let fake = FakeRuntime::new();
        fake.script("false", 1, "");
        let runner = runner_with(fake);
        let (code, _) = runner.run("alpine", "false", &HashMap::new()).await;
        assert_eq!(code, 1);
    }
}
