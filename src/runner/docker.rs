//! Docker Engine API-backed [`ContainerRuntime`], grounded in
//! `original_source/worker/docker_executor.py`'s use of the `docker` SDK —
//! re-expressed over the same REST API via `reqwest` instead of a
//! Docker-specific client crate, since the engine's HTTP surface is the
//! stable public contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{ContainerHandle, ContainerRuntime, ContainerSpec};
use crate::error::{RunnerError, RunnerResult};

/// Talks to a Docker Engine API endpoint (local daemon exposed over TCP, or
/// a proxy in front of the UNIX socket).
pub struct DockerRuntime {
    client: Client,
    base_url: String,
}

impl DockerRuntime {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_present(&self, image: &str) -> RunnerResult<bool> {
        let resp = self
            .client
            .get(self.url(&format!("/images/{image}/json")))
            .send()
            .await
            .map_err(|e| RunnerError::Runtime(e.to_string()))?;
        Ok(resp.status().is_success())
    }

    async fn pull_image(&self, image: &str) -> RunnerResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("/images/create?fromImage={image}")))
            .send()
            .await
            .map_err(|e| RunnerError::Runtime(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RunnerError::Runtime(format!(
                "pull of '{image}' failed with status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> RunnerResult<ContainerHandle> {
        let memory = spec
            .limits
            .memory_bytes()
            .map_err(|e| RunnerError::Runtime(e.to_string()))?;
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let body = json!({
            "Image": spec.image,
            "Cmd": ["sh", "-c", spec.command],
            "Env": env,
            "Tty": true,
            "HostConfig": {
                "Memory": memory,
                "CpuPeriod": super::limits::CPU_PERIOD,
                "CpuQuota": spec.limits.cpu_quota(),
                "Privileged": false,
                "NetworkDisabled": false,
                "AutoRemove": false,
            }
        });

        let resp = self
            .client
            .post(self.url("/containers/create"))
            .json(&body)
            .send()
            .await
            .map_err(|e| RunnerError::Runtime(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RunnerError::Runtime(format!(
                "container create failed with status {}",
                resp.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct CreateResponse {
            #[serde(rename = "Id")]
            id: String,
        }
        let created: CreateResponse = resp
            .json()
            .await
            .map_err(|e| RunnerError::Runtime(e.to_string()))?;
        Ok(ContainerHandle(created.id))
    }

    async fn start(&self, handle: &ContainerHandle) -> RunnerResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("/containers/{}/start", handle.0)))
            .send()
            .await
            .map_err(|e| RunnerError::Runtime(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RunnerError::Runtime(format!(
                "container start failed with status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn wait(&self, handle: &ContainerHandle) -> RunnerResult<i32> {
        let resp = self
            .client
            .post(self.url(&format!("/containers/{}/wait", handle.0)))
            .send()
            .await
            .map_err(|e| RunnerError::Runtime(e.to_string()))?;

        #[derive(serde::Deserialize)]
        struct WaitResponse {
            #[serde(rename = "StatusCode")]
            status_code: i32,
        }
        let result: WaitResponse = resp
            .json()
            .await
            .map_err(|e| RunnerError::Runtime(e.to_string()))?;
        Ok(result.status_code)
    }

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> RunnerResult<()> {
        let _ = self
            .client
            .post(self.url(&format!(
                "/containers/{}/stop?t={}",
                handle.0,
                grace.as_secs()
            )))
            .send()
            .await;
        Ok(())
    }

    /// Containers are created with `Tty: true`, so the Engine API never
    /// multiplexes stdout/stderr with the 8-byte stream-frame header — the
    /// response body here is the raw terminal stream, safe to lossy-decode
    /// directly.
    async fn logs(&self, handle: &ContainerHandle) -> RunnerResult<String> {
        let resp = self
            .client
            .get(self.url(&format!(
                "/containers/{}/logs?stdout=true&stderr=true",
                handle.0
            )))
            .send()
            .await
            .map_err(|e| RunnerError::Runtime(e.to_string()))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RunnerError::Runtime(e.to_string()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn remove(&self, handle: &ContainerHandle) -> RunnerResult<()> {
        let _ = self
            .client
            .delete(self.url(&format!("/containers/{}?force=true", handle.0)))
            .send()
            .await;
        Ok(())
    }
}
