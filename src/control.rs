//! Control API (spec.md §4.8): the thin, pre-authorized facade the chat/
//! control plane calls. Every method is a direct read-through to the
//! [`PipelineEngine`] and the subscription sidecar; authorization is an
//! external concern the caller has already applied.

use std::sync::Arc;

use crate::engine::PipelineEngine;
use crate::error::EngineResult;
use crate::registry::sidecar::{PipelinesTable, SidecarStore};
use crate::registry::{ChatCoordinates, Run};

pub struct ControlApi {
    engine: PipelineEngine,
    sidecar: Arc<SidecarStore>,
}

impl ControlApi {
    pub fn new(engine: PipelineEngine, sidecar: Arc<SidecarStore>) -> Self {
        Self { engine, sidecar }
    }

    pub async fn discover(&self) -> EngineResult<Vec<String>> {
        self.engine.discover().await
    }

    pub fn list_pipelines(&self) -> PipelinesTable {
        self.engine.list_pipelines()
    }

    pub async fn start(
        &self,
        manifest_name: &str,
        requester: impl Into<String>,
        chat: Option<ChatCoordinates>,
    ) -> EngineResult<u64> {
        self.engine.start(manifest_name, requester, chat).await
    }

    pub async fn status(&self, run_id: u64) -> Option<Run> {
        self.engine.status(run_id).await
    }

    pub async fn logs(&self, run_id: u64) -> EngineResult<String> {
        self.engine.logs(run_id).await
    }

    pub async fn subscribe(&self, chat_id: i64, manifest_name: &str, message_id: i64) {
        self.sidecar.subscribe_chat(chat_id, manifest_name, message_id).await;
    }

    pub async fn unsubscribe(&self, chat_id: i64, manifest_name: &str) {
        self.sidecar.unsubscribe_chat(chat_id, manifest_name).await;
    }
}
