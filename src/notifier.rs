//! Notifier Adapter (spec.md §4.7): the bidirectional bridge between the
//! engine and the chat surface. The actual transport (message delivery,
//! inline buttons) is out of scope and consumed here through the
//! [`ChatTransport`] trait; this module owns routing button callbacks back
//! to blocked Confirmation Jobs.

use async_trait::async_trait;
use tracing::warn;

use crate::executors::confirmation::{route_callback, CallbackOutcome, ConfirmationRegistry};

/// `(label, callback_data)` pairs rendered as inline buttons.
pub type Buttons = Vec<(String, String)>;

/// The external chat transport. One production implementation would wrap a
/// bot-framework client; tests use [`RecordingTransport`].
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str, buttons: Option<Buttons>) -> anyhow::Result<i64>;
    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> anyhow::Result<()>;
}

/// Bridges the engine's Confirmation Jobs to a [`ChatTransport`], owning
/// the shared [`ConfirmationRegistry`] so inbound callbacks can resolve
/// suspended jobs.
pub struct NotifierAdapter {
    transport: std::sync::Arc<dyn ChatTransport>,
    confirmations: std::sync::Arc<ConfirmationRegistry>,
}

impl NotifierAdapter {
    pub fn new(
        transport: std::sync::Arc<dyn ChatTransport>,
        confirmations: std::sync::Arc<ConfirmationRegistry>,
    ) -> Self {
        Self { transport, confirmations }
    }

    /// `post(chatID, text, buttons?) → messageID`. Errors propagate to the
    /// caller (spec.md §4.7).
    pub async fn post(&self, chat_id: i64, text: &str, buttons: Option<Buttons>) -> anyhow::Result<i64> {
        self.transport.send_message(chat_id, text, buttons).await
    }

    /// `edit(chatID, messageID, text)`. Errors are swallowed — the message
    /// may have been deleted.
    pub async fn edit(&self, chat_id: i64, message_id: i64, text: &str) {
        if let Err(e) = self.transport.edit_message(chat_id, message_id, text).await {
            warn!(chat_id, message_id, "failed to edit chat message: {e}");
        }
    }

    /// `onCallback(data, userID) → {action, runID, jobName} | null`. The
    /// host routes every button press through here. Who pressed the button
    /// is accepted but not otherwise checked (spec.md §9 open question).
    pub fn on_callback(&self, data: &str, _user_id: &str) -> Option<CallbackOutcome> {
        route_callback(data, &self.confirmations)
    }
}

/// In-memory [`ChatTransport`] for tests: records every post/edit instead
/// of reaching an external service.
#[derive(Default)]
pub struct RecordingTransport {
    pub posts: dashmap::DashMap<i64, Vec<(String, Option<Buttons>)>>,
    pub edits: dashmap::DashMap<(i64, i64), Vec<String>>,
    next_message_id: std::sync::atomic::AtomicI64,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            posts: dashmap::DashMap::new(),
            edits: dashmap::DashMap::new(),
            next_message_id: std::sync::atomic::AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(&self, chat_id: i64, text: &str, buttons: Option<Buttons>) -> anyhow::Result<i64> {
        let id = self
            .next_message_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.posts
            .entry(chat_id)
            .or_default()
            .push((text.to_string(), buttons));
        Ok(id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> anyhow::Result<()> {
        self.edits
            .entry((chat_id, message_id))
            .or_default()
            .push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn callback_with_no_registration_is_routed_but_not_resolved() {
        let transport = Arc::new(RecordingTransport::new());
        let confirmations = Arc::new(ConfirmationRegistry::new());
        let adapter = NotifierAdapter::new(transport, confirmations);

        let outcome = adapter.on_callback("confirm_1_deploy", "u1").unwrap();
        assert_eq!(outcome.run_id, 1);
        assert_eq!(outcome.job_name, "deploy");
    }

    #[tokio::test]
    async fn post_and_edit_are_recorded() {
        let transport = Arc::new(RecordingTransport::new());
        let confirmations = Arc::new(ConfirmationRegistry::new());
        let adapter = NotifierAdapter::new(transport.clone(), confirmations);

        let message_id = adapter.post(7, "hello", None).await.unwrap();
        adapter.edit(7, message_id, "updated").await;

        assert_eq!(transport.posts.get(&7).unwrap().len(), 1);
        assert_eq!(transport.edits.get(&(7, message_id)).unwrap()[0], "updated");
    }
}
