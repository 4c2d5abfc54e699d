//! Default [`ChatTransport`] for the standalone binary: the real chat
//! integration is an external, out-of-scope concern (spec.md §4.7), so the
//! binary logs what it would have sent instead of reaching a bot framework.

use async_trait::async_trait;
use cicd_pilot::notifier::{Buttons, ChatTransport};

#[derive(Default)]
pub struct LoggingTransport;

#[async_trait]
impl ChatTransport for LoggingTransport {
    async fn send_message(&self, chat_id: i64, text: &str, buttons: Option<Buttons>) -> anyhow::Result<i64> {
        tracing::info!(chat_id, buttons = ?buttons, "post: {text}");
        Ok(0)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> anyhow::Result<()> {
        tracing::info!(chat_id, message_id, "edit: {text}");
        Ok(())
    }
}
