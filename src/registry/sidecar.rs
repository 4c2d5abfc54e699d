//! Sidecar JSON caches: discovered-pipelines table and chat-subscription
//! table (spec.md §4.4, §6), grounded in
//! `original_source/shared/pipeline_storage.py`. Both files are rewritten
//! whole under atomic rename on every mutation; a corrupted file reads as
//! empty rather than failing the caller (spec.md: "lost update is
//! acceptable").

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

/// Per-pipeline discovery metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineInfo {
    #[serde(default)]
    pub auto_run: bool,
}

/// One chat's subscription to one manifest's live status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub message_id: i64,
    pub job_id: Option<u64>,
}

pub type PipelinesTable = HashMap<String, PipelineInfo>;
pub type SubscriptionsTable = HashMap<String, HashMap<String, SubscriptionInfo>>;

/// Persisted discovery/subscription sidecar, backed by two JSON files in a
/// shared directory.
pub struct SidecarStore {
    pipelines_path: PathBuf,
    subscriptions_path: PathBuf,
    write_lock: Mutex<()>,
}

impl SidecarStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            pipelines_path: dir.join("pipelines.json"),
            subscriptions_path: dir.join("subscriptions.json"),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn update_pipelines(&self, updates: PipelinesTable) {
        let _guard = self.write_lock.lock().await;
        let mut current = load_json::<PipelinesTable>(&self.pipelines_path);
        current.extend(updates);
        save_json(&self.pipelines_path, &current);
    }

    pub fn get_pipeline_info(&self, name: &str) -> PipelineInfo {
        load_json::<PipelinesTable>(&self.pipelines_path)
            .remove(name)
            .unwrap_or_default()
    }

    pub fn get_all_pipelines(&self) -> PipelinesTable {
        load_json(&self.pipelines_path)
    }

    pub async fn set_auto_run(&self, name: &str, auto_run: bool) {
        let _guard = self.write_lock.lock().await;
        let mut table = load_json::<PipelinesTable>(&self.pipelines_path);
        table.entry(name.to_string()).or_default().auto_run = auto_run;
        save_json(&self.pipelines_path, &table);
    }

    pub async fn subscribe_chat(&self, chat_id: i64, manifest_name: &str, message_id: i64) {
        let _guard = self.write_lock.lock().await;
        let mut table = load_json::<SubscriptionsTable>(&self.subscriptions_path);
        table.entry(chat_id.to_string()).or_default().insert(
            manifest_name.to_string(),
            SubscriptionInfo {
                message_id,
                job_id: None,
            },
        );
        save_json(&self.subscriptions_path, &table);
    }

    pub async fn unsubscribe_chat(&self, chat_id: i64, manifest_name: &str) {
        let _guard = self.write_lock.lock().await;
        let mut table = load_json::<SubscriptionsTable>(&self.subscriptions_path);
        if let Some(chat) = table.get_mut(&chat_id.to_string()) {
            chat.remove(manifest_name);
            if chat.is_empty() {
                table.remove(&chat_id.to_string());
            }
        }
        save_json(&self.subscriptions_path, &table);
    }

    pub async fn update_subscription_job(&self, chat_id: i64, manifest_name: &str, job_id: u64) {
        let _guard = self.write_lock.lock().await;
        let mut table = load_json::<SubscriptionsTable>(&self.subscriptions_path);
        if let Some(sub) = table
            .get_mut(&chat_id.to_string())
            .and_then(|chat| chat.get_mut(manifest_name))
        {
            sub.job_id = Some(job_id);
            save_json(&self.subscriptions_path, &table);
        }
    }

    pub fn get_subscription_info(&self, chat_id: i64, manifest_name: &str) -> Option<SubscriptionInfo> {
        load_json::<SubscriptionsTable>(&self.subscriptions_path)
            .remove(&chat_id.to_string())
            .and_then(|mut chat| chat.remove(manifest_name))
    }

    pub fn get_all_subscriptions(&self) -> SubscriptionsTable {
        load_json(&self.subscriptions_path)
    }
}

fn load_json<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> T {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %path.display(), "corrupted sidecar file, treating as empty: {e}");
            T::default()
        }),
        Err(_) => T::default(),
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) {
    let Ok(json) = serde_json::to_string_pretty(value) else {
        return;
    };
    let Some(parent) = path.parent() else { return };
    if std::fs::create_dir_all(parent).is_err() {
        return;
    }
    let tmp_path = path.with_extension("json.tmp");
    if std::fs::write(&tmp_path, json).is_err() {
        warn!(path = %path.display(), "failed to write sidecar tmp file");
        return;
    }
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        warn!(path = %path.display(), "failed to atomically rename sidecar file: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipeline_info_defaults_to_no_auto_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = SidecarStore::new(dir.path());
        assert!(!store.get_pipeline_info("p.yaml").auto_run);
        store.set_auto_run("p.yaml", true).await;
        assert!(store.get_pipeline_info("p.yaml").auto_run);
    }

    #[tokio::test]
    async fn subscriptions_round_trip_and_unsubscribe() {
        let dir = tempfile::tempdir().unwrap();
        let store = SidecarStore::new(dir.path());
        store.subscribe_chat(42, "p.yaml", 7).await;
        let info = store.get_subscription_info(42, "p.yaml").unwrap();
        assert_eq!(info.message_id, 7);
        assert_eq!(info.job_id, None);

        store.update_subscription_job(42, "p.yaml", 99).await;
        let info = store.get_subscription_info(42, "p.yaml").unwrap();
        assert_eq!(info.job_id, Some(99));

        store.unsubscribe_chat(42, "p.yaml").await;
        assert!(store.get_subscription_info(42, "p.yaml").is_none());
    }

    #[tokio::test]
    async fn corrupted_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pipelines.json"), "{not json").unwrap();
        let store = SidecarStore::new(dir.path());
        assert!(!store.get_pipeline_info("p.yaml").auto_run);
    }
}
