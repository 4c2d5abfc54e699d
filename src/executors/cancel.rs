//! Cooperative cancellation token, grounded in
//! `knhk-workflow-engine/src/concurrency/cancel_token.rs` — reimplemented
//! over `std::sync::RwLock` instead of `parking_lot` since this crate does
//! not otherwise need the dependency. Job Groups hand a child token to each
//! entry so a necessary failure can cancel specific still-pending siblings
//! (and, transitively, anything a nested group spawned) without touching
//! tokens outside the group.

use std::sync::{Arc, RwLock};

use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: RwLock<bool>,
    notify: Notify,
    children: RwLock<Vec<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: RwLock::new(false),
                notify: Notify::new(),
                children: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Create a token that is cancelled whenever `self` is.
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        self.inner.children.write().unwrap().push(child.clone());
        child
    }

    pub fn cancel(&self) {
        *self.inner.cancelled.write().unwrap() = true;
        self.inner.notify.notify_waiters();
        let children = self.inner.children.read().unwrap().clone();
        for child in children {
            child.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.read().unwrap()
    }

    /// Resolves once this token is cancelled; resolves immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn cancelling_parent_cancels_children() {
        let parent = CancelToken::new();
        let child = parent.child_token();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_signal() {
        let token = CancelToken::new();
        let waiter = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            waiter.cancel();
        });
        timeout(Duration::from_millis(200), token.cancelled())
            .await
            .expect("should observe cancellation");
    }
}
