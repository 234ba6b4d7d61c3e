//! Async Task Binder (C9, spec §4.9).
//!
//! Persists the routing tuple for a long-running provider job (video
//! generation, batch jobs) so a later poll or cancel can reach the
//! originating channel/user/token after the request that started the job
//! has ended.

use crate::error::GatewayError;
use crate::model::AsyncTaskBinding;
use crate::store::AsyncTaskStore;
use std::sync::Arc;

pub struct AsyncTaskBinder<S: AsyncTaskStore> {
    store: Arc<S>,
}

impl<S: AsyncTaskStore> AsyncTaskBinder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// `Save(binding)` (spec C9): upserts by `task_id`.
    pub async fn save(&self, binding: AsyncTaskBinding) -> Result<(), GatewayError> {
        self.store.save(binding).await
    }

    /// `GetByTaskID(task_id)` (spec C9).
    pub async fn get(&self, task_id: &str) -> Result<Option<AsyncTaskBinding>, GatewayError> {
        self.store.get_by_task_id(task_id).await
    }

    /// `Touch(task_id)` (spec C9): called on every poll.
    pub async fn touch(&self, task_id: &str) -> Result<(), GatewayError> {
        self.store.touch(task_id).await
    }

    /// Retention sweeper (spec C9): intended to run every 24h from the
    /// service binary's scheduler.
    pub async fn sweep(&self, retention_days: i64) -> Result<usize, GatewayError> {
        self.store.sweep_expired(retention_days).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderKind;
    use crate::store::memory::InMemoryAsyncTaskStore;
    use chrono::Utc;

    fn binding(task_id: &str) -> AsyncTaskBinding {
        AsyncTaskBinding {
            task_id: task_id.to_string(),
            task_type: "video".into(),
            user_id: 42,
            token_id: 7,
            channel_id: 3,
            channel_type: ProviderKind::OpenAI,
            origin_model: "sora-2".into(),
            actual_model: "sora-2".into(),
            request_method: "POST".into(),
            request_path: "/v1/video/generations".into(),
            request_params: serde_json::json!({"prompt": "a cat"}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_accessed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_then_get_roundtrips_the_routing_tuple() {
        let binder = AsyncTaskBinder::new(Arc::new(InMemoryAsyncTaskStore::new()));
        binder.save(binding("v_1")).await.unwrap();
        let fetched = binder.get("v_1").await.unwrap().unwrap();
        assert_eq!(fetched.channel_id, 3);
        assert_eq!(fetched.user_id, 42);
    }

    #[tokio::test]
    async fn unknown_task_returns_none() {
        let binder = AsyncTaskBinder::new(Arc::new(InMemoryAsyncTaskStore::new()));
        assert!(binder.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_purges_only_expired_bindings() {
        let store = InMemoryAsyncTaskStore::new();
        let mut stale = binding("old");
        stale.created_at = Utc::now() - chrono::Duration::days(40);
        stale.last_accessed_at = stale.created_at;
        store.save(stale).await.unwrap();
        store.save(binding("fresh")).await.unwrap();

        let binder = AsyncTaskBinder::new(Arc::new(store));
        let purged = binder.sweep(30).await.unwrap();
        assert_eq!(purged, 1);
        assert!(binder.get("old").await.unwrap().is_none());
        assert!(binder.get("fresh").await.unwrap().is_some());
    }
}
