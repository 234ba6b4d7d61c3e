//! In-memory store implementations: the default for tests and for a
//! single-instance deployment that doesn't need durability across restarts.

use super::{AbilityStore, AsyncTaskStore, BillingLogStore, QuotaStore, UserDirectoryStore};
use crate::error::GatewayError;
use crate::model::{AsyncTaskBinding, Channel, ConsumeLog, ConsumeLogPatch, Token, TokenId, User, UserId};
use crate::quota::AccumulatorKey;
use crate::reporting::{group_by_day, DailyUsage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryQuotaStore {
    user_quota: Mutex<HashMap<UserId, i64>>,
    user_used_quota: Mutex<HashMap<UserId, i64>>,
    user_request_count: Mutex<HashMap<UserId, u64>>,
    token_quota: Mutex<HashMap<TokenId, i64>>,
    channel_used_quota: Mutex<HashMap<i64, i64>>,
    fail_next: AtomicBool,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_user_quota(&self, user_id: UserId, quota: i64) {
        self.user_quota.lock().expect("lock poisoned").insert(user_id, quota);
    }

    pub async fn set_token_quota(&self, token_id: TokenId, quota: i64) {
        self.token_quota.lock().expect("lock poisoned").insert(token_id, quota);
    }

    /// Test hook: makes the next `apply_deltas` call fail, to exercise the
    /// Quota Ledger's "failed flush retains pending deltas" contract.
    pub fn fail_next_flush(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn get_user_quota(&self, user_id: UserId) -> Result<i64, GatewayError> {
        Ok(*self.user_quota.lock().expect("lock poisoned").get(&user_id).unwrap_or(&0))
    }

    async fn get_token_remain_quota(&self, token_id: TokenId) -> Result<Option<i64>, GatewayError> {
        Ok(self.token_quota.lock().expect("lock poisoned").get(&token_id).copied())
    }

    async fn apply_deltas(&self, deltas: &HashMap<AccumulatorKey, i64>) -> Result<(), GatewayError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Internal("simulated flush failure".into()));
        }
        for (key, delta) in deltas {
            match key {
                AccumulatorKey::UserQuota(uid) => {
                    *self.user_quota.lock().expect("lock poisoned").entry(*uid).or_insert(0) += delta;
                }
                AccumulatorKey::TokenQuota(tid) => {
                    *self.token_quota.lock().expect("lock poisoned").entry(*tid).or_insert(0) += delta;
                }
                AccumulatorKey::UserUsedQuota(uid) => {
                    *self.user_used_quota.lock().expect("lock poisoned").entry(*uid).or_insert(0) += delta;
                }
                AccumulatorKey::UserRequestCount(uid) => {
                    *self.user_request_count.lock().expect("lock poisoned").entry(*uid).or_insert(0) +=
                        (*delta).max(0) as u64;
                }
                AccumulatorKey::ChannelUsedQuota(cid) => {
                    *self.channel_used_quota.lock().expect("lock poisoned").entry(*cid).or_insert(0) += delta;
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAbilityStore {
    channels: Mutex<Vec<Channel>>,
}

impl InMemoryAbilityStore {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels: Mutex::new(channels) }
    }
}

#[async_trait]
impl AbilityStore for InMemoryAbilityStore {
    async fn load_channels(&self) -> Result<Vec<Channel>, GatewayError> {
        Ok(self.channels.lock().expect("lock poisoned").clone())
    }
}

#[derive(Default)]
pub struct InMemoryAsyncTaskStore {
    bindings: Mutex<HashMap<String, AsyncTaskBinding>>,
}

impl InMemoryAsyncTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AsyncTaskStore for InMemoryAsyncTaskStore {
    async fn save(&self, binding: AsyncTaskBinding) -> Result<(), GatewayError> {
        self.bindings.lock().expect("lock poisoned").insert(binding.task_id.clone(), binding);
        Ok(())
    }

    async fn get_by_task_id(&self, task_id: &str) -> Result<Option<AsyncTaskBinding>, GatewayError> {
        Ok(self.bindings.lock().expect("lock poisoned").get(task_id).cloned())
    }

    async fn touch(&self, task_id: &str) -> Result<(), GatewayError> {
        let mut guard = self.bindings.lock().expect("lock poisoned");
        let binding = guard
            .get_mut(task_id)
            .ok_or_else(|| GatewayError::Internal(format!("unknown task {task_id}")))?;
        binding.last_accessed_at = Utc::now();
        Ok(())
    }

    async fn sweep_expired(&self, retention_days: i64) -> Result<usize, GatewayError> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let mut guard = self.bindings.lock().expect("lock poisoned");
        let before = guard.len();
        guard.retain(|_, b| b.last_accessed_at.max(b.created_at) >= cutoff);
        Ok(before - guard.len())
    }
}

pub struct InMemoryBillingLogStore {
    logs: Mutex<Vec<ConsumeLog>>,
    next_id: AtomicI64,
}

impl Default for InMemoryBillingLogStore {
    fn default() -> Self {
        Self { logs: Mutex::new(Vec::new()), next_id: AtomicI64::new(1) }
    }
}

impl InMemoryBillingLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ConsumeLog> {
        self.logs.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl BillingLogStore for InMemoryBillingLogStore {
    async fn append(&self, mut log: ConsumeLog) -> Result<(), GatewayError> {
        log.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.logs.lock().expect("lock poisoned").push(log);
        Ok(())
    }

    async fn update_by_id(&self, id: i64, patch: ConsumeLogPatch) -> Result<(), GatewayError> {
        let mut guard = self.logs.lock().expect("lock poisoned");
        let log = guard
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| GatewayError::Internal(format!("unknown consume log {id}")))?;
        if let Some(quota) = patch.quota {
            log.quota = quota;
        }
        if let Some(ms) = patch.elapsed_ms {
            log.elapsed_ms = ms;
        }
        if let Some(content) = patch.content {
            log.metadata["content"] = serde_json::Value::String(content);
        }
        Ok(())
    }

    async fn daily_usage(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        user_id: Option<UserId>,
    ) -> Result<Vec<DailyUsage>, GatewayError> {
        let guard = self.logs.lock().expect("lock poisoned");
        let filtered: Vec<ConsumeLog> = guard
            .iter()
            .filter(|l| l.created_at >= from && l.created_at < to)
            .filter(|l| user_id.map_or(true, |uid| l.user_id == uid))
            .cloned()
            .collect();
        Ok(group_by_day(&filtered))
    }
}

/// Seeds `(User, Token)` pairs at startup, keyed by the token's bearer key.
/// Stands in for the user/token database (spec §1 Non-goal).
#[derive(Default)]
pub struct InMemoryUserDirectory {
    by_key: HashMap<String, (User, Token)>,
}

impl InMemoryUserDirectory {
    pub fn new(entries: Vec<(User, Token)>) -> Self {
        Self { by_key: entries.into_iter().map(|(u, t)| (t.key.clone(), (u, t))).collect() }
    }
}

#[async_trait]
impl UserDirectoryStore for InMemoryUserDirectory {
    async fn resolve_token(&self, key: &str) -> Result<Option<(User, Token)>, GatewayError> {
        Ok(self.by_key.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn touch_strictly_increases_last_accessed_at() {
        let store = InMemoryAsyncTaskStore::new();
        let binding = AsyncTaskBinding {
            task_id: "v_1".into(),
            task_type: "video".into(),
            user_id: 42,
            token_id: 1,
            channel_id: 3,
            channel_type: crate::model::ProviderKind::OpenAI,
            origin_model: "sora".into(),
            actual_model: "sora".into(),
            request_method: "POST".into(),
            request_path: "/v1/video/generations".into(),
            request_params: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_accessed_at: Utc::now(),
        };
        store.save(binding.clone()).await.unwrap();

        let fetched = store.get_by_task_id("v_1").await.unwrap().unwrap();
        assert_eq!(fetched.channel_id, 3);
        assert_eq!(fetched.user_id, 42);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.touch("v_1").await.unwrap();
        let touched = store.get_by_task_id("v_1").await.unwrap().unwrap();
        assert!(touched.last_accessed_at > fetched.last_accessed_at);
    }

    #[tokio::test]
    async fn user_directory_resolves_by_token_key() {
        let user = User {
            id: 1,
            username: "alice".into(),
            group: "default".into(),
            status: crate::model::UserStatus::Enabled,
            quota: 1000,
            used_quota: 0,
            request_count: 0,
        };
        let token = Token {
            id: 7,
            user_id: 1,
            key: "sk-test-key".into(),
            status: crate::model::TokenStatus::Enabled,
            unlimited: true,
            remain_quota: 0,
            expired_at: None,
            models: vec![],
            subnets: vec![],
        };
        let directory = InMemoryUserDirectory::new(vec![(user, token)]);
        let resolved = directory.resolve_token("sk-test-key").await.unwrap();
        assert!(resolved.is_some());
        assert!(directory.resolve_token("nope").await.unwrap().is_none());
    }
}
