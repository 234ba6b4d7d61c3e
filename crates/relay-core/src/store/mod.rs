//! Store traits (SPEC_FULL §10.4): async persistence abstractions so core
//! logic is testable against an in-memory backend and runnable against a
//! durable one without branching on backend in business logic. Full
//! relational schema migration and the admin CRUD surface stay out of scope
//! (spec §1) — these traits exist to make the Quota Ledger's batched
//! write-back and the Async Task Binder's sweeper concretely runnable.

pub mod memory;
pub mod sqlite;

use crate::error::GatewayError;
use crate::model::{AsyncTaskBinding, Channel, ConsumeLog, ConsumeLogPatch, Token, TokenId, User, UserId};
use crate::quota::AccumulatorKey;
use crate::reporting::DailyUsage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn get_user_quota(&self, user_id: UserId) -> Result<i64, GatewayError>;
    async fn get_token_remain_quota(&self, token_id: TokenId) -> Result<Option<i64>, GatewayError>;
    async fn apply_deltas(&self, deltas: &HashMap<AccumulatorKey, i64>) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait AbilityStore: Send + Sync {
    /// Loads the channel set for cold-start Ability Index rebuild (spec §4.2).
    async fn load_channels(&self) -> Result<Vec<Channel>, GatewayError>;
}

#[async_trait]
pub trait AsyncTaskStore: Send + Sync {
    /// `Save(binding)` (spec C9): upserts by `task_id`.
    async fn save(&self, binding: AsyncTaskBinding) -> Result<(), GatewayError>;
    async fn get_by_task_id(&self, task_id: &str) -> Result<Option<AsyncTaskBinding>, GatewayError>;
    /// `Touch(task_id)` (spec C9): strictly increases `last_accessed_at`.
    async fn touch(&self, task_id: &str) -> Result<(), GatewayError>;
    /// Retention sweeper (spec C9): deletes rows whose
    /// `max(last_accessed_at, created_at) < now - retention_days`. Returns
    /// the number of rows purged.
    async fn sweep_expired(&self, retention_days: i64) -> Result<usize, GatewayError>;
}

#[async_trait]
pub trait BillingLogStore: Send + Sync {
    async fn append(&self, log: ConsumeLog) -> Result<(), GatewayError>;
    /// `UpdateConsumeLogByID` (spec §4.10): only `{quota, content, elapsed_time}`.
    async fn update_by_id(&self, id: i64, patch: ConsumeLogPatch) -> Result<(), GatewayError>;
    /// Dashboard query (spec §6, §8 scenario 8): usage grouped by billing day
    /// over the half-open range `[from, to)`, optionally scoped to one user.
    async fn daily_usage(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        user_id: Option<UserId>,
    ) -> Result<Vec<DailyUsage>, GatewayError>;
}

/// Resolves a bearer token to its owning user and token record for `AUTH`
/// (spec §4.6). User/token CRUD itself is out of scope (spec §1) — this
/// trait exists only so the orchestrator has something to call; an admin
/// surface for creating/editing users and tokens is not part of this crate.
#[async_trait]
pub trait UserDirectoryStore: Send + Sync {
    async fn resolve_token(&self, key: &str) -> Result<Option<(User, Token)>, GatewayError>;
}
