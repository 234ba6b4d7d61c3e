//! SQLite-backed store implementations (SPEC_FULL §10.4), grounded on the
//! teacher's `SqliteSessionStore` split: the same trait has an in-memory
//! twin for tests and a pool-backed twin for durability across restarts.
//! This is not the admin database — full schema migration and multi-backend
//! SQL dialects stay out of scope (spec §1).

use super::{AsyncTaskStore, BillingLogStore, QuotaStore};
use crate::error::GatewayError;
use crate::model::{AsyncTaskBinding, ConsumeLog, ConsumeLogPatch, ProviderKind, TokenId, UserId};
use crate::quota::AccumulatorKey;
use crate::reporting::{day_bucket_sql, DailyUsage};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

pub struct SqliteQuotaStore {
    pool: SqlitePool,
}

impl SqliteQuotaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_quota (user_id INTEGER PRIMARY KEY, quota INTEGER NOT NULL DEFAULT 0,
             used_quota INTEGER NOT NULL DEFAULT 0, request_count INTEGER NOT NULL DEFAULT 0)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS token_quota (token_id INTEGER PRIMARY KEY, remain_quota INTEGER NOT NULL DEFAULT 0)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS channel_used_quota (channel_id INTEGER PRIMARY KEY, used_quota INTEGER NOT NULL DEFAULT 0)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QuotaStore for SqliteQuotaStore {
    async fn get_user_quota(&self, user_id: UserId) -> Result<i64, GatewayError> {
        let row = sqlx::query("SELECT quota FROM user_quota WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("quota")).unwrap_or(0))
    }

    async fn get_token_remain_quota(&self, token_id: TokenId) -> Result<Option<i64>, GatewayError> {
        let row = sqlx::query("SELECT remain_quota FROM token_quota WHERE token_id = ?")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("remain_quota")))
    }

    async fn apply_deltas(&self, deltas: &HashMap<AccumulatorKey, i64>) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await?;
        for (key, delta) in deltas {
            match key {
                AccumulatorKey::UserQuota(uid) => {
                    sqlx::query(
                        "INSERT INTO user_quota (user_id, quota) VALUES (?, ?)
                         ON CONFLICT(user_id) DO UPDATE SET quota = quota + excluded.quota",
                    )
                    .bind(uid)
                    .bind(delta)
                    .execute(&mut *tx)
                    .await?;
                }
                AccumulatorKey::TokenQuota(tid) => {
                    sqlx::query(
                        "INSERT INTO token_quota (token_id, remain_quota) VALUES (?, ?)
                         ON CONFLICT(token_id) DO UPDATE SET remain_quota = remain_quota + excluded.remain_quota",
                    )
                    .bind(tid)
                    .bind(delta)
                    .execute(&mut *tx)
                    .await?;
                }
                AccumulatorKey::UserUsedQuota(uid) => {
                    sqlx::query(
                        "INSERT INTO user_quota (user_id, used_quota) VALUES (?, ?)
                         ON CONFLICT(user_id) DO UPDATE SET used_quota = used_quota + excluded.used_quota",
                    )
                    .bind(uid)
                    .bind(delta)
                    .execute(&mut *tx)
                    .await?;
                }
                AccumulatorKey::UserRequestCount(uid) => {
                    sqlx::query(
                        "INSERT INTO user_quota (user_id, request_count) VALUES (?, ?)
                         ON CONFLICT(user_id) DO UPDATE SET request_count = request_count + excluded.request_count",
                    )
                    .bind(uid)
                    .bind(delta)
                    .execute(&mut *tx)
                    .await?;
                }
                AccumulatorKey::ChannelUsedQuota(cid) => {
                    sqlx::query(
                        "INSERT INTO channel_used_quota (channel_id, used_quota) VALUES (?, ?)
                         ON CONFLICT(channel_id) DO UPDATE SET used_quota = used_quota + excluded.used_quota",
                    )
                    .bind(cid)
                    .bind(delta)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

pub struct SqliteAsyncTaskStore {
    pool: SqlitePool,
}

impl SqliteAsyncTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS async_task_bindings (
                task_id TEXT PRIMARY KEY, task_type TEXT NOT NULL, user_id INTEGER NOT NULL,
                token_id INTEGER NOT NULL, channel_id INTEGER NOT NULL, channel_type TEXT NOT NULL,
                origin_model TEXT NOT NULL, actual_model TEXT NOT NULL, request_method TEXT NOT NULL,
                request_path TEXT NOT NULL, request_params TEXT NOT NULL,
                created_at TEXT NOT NULL, updated_at TEXT NOT NULL, last_accessed_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_binding(row: &sqlx::sqlite::SqliteRow) -> Result<AsyncTaskBinding, GatewayError> {
        let channel_type: String = row.get("channel_type");
        let channel_type = match channel_type.as_str() {
            "openai" => ProviderKind::OpenAI,
            "azure" => ProviderKind::Azure,
            "anthropic" => ProviderKind::Anthropic,
            "gemini" => ProviderKind::Gemini,
            "bedrock" => ProviderKind::Bedrock,
            "deepseek" => ProviderKind::DeepSeek,
            other => return Err(GatewayError::Internal(format!("unknown channel_type {other}"))),
        };
        let params: String = row.get("request_params");
        Ok(AsyncTaskBinding {
            task_id: row.get("task_id"),
            task_type: row.get("task_type"),
            user_id: row.get("user_id"),
            token_id: row.get("token_id"),
            channel_id: row.get("channel_id"),
            channel_type,
            origin_model: row.get("origin_model"),
            actual_model: row.get("actual_model"),
            request_method: row.get("request_method"),
            request_path: row.get("request_path"),
            request_params: serde_json::from_str(&params).unwrap_or(serde_json::Value::Null),
            created_at: parse_ts(row.get("created_at"))?,
            updated_at: parse_ts(row.get("updated_at"))?,
            last_accessed_at: parse_ts(row.get("last_accessed_at"))?,
        })
    }
}

fn parse_ts(raw: String) -> Result<DateTime<Utc>, GatewayError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GatewayError::Internal(format!("malformed timestamp: {e}")))
}

fn provider_kind_str(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAI => "openai",
        ProviderKind::Azure => "azure",
        ProviderKind::Anthropic => "anthropic",
        ProviderKind::Gemini => "gemini",
        ProviderKind::Bedrock => "bedrock",
        ProviderKind::DeepSeek => "deepseek",
    }
}

#[async_trait]
impl AsyncTaskStore for SqliteAsyncTaskStore {
    async fn save(&self, binding: AsyncTaskBinding) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO async_task_bindings
             (task_id, task_type, user_id, token_id, channel_id, channel_type, origin_model, actual_model,
              request_method, request_path, request_params, created_at, updated_at, last_accessed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(task_id) DO UPDATE SET
                updated_at = excluded.updated_at, last_accessed_at = excluded.last_accessed_at",
        )
        .bind(&binding.task_id)
        .bind(&binding.task_type)
        .bind(binding.user_id)
        .bind(binding.token_id)
        .bind(binding.channel_id)
        .bind(provider_kind_str(binding.channel_type))
        .bind(&binding.origin_model)
        .bind(&binding.actual_model)
        .bind(&binding.request_method)
        .bind(&binding.request_path)
        .bind(binding.request_params.to_string())
        .bind(binding.created_at.to_rfc3339())
        .bind(binding.updated_at.to_rfc3339())
        .bind(binding.last_accessed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_task_id(&self, task_id: &str) -> Result<Option<AsyncTaskBinding>, GatewayError> {
        let row = sqlx::query("SELECT * FROM async_task_bindings WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_binding).transpose()
    }

    async fn touch(&self, task_id: &str) -> Result<(), GatewayError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE async_task_bindings SET last_accessed_at = ? WHERE task_id = ?")
            .bind(now)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::Internal(format!("unknown task {task_id}")));
        }
        Ok(())
    }

    async fn sweep_expired(&self, retention_days: i64) -> Result<usize, GatewayError> {
        let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();
        let result = sqlx::query(
            "DELETE FROM async_task_bindings WHERE max(last_accessed_at, created_at) < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}

pub struct SqliteBillingLogStore {
    pool: SqlitePool,
}

impl SqliteBillingLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS consume_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER NOT NULL, username TEXT NOT NULL,
                created_at TEXT NOT NULL, model_name TEXT NOT NULL, token_name TEXT NOT NULL,
                channel_id INTEGER NOT NULL, quota INTEGER NOT NULL, prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL, cached_prompt_tokens INTEGER NOT NULL,
                cached_completion_tokens INTEGER NOT NULL, elapsed_ms INTEGER NOT NULL,
                is_stream INTEGER NOT NULL, request_id TEXT NOT NULL, trace_id TEXT NOT NULL,
                metadata TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BillingLogStore for SqliteBillingLogStore {
    async fn append(&self, log: ConsumeLog) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO consume_logs
             (user_id, username, created_at, model_name, token_name, channel_id, quota, prompt_tokens,
              completion_tokens, cached_prompt_tokens, cached_completion_tokens, elapsed_ms, is_stream,
              request_id, trace_id, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.user_id)
        .bind(&log.username)
        .bind(log.created_at.to_rfc3339())
        .bind(&log.model_name)
        .bind(&log.token_name)
        .bind(log.channel_id)
        .bind(log.quota)
        .bind(log.prompt_tokens)
        .bind(log.completion_tokens)
        .bind(log.cached_prompt_tokens)
        .bind(log.cached_completion_tokens)
        .bind(log.elapsed_ms as i64)
        .bind(log.is_stream)
        .bind(&log.request_id)
        .bind(&log.trace_id)
        .bind(log.metadata.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_by_id(&self, id: i64, patch: ConsumeLogPatch) -> Result<(), GatewayError> {
        if let Some(quota) = patch.quota {
            sqlx::query("UPDATE consume_logs SET quota = ? WHERE id = ?").bind(quota).bind(id).execute(&self.pool).await?;
        }
        if let Some(ms) = patch.elapsed_ms {
            sqlx::query("UPDATE consume_logs SET elapsed_ms = ? WHERE id = ?")
                .bind(ms as i64)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(content) = patch.content {
            sqlx::query("UPDATE consume_logs SET metadata = json_set(metadata, '$.content', ?) WHERE id = ?")
                .bind(content)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn daily_usage(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        user_id: Option<UserId>,
    ) -> Result<Vec<DailyUsage>, GatewayError> {
        let day_expr = day_bucket_sql("created_at");
        // sqlx binds positionally, so the optional `user_id` filter needs
        // its own query text rather than a nullable-bind trick.
        let rows = if let Some(uid) = user_id {
            sqlx::query(&format!(
                "SELECT {day_expr} AS day, COUNT(*) AS request_count, SUM(quota) AS quota,
                        SUM(prompt_tokens) AS prompt_tokens, SUM(completion_tokens) AS completion_tokens
                 FROM consume_logs WHERE created_at >= ? AND created_at < ? AND user_id = ?
                 GROUP BY day ORDER BY day"
            ))
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .bind(uid)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {day_expr} AS day, COUNT(*) AS request_count, SUM(quota) AS quota,
                        SUM(prompt_tokens) AS prompt_tokens, SUM(completion_tokens) AS completion_tokens
                 FROM consume_logs WHERE created_at >= ? AND created_at < ?
                 GROUP BY day ORDER BY day"
            ))
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter()
            .map(|row| {
                let day_str: String = row.get("day");
                let day = NaiveDate::parse_from_str(&day_str, "%Y-%m-%d")
                    .map_err(|e| GatewayError::Internal(format!("malformed day bucket {day_str}: {e}")))?;
                Ok(DailyUsage {
                    day,
                    request_count: row.get::<i64, _>("request_count") as u64,
                    quota: row.get::<Option<i64>, _>("quota").unwrap_or(0),
                    prompt_tokens: row.get::<Option<i64>, _>("prompt_tokens").unwrap_or(0) as u64,
                    completion_tokens: row.get::<Option<i64>, _>("completion_tokens").unwrap_or(0) as u64,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        SqlitePool::connect("sqlite::memory:").await.expect("open in-memory sqlite pool")
    }

    #[tokio::test]
    async fn quota_store_round_trips_through_apply_deltas() {
        let store = SqliteQuotaStore::new(pool().await);
        store.migrate().await.unwrap();

        let mut deltas = HashMap::new();
        deltas.insert(AccumulatorKey::UserQuota(7), -500);
        deltas.insert(AccumulatorKey::TokenQuota(1), -500);
        store.apply_deltas(&deltas).await.unwrap();

        assert_eq!(store.get_user_quota(7).await.unwrap(), -500);
        assert_eq!(store.get_token_remain_quota(1).await.unwrap(), Some(-500));
        assert_eq!(store.get_user_quota(999).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn async_task_store_save_touch_and_sweep() {
        let store = SqliteAsyncTaskStore::new(pool().await);
        store.migrate().await.unwrap();

        let now = Utc::now();
        let binding = AsyncTaskBinding {
            task_id: "v_1".into(),
            task_type: "video".into(),
            user_id: 1,
            token_id: 1,
            channel_id: 3,
            channel_type: ProviderKind::OpenAI,
            origin_model: "sora".into(),
            actual_model: "sora".into(),
            request_method: "POST".into(),
            request_path: "/v1/videos/generations".into(),
            request_params: serde_json::json!({"n": 1}),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
        };
        store.save(binding.clone()).await.unwrap();

        let fetched = store.get_by_task_id("v_1").await.unwrap().expect("row just inserted");
        assert_eq!(fetched.channel_id, 3);
        assert_eq!(fetched.request_params, serde_json::json!({"n": 1}));

        store.touch("v_1").await.unwrap();
        let touched = store.get_by_task_id("v_1").await.unwrap().unwrap();
        assert!(touched.last_accessed_at >= fetched.last_accessed_at);

        assert!(store.touch("v_missing").await.is_err());

        let purged = store.sweep_expired(-1).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_by_task_id("v_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn billing_log_store_aggregates_daily_usage_scoped_by_user() {
        let store = SqliteBillingLogStore::new(pool().await);
        store.migrate().await.unwrap();

        let day = Utc::now();
        let base = ConsumeLog {
            id: 0,
            user_id: 1,
            username: "alice".into(),
            created_at: day,
            model_name: "gpt-4".into(),
            token_name: "default".into(),
            channel_id: 1,
            quota: 100,
            prompt_tokens: 50,
            completion_tokens: 25,
            cached_prompt_tokens: 0,
            cached_completion_tokens: 0,
            elapsed_ms: 500,
            is_stream: false,
            request_id: "req-1".into(),
            trace_id: "trace-1".into(),
            metadata: serde_json::json!({}),
        };
        store.append(base.clone()).await.unwrap();
        store.append(ConsumeLog { user_id: 2, quota: 40, prompt_tokens: 10, completion_tokens: 5, ..base.clone() }).await.unwrap();

        let from = day - chrono::Duration::hours(1);
        let to = day + chrono::Duration::hours(1);

        let everyone = store.daily_usage(from, to, None).await.unwrap();
        assert_eq!(everyone.len(), 1);
        assert_eq!(everyone[0].request_count, 2);
        assert_eq!(everyone[0].quota, 140);

        let just_alice = store.daily_usage(from, to, Some(1)).await.unwrap();
        assert_eq!(just_alice.len(), 1);
        assert_eq!(just_alice[0].request_count, 1);
        assert_eq!(just_alice[0].quota, 100);

        let outside_range = store.daily_usage(day + chrono::Duration::days(2), day + chrono::Duration::days(3), None).await.unwrap();
        assert!(outside_range.is_empty());
    }
}
