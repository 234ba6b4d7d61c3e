//! Data model (spec §3): the shapes every other module operates on.
//!
//! These are plain structs rather than a schema — persistence is handled by
//! the store traits in [`crate::store`], which serialize/deserialize these
//! types against whichever backend is in play.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type UserId = i64;
pub type ChannelId = i64;
pub type TokenId = i64;

/// Quota units per US dollar. All ledger arithmetic is integer quota units;
/// USD is only a display projection (spec §3).
pub const QUOTA_PER_USD: i64 = 500_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub group: String,
    pub status: UserStatus,
    pub quota: i64,
    pub used_quota: i64,
    pub request_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Enabled,
    Disabled,
    Deleted,
}

impl User {
    pub fn is_usable(&self) -> bool {
        matches!(self.status, UserStatus::Enabled) && self.quota >= 0
    }
}

/// An API token presented by a caller. One user may hold many tokens, each
/// independently scoped (spec §3 Token / §4.2 Permission Resolver).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub user_id: UserId,
    pub key: String,
    pub status: TokenStatus,
    pub unlimited: bool,
    /// Meaningful only when `unlimited` is false; must stay `>= 0`.
    pub remain_quota: i64,
    pub expired_at: Option<DateTime<Utc>>,
    /// Empty means "no restriction" (spec §4.2).
    pub models: Vec<String>,
    /// CIDR blocks this token may be used from; empty means unrestricted.
    pub subnets: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Enabled,
    Disabled,
    Expired,
    Exhausted,
}

impl Token {
    pub fn permits_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        if self.status != TokenStatus::Enabled {
            return false;
        }
        if let Some(expired_at) = self.expired_at {
            if now >= expired_at {
                return false;
            }
        }
        self.unlimited || self.remain_quota > 0
    }

    /// IP-subnet allowlist check for `AUTH` (spec §4.6). Empty `subnets`
    /// means unrestricted; a malformed CIDR entry never matches rather than
    /// failing open.
    pub fn permits_addr(&self, addr: std::net::IpAddr) -> bool {
        if self.subnets.is_empty() {
            return true;
        }
        self.subnets.iter().any(|cidr| cidr_contains(cidr, addr))
    }
}

fn cidr_contains(cidr: &str, addr: std::net::IpAddr) -> bool {
    use std::net::IpAddr;

    let (base_str, prefix_str) = match cidr.split_once('/') {
        Some(parts) => parts,
        None => (cidr, ""),
    };
    let Ok(base) = base_str.parse::<IpAddr>() else { return false };

    match (base, addr) {
        (IpAddr::V4(base), IpAddr::V4(addr)) => {
            let prefix: u32 = prefix_str.parse().unwrap_or(32).min(32);
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            (u32::from(base) & mask) == (u32::from(addr) & mask)
        }
        (IpAddr::V6(base), IpAddr::V6(addr)) => {
            let prefix: u32 = prefix_str.parse().unwrap_or(128).min(128);
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            (u128::from(base) & mask) == (u128::from(addr) & mask)
        }
        _ => false,
    }
}

/// An upstream credential/endpoint pairing the gateway can route to
/// (spec §3 Channel / §4.3 Channel Selector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub provider: ProviderKind,
    pub base_url: Option<String>,
    /// Encoding is provider-specific (spec §6): `AK|SK|region` for Bedrock,
    /// `region|project|ADC-json` for Vertex/Gemini, opaque elsewhere.
    pub key: String,
    pub status: ChannelStatus,
    pub priority: i32,
    pub weight: u32,
    pub group_set: Vec<String>,
    pub model_set: Vec<String>,
    /// Alias -> real model name, applied after selection (spec §4.3 step 4).
    pub model_mapping: HashMap<String, String>,
    /// Per-model pricing overrides, highest precedence in C1's lookup order.
    pub model_configs: HashMap<String, PricingEntry>,
    pub tooling: ToolingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Enabled,
    AutoDisabled,
    ManualDisabled,
}

impl ChannelStatus {
    pub fn is_enabled(&self) -> bool {
        matches!(self, ChannelStatus::Enabled)
    }
}

impl Channel {
    pub fn resolve_model(&self, requested: &str) -> String {
        self.model_mapping.get(requested).cloned().unwrap_or_else(|| requested.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAI,
    Azure,
    Anthropic,
    Gemini,
    Bedrock,
    DeepSeek,
}

/// One (group, model) -> channel mapping entry in the Ability Index
/// (spec §4.2/C2). Purged from the index when a channel is disabled/deleted.
#[derive(Debug, Clone)]
pub struct Ability {
    pub group: String,
    pub model: String,
    pub channel_id: ChannelId,
    pub priority: i32,
    pub weight: u32,
    pub enabled: bool,
    pub suspended_until: Option<DateTime<Utc>>,
}

/// Per-model price ratios, consulted by the Pricing module (C1) to turn
/// usage into a quota delta (spec §3 PricingEntry / §4.1).
///
/// `*_ratio` fields follow the adaptor convention: a ratio `r` converts to
/// `usd_per_million_tokens` via [`crate::pricing::ratio_to_usd_per_million`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingEntry {
    pub input_ratio: f64,
    pub completion_ratio: f64,
    pub cached_input_ratio: Option<f64>,
    pub cache_write_5m_ratio: Option<f64>,
    pub cache_write_1h_ratio: Option<f64>,
    pub max_tokens: Option<u32>,
    pub image_price_usd: Option<f64>,
    pub image_token_ratio: Option<f64>,
    pub audio_input_ratio: Option<f64>,
    pub audio_output_ratio: Option<f64>,
}

impl Default for PricingEntry {
    fn default() -> Self {
        PricingEntry {
            input_ratio: 1.0,
            completion_ratio: 1.0,
            cached_input_ratio: None,
            cache_write_5m_ratio: None,
            cache_write_1h_ratio: None,
            max_tokens: None,
            image_price_usd: None,
            image_token_ratio: None,
            audio_input_ratio: None,
            audio_output_ratio: None,
        }
    }
}

impl PricingEntry {
    /// Cached-input price defaults to the input price when absent (spec §4.1).
    pub fn cached_input_ratio(&self) -> f64 {
        self.cached_input_ratio.filter(|r| *r > 0.0).unwrap_or(self.input_ratio)
    }
}

/// One tool's price, named per the unit the admin configured it in
/// (spec §3 ToolingConfig).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPrice {
    UsdPerCall(f64),
    QuotaPerCall(i64),
}

impl ToolPrice {
    pub fn as_quota(&self) -> i64 {
        match self {
            ToolPrice::UsdPerCall(usd) => (*usd * QUOTA_PER_USD as f64).round() as i64,
            ToolPrice::QuotaPerCall(q) => *q,
        }
    }
}

/// Per-channel tool enforcement config (spec §3/§4.5). Empty whitelist means
/// all tools are allowed; a whitelisted tool without a price in either the
/// channel config or the process-wide default blocks the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolingConfig {
    pub whitelist: Vec<String>,
    pub pricing: HashMap<String, ToolPrice>,
}

impl ToolingConfig {
    pub fn allows(&self, tool: &str) -> bool {
        self.whitelist.is_empty() || self.whitelist.iter().any(|t| t == tool)
    }
}

/// Identifies a request for idempotency/retry bookkeeping and for the
/// fields every log line carries (spec §3 RequestFingerprint).
#[derive(Debug, Clone)]
pub struct RequestFingerprint {
    pub user_id: UserId,
    pub token_id: TokenId,
    pub group: String,
    pub origin_model: String,
    pub actual_model: String,
    pub channel_id: ChannelId,
    pub is_stream: bool,
    pub request_id: String,
    pub trace_id: String,
    pub start_ts: DateTime<Utc>,
}

/// Binds a long-running provider job (e.g. video generation) to the caller
/// that started it so a later poll/cancel can reach the same channel even
/// after the original request's context is gone (spec C9 / §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncTaskBinding {
    pub task_id: String,
    pub task_type: String,
    pub user_id: UserId,
    pub token_id: TokenId,
    pub channel_id: ChannelId,
    pub channel_type: ProviderKind,
    pub origin_model: String,
    pub actual_model: String,
    pub request_method: String,
    pub request_path: String,
    pub request_params: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// One append-only billing record (spec C10 Billing Log Writer / §3 ConsumeLog).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeLog {
    pub id: i64,
    pub user_id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub model_name: String,
    pub token_name: String,
    pub channel_id: ChannelId,
    pub quota: i64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cached_prompt_tokens: u32,
    pub cached_completion_tokens: u32,
    pub elapsed_ms: u64,
    pub is_stream: bool,
    pub request_id: String,
    pub trace_id: String,
    /// JSON metadata: `cache_write_5m`, `cache_write_1h`, `tool_invocations[]`,
    /// and `usage_estimated` when the streaming fallback estimator ran.
    pub metadata: serde_json::Value,
}

/// Mutable subset `UpdateConsumeLogByID` may touch for late reconciliation
/// (spec §4.10).
#[derive(Debug, Clone, Default)]
pub struct ConsumeLogPatch {
    pub quota: Option<i64>,
    pub content: Option<String>,
    pub elapsed_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_subnets(subnets: Vec<&str>) -> Token {
        Token {
            id: 1,
            user_id: 1,
            key: "sk-test".into(),
            status: TokenStatus::Enabled,
            unlimited: true,
            remain_quota: 0,
            expired_at: None,
            models: vec![],
            subnets: subnets.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn empty_subnets_permits_any_address() {
        let token = token_with_subnets(vec![]);
        assert!(token.permits_addr("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn cidr_allowlist_matches_only_the_configured_block() {
        let token = token_with_subnets(vec!["10.0.0.0/24"]);
        assert!(token.permits_addr("10.0.0.42".parse().unwrap()));
        assert!(!token.permits_addr("10.0.1.42".parse().unwrap()));
    }

    #[test]
    fn permits_model_empty_allowlist_means_unrestricted() {
        let token = token_with_subnets(vec![]);
        assert!(token.permits_model("anything"));
    }
}
