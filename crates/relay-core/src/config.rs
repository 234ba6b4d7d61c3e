//! Gateway configuration (SPEC_FULL §10.3), covering every key spec §6
//! names. Loads from environment variables with typed defaults; the service
//! binary's `clap::Parser` CLI flags override these before the orchestrator
//! ever sees a `GatewayConfig`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub quota_for_new_user: i64,
    pub quota_for_inviter: i64,
    pub quota_for_invitee: i64,
    pub pre_consumed_quota: i64,
    pub quota_remind_threshold: i64,
    pub quota_per_unit: i64,

    pub channel_disable_threshold: u32,
    pub automatic_disable_channel_enabled: bool,
    pub automatic_enable_channel_enabled: bool,
    pub retry_times: u32,

    pub log_consume_enabled: bool,
    pub display_in_currency_enabled: bool,
    pub display_token_stat_enabled: bool,
    pub approximate_token_enabled: bool,

    pub batch_update_interval_secs: u64,
    pub batch_update_timeout_secs: u64,

    pub async_task_retention_days: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            quota_for_new_user: 0,
            quota_for_inviter: 0,
            quota_for_invitee: 0,
            pre_consumed_quota: 500,
            quota_remind_threshold: 1000,
            quota_per_unit: crate::model::QUOTA_PER_USD,
            channel_disable_threshold: 3,
            automatic_disable_channel_enabled: true,
            automatic_enable_channel_enabled: true,
            retry_times: 2,
            log_consume_enabled: true,
            display_in_currency_enabled: true,
            display_token_stat_enabled: true,
            approximate_token_enabled: false,
            batch_update_interval_secs: 5,
            batch_update_timeout_secs: 10,
            async_task_retention_days: 3,
        }
    }
}

impl GatewayConfig {
    /// Loads from environment variables (`RELAY_*` prefix), falling back to
    /// [`GatewayConfig::default`] for any key that is absent or fails to
    /// parse. CLI flags (see `relay-service`'s `Args`) are applied by the
    /// caller after this, per SPEC_FULL §10.3's precedence rule.
    pub fn from_env() -> Self {
        let mut cfg = GatewayConfig::default();

        macro_rules! load {
            ($field:ident, $key:literal) => {
                if let Ok(raw) = std::env::var($key) {
                    if let Ok(v) = raw.parse() {
                        cfg.$field = v;
                    }
                }
            };
        }

        load!(quota_for_new_user, "QUOTA_FOR_NEW_USER");
        load!(quota_for_inviter, "QUOTA_FOR_INVITER");
        load!(quota_for_invitee, "QUOTA_FOR_INVITEE");
        load!(pre_consumed_quota, "PRE_CONSUMED_QUOTA");
        load!(quota_remind_threshold, "QUOTA_REMIND_THRESHOLD");
        load!(quota_per_unit, "QUOTA_PER_UNIT");
        load!(channel_disable_threshold, "CHANNEL_DISABLE_THRESHOLD");
        load!(retry_times, "RETRY_TIMES");
        load!(batch_update_interval_secs, "BATCH_UPDATE_INTERVAL");
        load!(batch_update_timeout_secs, "BATCH_UPDATE_TIMEOUT_SEC");
        load!(async_task_retention_days, "ASYNC_TASK_RETENTION_DAYS");

        load!(automatic_disable_channel_enabled, "AUTOMATIC_DISABLE_CHANNEL_ENABLED");
        load!(automatic_enable_channel_enabled, "AUTOMATIC_ENABLE_CHANNEL_ENABLED");
        load!(log_consume_enabled, "LOG_CONSUME_ENABLED");
        load!(display_in_currency_enabled, "DISPLAY_IN_CURRENCY_ENABLED");
        load!(display_token_stat_enabled, "DISPLAY_TOKEN_STAT_ENABLED");
        load!(approximate_token_enabled, "APPROXIMATE_TOKEN_ENABLED");

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.quota_per_unit, 500_000);
        assert!(cfg.automatic_disable_channel_enabled);
        assert_eq!(cfg.channel_disable_threshold, 3);
    }
}
