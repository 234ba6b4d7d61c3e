//! Pricing & Model Registry (C1, spec §4.1).
//!
//! Merges a provider's built-in pricing table with per-channel overrides.
//! The registry itself never talks to a store — callers load the built-in
//! tables once at startup and hand them to [`PricingRegistry::new`].

use crate::model::{Channel, PricingEntry, QUOTA_PER_USD};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PricingRegistry {
    /// channel_type -> model -> entry
    built_in: HashMap<String, HashMap<String, PricingEntry>>,
}

impl PricingRegistry {
    pub fn new(built_in: HashMap<String, HashMap<String, PricingEntry>>) -> Self {
        Self { built_in }
    }

    pub fn register_table(&mut self, channel_type: impl Into<String>, table: HashMap<String, PricingEntry>) {
        self.built_in.insert(channel_type.into(), table);
    }

    /// `Lookup(channel_type, model)` (spec §4.1): per-channel `model_configs`
    /// overrides the adaptor's built-in table entry; absent either, falls
    /// back to the 1.0/1.0 default.
    pub fn lookup(&self, channel: &Channel, channel_type: &str, model: &str) -> PricingEntry {
        if let Some(entry) = channel.model_configs.get(model) {
            return entry.clone();
        }
        if let Some(entry) = self.built_in.get(channel_type).and_then(|t| t.get(model)) {
            return entry.clone();
        }
        PricingEntry::default()
    }

    /// `ListForChannel(channel_type)` (spec §4.1). For the synthetic
    /// "OpenAI-compatible proxy" channel type the lookup set is the union of
    /// every adaptor's table.
    pub fn list_for_channel(&self, channel_type: &str) -> HashMap<String, PricingEntry> {
        if channel_type == OPENAI_COMPATIBLE_PROXY {
            let mut merged = HashMap::new();
            for table in self.built_in.values() {
                for (model, entry) in table {
                    merged.entry(model.clone()).or_insert_with(|| entry.clone());
                }
            }
            return merged;
        }
        self.built_in.get(channel_type).cloned().unwrap_or_default()
    }
}

pub const OPENAI_COMPATIBLE_PROXY: &str = "openai-compatible-proxy";

/// Converts a unit ratio to `usd_per_million_tokens` (spec §4.1): ratios
/// smaller than `0.001` are treated as already-scaled.
pub fn ratio_to_usd_per_million(ratio: f64) -> f64 {
    if ratio < 0.001 {
        ratio * 1_000_000.0
    } else {
        (ratio * 1_000_000.0) / QUOTA_PER_USD as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelStatus, ProviderKind, ToolingConfig};
    use std::collections::HashMap as Map;

    fn test_channel(configs: HashMap<String, PricingEntry>) -> Channel {
        Channel {
            id: 1,
            name: "test".into(),
            provider: ProviderKind::OpenAI,
            base_url: None,
            key: "sk-test".into(),
            status: ChannelStatus::Enabled,
            priority: 0,
            weight: 1,
            group_set: vec!["default".into()],
            model_set: vec!["gpt-4".into()],
            model_mapping: Map::new(),
            model_configs: configs,
            tooling: ToolingConfig::default(),
        }
    }

    #[test]
    fn channel_override_wins_over_builtin() {
        let mut built_in = HashMap::new();
        let mut table = HashMap::new();
        table.insert(
            "gpt-4".to_string(),
            PricingEntry { input_ratio: 0.03, ..Default::default() },
        );
        built_in.insert("openai".to_string(), table);
        let registry = PricingRegistry::new(built_in);

        let mut overrides = HashMap::new();
        overrides.insert(
            "gpt-4".to_string(),
            PricingEntry { input_ratio: 0.05, ..Default::default() },
        );
        let channel = test_channel(overrides);

        let entry = registry.lookup(&channel, "openai", "gpt-4");
        assert_eq!(entry.input_ratio, 0.05);
    }

    #[test]
    fn falls_back_to_default_when_unknown() {
        let registry = PricingRegistry::new(HashMap::new());
        let channel = test_channel(HashMap::new());
        let entry = registry.lookup(&channel, "openai", "unknown-model");
        assert_eq!(entry.input_ratio, 1.0);
        assert_eq!(entry.completion_ratio, 1.0);
    }

    #[test]
    fn cached_input_defaults_to_input_ratio() {
        let entry = PricingEntry { input_ratio: 0.03, ..Default::default() };
        assert_eq!(entry.cached_input_ratio(), 0.03);
    }

    #[test]
    fn ratio_scaling_rule() {
        assert_eq!(ratio_to_usd_per_million(0.0005), 500.0);
        assert!((ratio_to_usd_per_million(0.03) - 60.0).abs() < 1e-9);
    }
}
