//! Ability Index (C2, spec §4.2).
//!
//! Materializes `(group, model) -> [AbilityRow]` from the channel
//! crossproduct `group_set x model_set` (plus `model_configs`-only models,
//! per spec §4.2). Held behind a copy-on-write `ArcSwap`-style pointer: a
//! single writer rebuilds a fresh index and swaps it in; readers always see
//! a complete snapshot, never a partial rebuild (spec §5).

use crate::model::{Ability, Channel};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default, Clone)]
struct IndexSnapshot {
    rows: HashMap<(String, String), Vec<Ability>>,
}

pub struct AbilityIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    version: AtomicU64,
}

impl Default for AbilityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl AbilityIndex {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            version: AtomicU64::new(0),
        }
    }

    /// Monotonically increasing version, bumped on every rebuild. The
    /// Channel Selector's per-route cache self-invalidates on mismatch
    /// (spec §4.3/§9).
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// `Rebuild()` (spec §4.2): idempotent, single-writer. Crossproducts
    /// every enabled channel's `group_set x model_set`, then folds in models
    /// that appear only in `model_configs` (no `model_set` entry) so they
    /// still surface in the index.
    pub fn rebuild(&self, channels: &[Channel]) {
        let mut rows: HashMap<(String, String), Vec<Ability>> = HashMap::new();

        for channel in channels {
            let mut models: Vec<&str> = channel.model_set.iter().map(String::as_str).collect();
            for model in channel.model_configs.keys() {
                if !channel.model_set.iter().any(|m| m == model) {
                    models.push(model.as_str());
                }
            }

            for group in &channel.group_set {
                for model in &models {
                    let row = Ability {
                        group: group.clone(),
                        model: model.to_string(),
                        channel_id: channel.id,
                        priority: channel.priority,
                        weight: channel.weight,
                        enabled: channel.status.is_enabled(),
                        suspended_until: None,
                    };
                    rows.entry((group.clone(), model.to_string())).or_default().push(row);
                }
            }
        }

        let next = Arc::new(IndexSnapshot { rows });
        {
            let mut guard = self.snapshot.write().expect("ability index lock poisoned");
            *guard = next;
        }
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// `Lookup(group, model)` (spec §4.2): only rows with `enabled=true` and
    /// `suspended_until <= now` are returned.
    pub fn lookup(&self, group: &str, model: &str) -> Vec<Ability> {
        let now = Utc::now();
        let snapshot = self.snapshot.read().expect("ability index lock poisoned").clone();
        snapshot
            .rows
            .get(&(group.to_string(), model.to_string()))
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.enabled && r.suspended_until.map(|s| s <= now).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelStatus, ProviderKind, ToolingConfig};
    use std::collections::HashMap as Map;

    fn channel(id: i64, priority: i32, weight: u32, status: ChannelStatus) -> Channel {
        Channel {
            id,
            name: format!("chan-{id}"),
            provider: ProviderKind::OpenAI,
            base_url: None,
            key: "sk-test".into(),
            status,
            priority,
            weight,
            group_set: vec!["default".into()],
            model_set: vec!["gpt-4".into()],
            model_mapping: Map::new(),
            model_configs: Map::new(),
            tooling: ToolingConfig::default(),
        }
    }

    #[test]
    fn rebuild_then_lookup_returns_enabled_channels_only() {
        let index = AbilityIndex::new();
        let channels = vec![
            channel(1, 0, 1, ChannelStatus::Enabled),
            channel(2, 0, 1, ChannelStatus::AutoDisabled),
        ];
        index.rebuild(&channels);
        let rows = index.lookup("default", "gpt-4");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_id, 1);
    }

    #[test]
    fn rebuild_bumps_version() {
        let index = AbilityIndex::new();
        let v0 = index.version();
        index.rebuild(&[channel(1, 0, 1, ChannelStatus::Enabled)]);
        assert!(index.version() > v0);
    }

    #[test]
    fn model_configs_only_model_still_surfaces() {
        let mut chan = channel(1, 0, 1, ChannelStatus::Enabled);
        chan.model_set.clear();
        chan.model_configs.insert("gpt-4-config-only".into(), Default::default());
        let index = AbilityIndex::new();
        index.rebuild(&[chan]);
        let rows = index.lookup("default", "gpt-4-config-only");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn empty_lookup_returns_empty_vec() {
        let index = AbilityIndex::new();
        assert!(index.lookup("nope", "nope").is_empty());
    }
}
