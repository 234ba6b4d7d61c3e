//! Shared application state (spec §9 "injected `Registry`"): every core
//! component lives behind one `Arc` each, owned here rather than as a
//! process-wide singleton inside `relay-core`.

use relay_core::ability::AbilityIndex;
use relay_core::async_task::AsyncTaskBinder;
use relay_core::billing_log::BillingLogWriter;
use relay_core::config::GatewayConfig;
use relay_core::health::ChannelHealth;
use relay_core::model::{Channel, ChannelId};
use relay_core::pricing::PricingRegistry;
use relay_core::quota::QuotaLedger;
use relay_core::selector::ChannelSelector;
use relay_core::store::memory::{
    InMemoryAsyncTaskStore, InMemoryBillingLogStore, InMemoryQuotaStore, InMemoryUserDirectory,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// One process-wide instance, handed to every axum handler via `State`.
#[derive(Clone)]
pub struct AppState(pub Arc<Inner>);

pub struct Inner {
    pub config: GatewayConfig,
    pub abilities: AbilityIndex,
    pub selector: ChannelSelector,
    pub quota: QuotaLedger<InMemoryQuotaStore>,
    pub health: ChannelHealth,
    pub pricing: PricingRegistry,
    pub billing: BillingLogWriter<InMemoryBillingLogStore>,
    pub async_tasks: AsyncTaskBinder<InMemoryAsyncTaskStore>,
    pub users: InMemoryUserDirectory,
    pub channels: ChannelTable,
}

impl std::ops::Deref for AppState {
    type Target = Inner;

    fn deref(&self) -> &Inner {
        &self.0
    }
}

/// Full `Channel` records keyed by id, kept alongside the Ability Index
/// (which only materializes the `(group, model) -> channel_id` projection).
/// CONVERT_REQUEST needs the whole record — credentials, `model_mapping`,
/// `tooling` — once SELECT has picked a winner.
#[derive(Default)]
pub struct ChannelTable(RwLock<HashMap<ChannelId, Channel>>);

impl ChannelTable {
    pub fn new(channels: Vec<Channel>) -> Self {
        let map = channels.into_iter().map(|c| (c.id, c)).collect();
        Self(RwLock::new(map))
    }

    pub fn get(&self, id: ChannelId) -> Option<Channel> {
        self.0.read().expect("channel table lock poisoned").get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Channel> {
        self.0.read().expect("channel table lock poisoned").values().cloned().collect()
    }

    pub fn upsert(&self, channel: Channel) {
        self.0.write().expect("channel table lock poisoned").insert(channel.id, channel);
    }
}
