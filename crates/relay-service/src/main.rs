//! `relay-service`: the HTTP front door binary. Wires a [`GatewayConfig`],
//! the in-memory stores, and every core component into an
//! [`state::AppState`], then serves the routes in [`routes`] (spec §6 exit
//! codes / signal contract: `SIGINT`/`SIGTERM` drain to a final quota flush
//! before exit).

mod dto;
mod orchestrator;
mod provider_factory;
mod routes;
mod state;
mod stream;

use anyhow::Result;
use clap::Parser;
use relay_core::ability::AbilityIndex;
use relay_core::async_task::AsyncTaskBinder;
use relay_core::billing_log::BillingLogWriter;
use relay_core::config::GatewayConfig;
use relay_core::health::ChannelHealth;
use relay_core::model::{Channel, PricingEntry, Token, User};
use relay_core::pricing::PricingRegistry;
use relay_core::quota::QuotaLedger;
use relay_core::selector::ChannelSelector;
use relay_core::store::memory::{
    InMemoryAsyncTaskStore, InMemoryBillingLogStore, InMemoryQuotaStore, InMemoryUserDirectory,
};
use serde::Deserialize;
use state::{AppState, ChannelTable, Inner};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "LLM request gateway front door")]
struct Args {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "RELAY_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,

    /// JSON file seeding the channel table and the user/token directory
    /// (admin CRUD for these is out of scope; this is how a deployment of
    /// this crate bootstraps them).
    #[arg(long, env = "RELAY_SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// Overrides `GatewayConfig::retry_times` (SPEC_FULL §10.3 precedence:
    /// CLI flag wins over environment).
    #[arg(long, env = "RELAY_RETRY_TIMES")]
    retry_times: Option<u32>,

    /// Overrides `GatewayConfig::channel_disable_threshold`.
    #[arg(long, env = "RELAY_CHANNEL_DISABLE_THRESHOLD")]
    channel_disable_threshold: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    users: Vec<SeedUser>,
}

#[derive(Debug, Deserialize)]
struct SeedUser {
    user: User,
    token: Token,
}

fn built_in_pricing_tables() -> HashMap<String, HashMap<String, PricingEntry>> {
    // Minimal built-in defaults; channel-level `model_configs` overrides take
    // precedence per `PricingRegistry::lookup` (spec §4.1).
    let mut tables = HashMap::new();
    for kind in ["openai", "azure", "anthropic", "gemini", "bedrock", "deepseek"] {
        tables.insert(kind.to_string(), HashMap::new());
    }
    tables
}

fn build_state(args: &Args) -> Result<AppState> {
    let mut config = GatewayConfig::from_env();
    if let Some(v) = args.retry_times {
        config.retry_times = v;
    }
    if let Some(v) = args.channel_disable_threshold {
        config.channel_disable_threshold = v;
    }

    let seed = match &args.seed_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<SeedFile>(&raw)?
        }
        None => SeedFile::default(),
    };

    let abilities = AbilityIndex::new();
    abilities.rebuild(&seed.channels);

    let inner = Inner {
        abilities,
        selector: ChannelSelector::new(),
        quota: QuotaLedger::new(InMemoryQuotaStore::new()),
        health: ChannelHealth::new(
            config.channel_disable_threshold,
            config.automatic_disable_channel_enabled,
            config.automatic_enable_channel_enabled,
        ),
        pricing: PricingRegistry::new(built_in_pricing_tables()),
        billing: BillingLogWriter::new(Arc::new(InMemoryBillingLogStore::new())),
        async_tasks: AsyncTaskBinder::new(Arc::new(InMemoryAsyncTaskStore::new())),
        users: InMemoryUserDirectory::new(seed.users.into_iter().map(|s| (s.user, s.token)).collect()),
        channels: ChannelTable::new(seed.channels),
        config,
    };

    Ok(AppState(Arc::new(inner)))
}

/// Background ticker flushing the Quota Ledger's accumulator on the
/// configured interval (spec §4.4's batched write-back) and sweeping expired
/// async task bindings once a day.
fn spawn_background_tasks(state: AppState) {
    let flush_state = state.clone();
    let interval = Duration::from_secs(flush_state.config.batch_update_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = flush_state.quota.flush().await {
                tracing::error!(error = %e, "periodic quota flush failed");
            }
        }
    });

    let sweep_state = state;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            ticker.tick().await;
            match sweep_state.async_tasks.sweep(sweep_state.config.async_task_retention_days).await {
                Ok(n) if n > 0 => tracing::info!(purged = n, "swept expired async task bindings"),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "async task sweep failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let state = build_state(&args)?;
    spawn_background_tasks(state.clone());

    let app = routes::router(state.clone()).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    tracing::info!(addr = %args.addr, "relay-service listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("draining: flushing quota ledger before exit");
    if let Err(e) = state.quota.flush().await {
        tracing::error!(error = %e, "final quota flush failed during shutdown");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler") };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
