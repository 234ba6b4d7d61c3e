//! Core domain types and components for the gateway: everything the
//! orchestrator in `relay-service` and the provider adaptor crates share.
//!
//! Modules are organized by the spec's component boundaries (C1-C10) plus
//! the wire-level traits (`chat`, `completion`, `embedding`, `adapter`)
//! inherited from the provider-adaptor pattern.

/// Error types shared across the whole gateway.
pub mod error;

/// Chat-completions request/response/streaming types and provider traits.
pub mod chat;
/// Legacy text-completion request/response types and provider traits.
pub mod completion;
/// Embedding request/response types and provider traits.
pub mod embedding;
/// Token/cache usage accounting shared by every provider response shape.
pub mod usage;

/// Bridges a synchronous wire-format builder (`HTTPChatProvider` et al.)
/// into the async `ChatProvider`/`CompletionProvider`/`EmbeddingProvider`
/// traits that the orchestrator calls.
pub mod adapter;
/// Outbound HTTP dispatch shared by every adaptor.
pub mod outbound;

/// Domain model: users, tokens, channels, abilities, pricing, billing logs.
pub mod model;

/// C1 Pricing Registry.
pub mod pricing;
/// C2 Ability Index.
pub mod ability;
/// C3 Channel Selector.
pub mod selector;
/// C4 Quota Ledger.
pub mod quota;
/// C7 Usage Accountant.
pub mod usage_accountant;
/// C8 Channel Health.
pub mod health;
/// C9 Async Task Binder.
pub mod async_task;
/// C10 Billing Log Writer.
pub mod billing_log;

/// Storage traits plus in-memory and SQLite-backed implementations.
pub mod store;

/// Day-bucketed usage reporting for the admin dashboard (spec §6/§9).
pub mod reporting;

/// Gateway-wide configuration (SPEC_FULL §10.3).
pub mod config;

pub use error::GatewayError;
