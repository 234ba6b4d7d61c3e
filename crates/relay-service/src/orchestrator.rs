//! Relay Orchestrator (C6, spec §4.6): turns one inbound request into
//! `AUTH -> RESOLVE -> SELECT -> PRE_CONSUME -> CONVERT_REQUEST -> DISPATCH
//! -> {STREAM_RELAY | COLLECT_RESPONSE} -> RECONCILE_USAGE -> FINALIZE_QUOTA
//! -> LOG -> DONE`, with `CLASSIFY -> {LOCAL_RECOVER | REFUND -> FAIL}` on
//! error. A retryable dispatch failure re-enters SELECT with the failing
//! channel excluded, up to `config.retry_times` (SPEC_FULL §11).

use crate::provider_factory::{self, DispatchParams};
use crate::state::AppState;
use chrono::Utc;
use futures::Stream;
use relay_core::adapter::LLMProviderFromHTTP;
use relay_core::chat::{ChatMessage, ChatProvider, ChatResponse, StreamChunk, Tool};
use relay_core::completion::{CompletionProvider, CompletionRequest, CompletionResponse};
use relay_core::embedding::{EmbeddingProvider, EmbeddingResponse};
use relay_core::error::GatewayError;
use relay_core::model::{Channel, ChannelId, ConsumeLog, PricingEntry, ProviderKind, RequestFingerprint, Token, User};
use relay_core::store::UserDirectoryStore;
use relay_core::usage::Usage;
use relay_core::usage_accountant::{estimate_quota, finalize_quota, NormalizedUsage, ToolInvocation};
use std::collections::HashSet;
use std::net::IpAddr;
use std::pin::Pin;
use uuid::Uuid;

#[derive(Clone)]
pub struct AuthContext {
    pub user: User,
    pub token: Token,
}

/// `AUTH` (spec §4.6): verifies the bearer key, token/user liveness, and the
/// caller's address against the token's subnet allowlist.
pub async fn authenticate(state: &AppState, bearer_key: &str, peer_addr: IpAddr) -> Result<AuthContext, GatewayError> {
    let (user, token) = state
        .users
        .resolve_token(bearer_key)
        .await?
        .ok_or_else(|| GatewayError::Auth("unknown token".into()))?;

    if !user.is_usable() {
        return Err(GatewayError::Auth("user disabled or over quota".into()));
    }
    if !token.is_usable(Utc::now()) {
        return Err(GatewayError::Auth("token disabled, expired, or exhausted".into()));
    }
    if !token.permits_addr(peer_addr) {
        return Err(GatewayError::Auth("caller address is outside the token's allowed subnets".into()));
    }

    Ok(AuthContext { user, token })
}

/// Maps a provider to the key its built-in pricing table and Azure/Bedrock
/// credential parsing are registered under. Kept here rather than on
/// `ProviderKind` itself since it's a service-wiring concern, not a domain one.
pub fn provider_kind_label(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAI => "openai",
        ProviderKind::Azure => "azure",
        ProviderKind::Anthropic => "anthropic",
        ProviderKind::Gemini => "gemini",
        ProviderKind::Bedrock => "bedrock",
        ProviderKind::DeepSeek => "deepseek",
    }
}

/// A single chat/completion request, already decoded from its wire DTO.
pub struct ChatRelayRequest {
    pub group: String,
    pub origin_model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Option<Vec<Tool>>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

struct Dispatched {
    provider: LLMProviderFromHTTP,
    channel: Channel,
    actual_model: String,
    pricing: PricingEntry,
    reservation_id: Uuid,
    fingerprint: RequestFingerprint,
}

fn estimate_prompt_tokens(messages: &[ChatMessage]) -> u32 {
    let chars: usize = messages.iter().map(|m| m.content.len()).sum();
    (chars / 4).max(1) as u32
}

/// `RESOLVE -> SELECT -> PRE_CONSUME -> CONVERT_REQUEST`. `excluded` is
/// mutated by the caller's retry loop; a channel that already failed this
/// request is never re-selected even if still enabled.
async fn select_and_prepare(
    state: &AppState,
    auth: &AuthContext,
    req: &ChatRelayRequest,
    is_stream: bool,
    excluded: &HashSet<ChannelId>,
) -> Result<Dispatched, GatewayError> {
    if !auth.token.permits_model(&req.origin_model) {
        return Err(GatewayError::Permission(format!("token not permitted for model {}", req.origin_model)));
    }

    let selection = state.selector.select(&state.abilities, &req.group, &req.origin_model, excluded)?;
    let channel = state.channels.get(selection.channel_id).ok_or_else(|| {
        GatewayError::Internal(format!("ability index referenced unknown channel {}", selection.channel_id))
    })?;

    if let Some(tools) = &req.tools {
        for tool in tools {
            if !channel.tooling.allows(tool.name()) {
                return Err(GatewayError::ToolNotAllowed(tool.name().to_string()));
            }
            if !channel.tooling.pricing.contains_key(tool.name()) {
                return Err(GatewayError::ToolNotPriced(tool.name().to_string()));
            }
        }
    }

    let actual_model = channel.resolve_model(&req.origin_model);
    let channel_type = provider_kind_label(channel.provider);
    let pricing = state.pricing.lookup(&channel, channel_type, &actual_model);

    let declared_tool_costs: Vec<i64> = req
        .tools
        .as_ref()
        .map(|tools| tools.iter().filter_map(|t| channel.tooling.pricing.get(t.name())).map(|p| p.as_quota()).collect())
        .unwrap_or_default();

    let prompt_estimate = estimate_prompt_tokens(&req.messages);
    let configured_max_completion = req.max_tokens.or(pricing.max_tokens).unwrap_or(1024);
    let estimated_quota = estimate_quota(prompt_estimate, configured_max_completion, &pricing, &declared_tool_costs);

    let token_id = if auth.token.unlimited { None } else { Some(auth.token.id) };
    let reservation_id = state.quota.pre_consume(auth.user.id, token_id, estimated_quota).await?;

    let dispatch_params = DispatchParams {
        actual_model: actual_model.clone(),
        is_stream,
        tools: req.tools.clone(),
        max_tokens: req.max_tokens,
        temperature: req.temperature,
    };
    let provider = match provider_factory::build_provider(&channel, &dispatch_params) {
        Ok(p) => p,
        Err(e) => {
            state.quota.refund(reservation_id).await.ok();
            return Err(e);
        }
    };

    let fingerprint = RequestFingerprint {
        user_id: auth.user.id,
        token_id: auth.token.id,
        group: req.group.clone(),
        origin_model: req.origin_model.clone(),
        actual_model: actual_model.clone(),
        channel_id: channel.id,
        is_stream,
        request_id: Uuid::new_v4().to_string(),
        trace_id: Uuid::new_v4().to_string(),
        start_ts: Utc::now(),
    };

    Ok(Dispatched { provider, channel, actual_model, pricing, reservation_id, fingerprint })
}

/// `RECONCILE_USAGE -> FINALIZE_QUOTA -> LOG` for a non-streaming response.
async fn finalize_success(
    state: &AppState,
    auth: &AuthContext,
    dispatched: &Dispatched,
    usage: Option<Usage>,
    elapsed_ms: u64,
) -> Result<(), GatewayError> {
    let usage = usage.unwrap_or_default();
    let normalized = NormalizedUsage::from_provider_usage(&usage, Vec::new());
    let actual_quota = finalize_quota(&normalized, &dispatched.pricing);

    state.quota.finalize(dispatched.reservation_id, actual_quota).await?;
    state.quota.record_channel_usage(dispatched.channel.id, actual_quota);
    state.health.record_success(dispatched.channel.id);

    if state.config.log_consume_enabled {
        state
            .billing
            .append(ConsumeLog {
                id: 0,
                user_id: auth.user.id,
                username: auth.user.username.clone(),
                created_at: Utc::now(),
                model_name: dispatched.actual_model.clone(),
                token_name: auth.token.id.to_string(),
                channel_id: dispatched.channel.id,
                quota: actual_quota,
                prompt_tokens: normalized.prompt_tokens,
                completion_tokens: normalized.completion_tokens,
                cached_prompt_tokens: normalized.cached_prompt_tokens,
                cached_completion_tokens: normalized.cached_completion_tokens,
                elapsed_ms,
                is_stream: dispatched.fingerprint.is_stream,
                request_id: dispatched.fingerprint.request_id.clone(),
                trace_id: dispatched.fingerprint.trace_id.clone(),
                metadata: serde_json::json!({
                    "cache_write_5m": normalized.cache_write_5m,
                    "cache_write_1h": normalized.cache_write_1h,
                    "usage_estimated": usage.estimated,
                }),
            })
            .await;
    }

    Ok(())
}

/// `CLASSIFY -> {LOCAL_RECOVER | REFUND -> FAIL}`: refunds the reservation
/// and, only for `ChannelFault`, counts the failure toward auto-disable
/// (spec §4.8 — `UpstreamTransient` never counts against a channel).
async fn handle_dispatch_failure(state: &AppState, dispatched: &Dispatched, err: &GatewayError) {
    state.quota.refund(dispatched.reservation_id).await.ok();
    if matches!(err, GatewayError::ChannelFault(_)) {
        if state.health.record_fault(dispatched.channel.id) == relay_core::health::HealthTransition::AutoDisabled {
            auto_disable_channel(state, dispatched.channel.id);
        }
    }
}

/// Flips a channel to `AutoDisabled` in the channel table and rebuilds the
/// Ability Index so SELECT stops handing it out (spec §4.8).
fn auto_disable_channel(state: &AppState, channel_id: ChannelId) {
    if let Some(mut channel) = state.channels.get(channel_id) {
        channel.status = relay_core::model::ChannelStatus::AutoDisabled;
        state.channels.upsert(channel);
        state.abilities.rebuild(&state.channels.all());
    }
}

/// Full non-streaming chat relay.
pub async fn relay_chat(
    state: &AppState,
    auth: &AuthContext,
    req: ChatRelayRequest,
) -> Result<(Box<dyn ChatResponse>, RequestFingerprint), GatewayError> {
    let mut excluded = HashSet::new();
    let attempts = state.config.retry_times + 1;
    let mut last_err = None;

    for _ in 0..attempts {
        let dispatched = match select_and_prepare(state, auth, &req, false, &excluded).await {
            Ok(d) => d,
            Err(e) => {
                last_err = Some(e);
                break;
            }
        };

        let start = std::time::Instant::now();
        match dispatched.provider.chat_with_tools(&req.messages, req.tools.as_deref()).await {
            Ok(response) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                finalize_success(state, auth, &dispatched, response.usage(), elapsed_ms).await?;
                return Ok((response, dispatched.fingerprint));
            }
            Err(err) => {
                handle_dispatch_failure(state, &dispatched, &err).await;
                excluded.insert(dispatched.channel.id);
                let retryable = err.is_retryable();
                last_err = Some(err);
                if !retryable {
                    break;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| GatewayError::Internal("relay loop exited without a result".into())))
}

/// Legacy `/v1/completions` relay: reuses the chat dispatch path (the same
/// channel/pricing/tooling machinery applies) but converts via
/// `CompletionProvider::complete`.
pub async fn relay_completion(
    state: &AppState,
    auth: &AuthContext,
    group: &str,
    request: CompletionRequest,
) -> Result<(CompletionResponse, RequestFingerprint), GatewayError> {
    let chat_req = ChatRelayRequest {
        group: group.to_string(),
        origin_model: request.model.clone(),
        messages: vec![ChatMessage::user(request.prompt.clone())],
        tools: None,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    };

    let mut excluded = HashSet::new();
    let attempts = state.config.retry_times + 1;
    let mut last_err = None;

    for _ in 0..attempts {
        let dispatched = match select_and_prepare(state, auth, &chat_req, false, &excluded).await {
            Ok(d) => d,
            Err(e) => {
                last_err = Some(e);
                break;
            }
        };

        let mut wire_request = request.clone();
        wire_request.model = dispatched.actual_model.clone();

        let start = std::time::Instant::now();
        match dispatched.provider.complete(&wire_request).await {
            Ok(response) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let usage = response.usage();
                finalize_success(state, auth, &dispatched, usage, elapsed_ms).await?;
                return Ok((response, dispatched.fingerprint));
            }
            Err(err) => {
                handle_dispatch_failure(state, &dispatched, &err).await;
                excluded.insert(dispatched.channel.id);
                let retryable = err.is_retryable();
                last_err = Some(err);
                if !retryable {
                    break;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| GatewayError::Internal("relay loop exited without a result".into())))
}

/// `/v1/embeddings` relay. No streaming surface exists for embeddings, so
/// this is COLLECT_RESPONSE-only.
pub async fn relay_embeddings(
    state: &AppState,
    auth: &AuthContext,
    group: &str,
    origin_model: &str,
    inputs: Vec<String>,
) -> Result<(EmbeddingResponse, RequestFingerprint), GatewayError> {
    if !auth.token.permits_model(origin_model) {
        return Err(GatewayError::Permission(format!("token not permitted for model {origin_model}")));
    }

    let mut excluded = HashSet::new();
    let attempts = state.config.retry_times + 1;
    let mut last_err = None;

    for _ in 0..attempts {
        let selection = match state.selector.select(&state.abilities, group, origin_model, &excluded) {
            Ok(s) => s,
            Err(e) => {
                last_err = Some(e);
                break;
            }
        };
        let channel = state.channels.get(selection.channel_id).ok_or_else(|| {
            GatewayError::Internal(format!("ability index referenced unknown channel {}", selection.channel_id))
        })?;

        let actual_model = channel.resolve_model(origin_model);
        let channel_type = provider_kind_label(channel.provider);
        let pricing = state.pricing.lookup(&channel, channel_type, &actual_model);

        let prompt_estimate = (inputs.iter().map(|s| s.len()).sum::<usize>() / 4).max(1) as u32;
        let estimated_quota = estimate_quota(prompt_estimate, 0, &pricing, &[]);
        let token_id = if auth.token.unlimited { None } else { Some(auth.token.id) };
        let reservation_id = state.quota.pre_consume(auth.user.id, token_id, estimated_quota).await?;

        let dispatch_params = DispatchParams {
            actual_model: actual_model.clone(),
            is_stream: false,
            tools: None,
            max_tokens: None,
            temperature: None,
        };
        let provider = match provider_factory::build_provider(&channel, &dispatch_params) {
            Ok(p) => p,
            Err(e) => {
                state.quota.refund(reservation_id).await.ok();
                return Err(e);
            }
        };

        let fingerprint = RequestFingerprint {
            user_id: auth.user.id,
            token_id: auth.token.id,
            group: group.to_string(),
            origin_model: origin_model.to_string(),
            actual_model: actual_model.clone(),
            channel_id: channel.id,
            is_stream: false,
            request_id: Uuid::new_v4().to_string(),
            trace_id: Uuid::new_v4().to_string(),
            start_ts: Utc::now(),
        };

        let start = std::time::Instant::now();
        match provider.embed(inputs.clone()).await {
            Ok(response) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let usage = response.usage.unwrap_or_default();
                let normalized = NormalizedUsage::from_provider_usage(&usage, Vec::new());
                let actual_quota = finalize_quota(&normalized, &pricing);

                state.quota.finalize(reservation_id, actual_quota).await?;
                state.quota.record_channel_usage(channel.id, actual_quota);
                state.health.record_success(channel.id);

                if state.config.log_consume_enabled {
                    state
                        .billing
                        .append(ConsumeLog {
                            id: 0,
                            user_id: auth.user.id,
                            username: auth.user.username.clone(),
                            created_at: Utc::now(),
                            model_name: actual_model.clone(),
                            token_name: auth.token.id.to_string(),
                            channel_id: channel.id,
                            quota: actual_quota,
                            prompt_tokens: normalized.prompt_tokens,
                            completion_tokens: normalized.completion_tokens,
                            cached_prompt_tokens: normalized.cached_prompt_tokens,
                            cached_completion_tokens: normalized.cached_completion_tokens,
                            elapsed_ms,
                            is_stream: false,
                            request_id: fingerprint.request_id.clone(),
                            trace_id: fingerprint.trace_id.clone(),
                            metadata: serde_json::json!({ "usage_estimated": usage.estimated }),
                        })
                        .await;
                }

                return Ok((response, fingerprint));
            }
            Err(err) => {
                state.quota.refund(reservation_id).await.ok();
                if matches!(err, GatewayError::ChannelFault(_))
                    && state.health.record_fault(channel.id) == relay_core::health::HealthTransition::AutoDisabled
                {
                    auto_disable_channel(state, channel.id);
                }
                excluded.insert(channel.id);
                let retryable = err.is_retryable();
                last_err = Some(err);
                if !retryable {
                    break;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| GatewayError::Internal("relay loop exited without a result".into())))
}

/// Carries everything `STREAM_RELAY`'s consumer (`stream.rs`) needs to run
/// `RECONCILE_USAGE -> FINALIZE_QUOTA -> LOG` once the stream terminates —
/// on `Done`, on upstream close, or on client disconnect (spec §4.6).
pub struct StreamFinalizer {
    auth: AuthContext,
    channel_id: ChannelId,
    actual_model: String,
    pricing: PricingEntry,
    reservation_id: Uuid,
    pub fingerprint: RequestFingerprint,
}

impl StreamFinalizer {
    pub async fn finish(self, state: &AppState, usage: Usage, elapsed_ms: u64, tool_invocations: Vec<ToolInvocation>) {
        let normalized = NormalizedUsage::from_provider_usage(&usage, tool_invocations);
        let actual_quota = finalize_quota(&normalized, &self.pricing);

        if let Err(e) = state.quota.finalize(self.reservation_id, actual_quota).await {
            tracing::error!(error = %e, reservation_id = %self.reservation_id, "failed to finalize streaming reservation");
            return;
        }
        state.quota.record_channel_usage(self.channel_id, actual_quota);
        state.health.record_success(self.channel_id);

        if state.config.log_consume_enabled {
            state
                .billing
                .append(ConsumeLog {
                    id: 0,
                    user_id: self.auth.user.id,
                    username: self.auth.user.username.clone(),
                    created_at: Utc::now(),
                    model_name: self.actual_model.clone(),
                    token_name: self.auth.token.id.to_string(),
                    channel_id: self.channel_id,
                    quota: actual_quota,
                    prompt_tokens: normalized.prompt_tokens,
                    completion_tokens: normalized.completion_tokens,
                    cached_prompt_tokens: normalized.cached_prompt_tokens,
                    cached_completion_tokens: normalized.cached_completion_tokens,
                    elapsed_ms,
                    is_stream: true,
                    request_id: self.fingerprint.request_id.clone(),
                    trace_id: self.fingerprint.trace_id.clone(),
                    metadata: serde_json::json!({
                        "cache_write_5m": normalized.cache_write_5m,
                        "cache_write_1h": normalized.cache_write_1h,
                        "usage_estimated": usage.estimated,
                    }),
                })
                .await;
        }
    }

    /// A stream that never produced a single byte (e.g. the client vanished
    /// before DISPATCH returned) — refund in full, no log line (spec §7
    /// `Canceled`: "no log if no quota was moved").
    pub async fn refund(self, state: &AppState) {
        state.quota.refund(self.reservation_id).await.ok();
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, GatewayError>> + Send>>;

/// Full streaming chat relay: returns the adaptor's raw `StreamChunk` stream
/// plus a [`StreamFinalizer`] the caller must `finish`/`refund` once the
/// stream ends.
pub async fn relay_chat_stream(
    state: &AppState,
    auth: &AuthContext,
    req: ChatRelayRequest,
) -> Result<(ChatStream, StreamFinalizer), GatewayError> {
    let mut excluded = HashSet::new();
    let attempts = state.config.retry_times + 1;
    let mut last_err = None;

    for _ in 0..attempts {
        let dispatched = match select_and_prepare(state, auth, &req, true, &excluded).await {
            Ok(d) => d,
            Err(e) => {
                last_err = Some(e);
                break;
            }
        };

        match dispatched.provider.chat_stream_with_tools(&req.messages, req.tools.as_deref()).await {
            Ok(stream) => {
                let finalizer = StreamFinalizer {
                    auth: auth.clone(),
                    channel_id: dispatched.channel.id,
                    actual_model: dispatched.actual_model,
                    pricing: dispatched.pricing,
                    reservation_id: dispatched.reservation_id,
                    fingerprint: dispatched.fingerprint,
                };
                return Ok((stream, finalizer));
            }
            Err(err) => {
                handle_dispatch_failure(state, &dispatched, &err).await;
                excluded.insert(dispatched.channel.id);
                let retryable = err.is_retryable();
                last_err = Some(err);
                if !retryable {
                    break;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| GatewayError::Internal("relay loop exited without a result".into())))
}
