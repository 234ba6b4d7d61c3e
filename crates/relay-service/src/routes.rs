//! HTTP front door (spec §6). Route handlers decode the OpenAI-compatible
//! wire format, hand off to [`crate::orchestrator`], and re-encode the
//! result — no business logic lives here.

use crate::dto::{
    ChatCompletionRequest, ChatCompletionResponse, EmbeddingsRequest, EmbeddingsResponse, ErrorBody,
    LegacyCompletionRequest, LegacyCompletionResponse,
};
use crate::orchestrator::{self, AuthContext, ChatRelayRequest};
use crate::state::AppState;
use crate::stream;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{Duration, NaiveDate, NaiveTime};
use relay_core::completion::CompletionRequest;
use relay_core::error::GatewayError;
use relay_core::model::{Channel, ChannelId, UserId};
use serde_json::json;
use std::net::IpAddr;
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(legacy_completions))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/models", get(list_models))
        .route("/v1/images/generations", post(not_implemented))
        .route("/v1/audio/speech", post(not_implemented))
        .route("/v1/audio/transcriptions", post(not_implemented))
        .route("/v1/videos/generations", post(not_implemented))
        .route("/api/channel/:id", get(get_channel))
        .route("/api/channel/", put(upsert_channel))
        .route("/api/channel/test/:id", post(test_channel))
        .route("/api/channel/default-pricing", get(default_pricing))
        .route("/api/channel/metadata", get(channel_metadata))
        .route("/api/channel/models", get(channel_model_list))
        .route("/api/models", get(list_models))
        .route("/api/user/dashboard", get(user_dashboard))
        .with_state(state)
}

fn peer_addr(headers: &HeaderMap) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

fn bearer_key(headers: &HeaderMap) -> Result<String, GatewayError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Auth("missing bearer token".into()))
}

/// Groups currently resolve 1:1 from the caller's own `user.group` (spec §3
/// defines `group` as a `User` field; there is no separate per-request group
/// override surface in scope here).
fn group_for(auth: &AuthContext) -> String {
    auth.user.group.clone()
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, GatewayError> {
    let key = bearer_key(headers)?;
    orchestrator::authenticate(state, &key, peer_addr(headers)).await
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatCompletionRequest>,
) -> Response {
    let auth = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };

    let group = group_for(&auth);
    let messages: Vec<_> = req.messages.into_iter().map(Into::into).collect();
    let prompt_chars = stream::prompt_chars(&messages);
    let relay_req = ChatRelayRequest {
        group,
        origin_model: req.model.clone(),
        messages,
        tools: req.tools,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
    };

    if req.stream {
        match orchestrator::relay_chat_stream(&state, &auth, relay_req).await {
            Ok((upstream, finalizer)) => {
                let request_id = format!("chatcmpl-{}", Uuid::new_v4());
                stream::sse_response(state, request_id, now_unix(), req.model, prompt_chars, upstream, finalizer)
                    .into_response()
            }
            Err(e) => e.into_response(),
        }
    } else {
        match orchestrator::relay_chat(&state, &auth, relay_req).await {
            Ok((response, fingerprint)) => {
                Json(ChatCompletionResponse::from_provider(fingerprint.request_id, now_unix(), fingerprint.actual_model, response.as_ref()))
                    .into_response()
            }
            Err(e) => e.into_response(),
        }
    }
}

async fn legacy_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LegacyCompletionRequest>,
) -> Response {
    let auth = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };
    let group = group_for(&auth);

    let wire = CompletionRequest::new(&req.model, &req.prompt);
    let wire = CompletionRequest { max_tokens: req.max_tokens, temperature: req.temperature, stream: req.stream, ..wire };

    match orchestrator::relay_completion(&state, &auth, &group, wire).await {
        Ok((response, fingerprint)) => {
            Json(LegacyCompletionResponse::from_provider(fingerprint.request_id, now_unix(), fingerprint.actual_model, &response))
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EmbeddingsRequest>,
) -> Response {
    let auth = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };
    let group = group_for(&auth);
    let model = req.model.clone();

    match orchestrator::relay_embeddings(&state, &auth, &group, &req.model, req.input.into_vec()).await {
        Ok((response, _fingerprint)) => Json(EmbeddingsResponse::from_provider(model, response)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /v1/models` (spec §6): the union of every registered channel's
/// `model_set`, deduplicated. No per-model capability metadata beyond name —
/// clients needing pricing detail use `/api/channel/default-pricing`.
async fn list_models(State(state): State<AppState>) -> Response {
    let mut models: Vec<String> =
        state.channels.all().into_iter().filter(|c| c.status.is_enabled()).flat_map(|c| c.model_set).collect();
    models.sort();
    models.dedup();

    Json(json!({
        "object": "list",
        "data": models.into_iter().map(|id| json!({"id": id, "object": "model"})).collect::<Vec<_>>(),
    }))
    .into_response()
}

async fn get_channel(State(state): State<AppState>, Path(id): Path<ChannelId>) -> Response {
    match state.channels.get(id) {
        Some(channel) => Json(json!({"success": true, "data": redact(channel)})).into_response(),
        None => GatewayError::Internal(format!("no such channel {id}")).into_response(),
    }
}

async fn upsert_channel(State(state): State<AppState>, Json(channel): Json<Channel>) -> Response {
    state.channels.upsert(channel);
    state.abilities.rebuild(&state.channels.all());
    Json(json!({"success": true})).into_response()
}

/// `POST /api/channel/test/:id` (spec §6): dispatches a minimal
/// `chat_with_tools` call against the live channel and feeds the result into
/// the Channel Health state machine the same way a production request would.
async fn test_channel(State(state): State<AppState>, Path(id): Path<ChannelId>) -> Response {
    let channel = match state.channels.get(id) {
        Some(c) => c,
        None => return GatewayError::Internal(format!("no such channel {id}")).into_response(),
    };

    let probe_model = channel.model_set.first().cloned().unwrap_or_else(|| "gpt-4o-mini".to_string());
    let params = crate::provider_factory::DispatchParams {
        actual_model: probe_model,
        is_stream: false,
        tools: None,
        max_tokens: Some(1),
        temperature: None,
    };

    let passed = match crate::provider_factory::build_provider(&channel, &params) {
        Ok(provider) => {
            use relay_core::chat::{ChatMessage, ChatProvider};
            provider.chat_with_tools(&[ChatMessage::user("ping")], None).await.is_ok()
        }
        Err(_) => false,
    };

    let transition = state.health.record_test_result(id, passed);
    if transition == relay_core::health::HealthTransition::Reenabled {
        if let Some(mut c) = state.channels.get(id) {
            c.status = relay_core::model::ChannelStatus::Enabled;
            state.channels.upsert(c);
            state.abilities.rebuild(&state.channels.all());
        }
    } else if transition == relay_core::health::HealthTransition::AutoDisabled {
        if let Some(mut c) = state.channels.get(id) {
            c.status = relay_core::model::ChannelStatus::AutoDisabled;
            state.channels.upsert(c);
            state.abilities.rebuild(&state.channels.all());
        }
    }

    Json(json!({"success": passed})).into_response()
}

#[derive(serde::Deserialize)]
struct ChannelTypeQuery {
    #[serde(rename = "type")]
    channel_type: String,
}

async fn default_pricing(State(state): State<AppState>, Query(q): Query<ChannelTypeQuery>) -> Response {
    Json(json!({"success": true, "data": state.pricing.list_for_channel(&q.channel_type)})).into_response()
}

async fn channel_metadata(Query(q): Query<ChannelTypeQuery>) -> Response {
    Json(json!({"success": true, "data": {"type": q.channel_type}})).into_response()
}

async fn channel_model_list(State(state): State<AppState>) -> Response {
    let mut models: Vec<String> = state.channels.all().into_iter().flat_map(|c| c.model_set).collect();
    models.sort();
    models.dedup();
    Json(json!({"success": true, "data": models})).into_response()
}

#[derive(serde::Deserialize)]
struct DashboardQuery {
    from_date: String,
    to_date: String,
    /// A specific user id, or `all` (root only). Non-root callers are always
    /// scoped to their own `user_id` regardless of what's passed here.
    user_id: Option<String>,
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { success: false, message: message.into() })).into_response()
}

/// `root` is the only group with the broadened 365-day cap and the ability
/// to look across users (spec §6 is silent on which role gates this; `group`
/// is the only role-like field `User` carries today, so `"root"` is read the
/// same way `group_for` already reads it elsewhere).
fn is_root(auth: &AuthContext) -> bool {
    auth.user.group == "root"
}

/// `GET /api/user/dashboard` (spec §6, §8 scenario 8): usage grouped by
/// billing day over the half-open range `[from_date 00:00:00Z, to_date+1day
/// 00:00:00Z)`, capped at 7 days for ordinary users and 365 for `root`.
async fn user_dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<DashboardQuery>,
) -> Response {
    let auth = match authenticate(&state, &headers).await {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };

    let from_date = match NaiveDate::parse_from_str(&q.from_date, "%Y-%m-%d") {
        Ok(d) => d,
        Err(_) => return bad_request("from_date must be YYYY-MM-DD"),
    };
    let to_date = match NaiveDate::parse_from_str(&q.to_date, "%Y-%m-%d") {
        Ok(d) => d,
        Err(_) => return bad_request("to_date must be YYYY-MM-DD"),
    };

    let span_days = (to_date - from_date).num_days() + 1;
    if span_days < 1 {
        return bad_request("to_date must not precede from_date");
    }
    let root = is_root(&auth);
    let max_days = if root { 365 } else { 7 };
    if span_days > max_days {
        return bad_request(format!("range spans {span_days} days, max {max_days} for this account"));
    }

    let target_user: Option<UserId> = if root {
        match q.user_id.as_deref() {
            None | Some("all") => None,
            Some(raw) => match raw.parse() {
                Ok(id) => Some(id),
                Err(_) => return bad_request("user_id must be an integer or \"all\""),
            },
        }
    } else {
        Some(auth.user.id)
    };

    let from = from_date.and_time(NaiveTime::MIN).and_utc();
    let to = (to_date + Duration::days(1)).and_time(NaiveTime::MIN).and_utc();

    let days = match state.billing.daily_usage(from, to, target_user).await {
        Ok(days) => days,
        Err(e) => return e.into_response(),
    };

    let totals = days.iter().fold((0i64, 0u64, 0u64, 0u64), |(quota, requests, prompt, completion), d| {
        (quota + d.quota, requests + d.request_count, prompt + d.prompt_tokens, completion + d.completion_tokens)
    });

    Json(json!({
        "success": true,
        "data": {
            "from_date": q.from_date,
            "to_date": q.to_date,
            "user_id": target_user,
            "days": days,
            "totals": {
                "quota": totals.0,
                "request_count": totals.1,
                "prompt_tokens": totals.2,
                "completion_tokens": totals.3,
            },
        },
    }))
    .into_response()
}

async fn not_implemented() -> Response {
    (StatusCode::NOT_IMPLEMENTED, Json(ErrorBody { success: false, message: "surface not implemented in this deployment".into() }))
        .into_response()
}

/// Never echoes `channel.key` back over the wire.
fn redact(mut channel: Channel) -> Channel {
    channel.key = "***".to_string();
    channel
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.insert(axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(), v.parse().unwrap());
        }
        headers
    }

    #[test]
    fn peer_addr_reads_first_forwarded_for_entry() {
        let headers = headers_with(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(peer_addr(&headers), IpAddr::from([203, 0, 113, 7]));
    }

    #[test]
    fn peer_addr_defaults_to_loopback_without_header() {
        let headers = HeaderMap::new();
        assert_eq!(peer_addr(&headers), IpAddr::from([127, 0, 0, 1]));
    }

    #[test]
    fn bearer_key_strips_prefix() {
        let headers = headers_with(&[("authorization", "Bearer sk-abc123")]);
        assert_eq!(bearer_key(&headers).unwrap(), "sk-abc123");
    }

    #[test]
    fn bearer_key_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(bearer_key(&headers).is_err());
    }

    #[test]
    fn redact_blanks_channel_key() {
        let channel = Channel { key: "super-secret".to_string(), ..test_channel_fixture() };
        assert_eq!(redact(channel).key, "***");
    }

    fn test_channel_fixture() -> Channel {
        Channel {
            id: 1,
            name: "test".into(),
            provider: relay_core::model::ProviderKind::OpenAI,
            key: String::new(),
            base_url: None,
            model_set: vec!["gpt-4o-mini".into()],
            model_mapping: Default::default(),
            model_configs: Default::default(),
            tooling: Default::default(),
            group_set: vec!["default".into()],
            status: relay_core::model::ChannelStatus::Enabled,
            weight: 1,
            priority: 0,
        }
    }
}
