//! `STREAM_RELAY` (spec §4.6): renders the adaptor's [`StreamChunk`]s as
//! OpenAI-style SSE frames and runs `RECONCILE_USAGE -> FINALIZE_QUOTA ->
//! LOG` exactly once, whether the stream ends on `Done`, on the upstream
//! connection closing without one, or on a client disconnect.
//!
//! Built the way the teacher renders its own chat stream: a `.flat_map()`
//! turning one upstream item into zero-or-more SSE events, plus a tail
//! future appended with `.chain()` for the natural-completion path. A real
//! disconnect (spec §5 cancellation contract, §8 scenario 6) means axum/hyper
//! simply stops polling the response body, so that tail future never gets a
//! chance to run — [`FinalizeGuard`]'s `Drop` impl is the other half, firing
//! the same reconcile from whichever side actually happens.

use crate::dto::render_chunk;
use crate::orchestrator::{ChatStream, StreamFinalizer};
use crate::state::AppState;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use relay_core::chat::{ChatMessage, StreamChunk};
use relay_core::usage::Usage;
use relay_core::usage_accountant::ToolInvocation;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Accum {
    usage: Option<Usage>,
    text: String,
    saw_done: bool,
}

/// State the natural-completion tail and the disconnect `Drop` guard both
/// need to run `RECONCILE_USAGE -> FINALIZE_QUOTA -> LOG`. `finalizer` is
/// taken exactly once — whichever side gets there first wins, the other is
/// a no-op.
struct Shared {
    state: AppState,
    finalizer: Mutex<Option<StreamFinalizer>>,
    accum: Arc<Mutex<Accum>>,
    prompt_chars: usize,
    started: Instant,
}

impl Shared {
    async fn finalize(self: Arc<Self>) {
        let finalizer = match self.finalizer.lock().expect("stream finalizer poisoned").take() {
            Some(f) => f,
            None => return,
        };

        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let (final_usage, saw_done) = {
            let guard = self.accum.lock().expect("stream accumulator poisoned");
            let usage = match guard.usage {
                Some(u) if u.total_tokens() > 0 => u,
                _ => Usage::estimate_from_text(self.prompt_chars, &guard.text),
            };
            (usage, guard.saw_done)
        };

        if saw_done || final_usage.total_tokens() > 0 {
            finalizer.finish(&self.state, final_usage, elapsed_ms, Vec::<ToolInvocation>::new()).await;
        } else {
            finalizer.refund(&self.state).await;
        }
    }
}

/// Dropped when the SSE body is dropped — on normal completion that happens
/// after the tail future already consumed `finalizer`, so this is a no-op;
/// on a client disconnect it's the only thing that still runs, so it spawns
/// the same reconcile rather than skipping it.
struct FinalizeGuard(Arc<Shared>);

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if self.0.finalizer.lock().expect("stream finalizer poisoned").is_none() {
            return;
        }
        let shared = self.0.clone();
        tracing::debug!("stream dropped before completion; reconciling quota from disconnect guard");
        tokio::spawn(shared.finalize());
    }
}

/// `Box<dyn Stream>` is `Unpin` regardless of what it wraps, so this can
/// forward `poll_next` straight through `get_mut` without any of the
/// upstream stream's own pinning requirements leaking out here.
struct GuardedStream {
    inner: Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>,
    _guard: FinalizeGuard,
}

impl Stream for GuardedStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

pub fn sse_response(
    state: AppState,
    request_id: String,
    created: i64,
    model: String,
    prompt_chars: usize,
    upstream: ChatStream,
    finalizer: StreamFinalizer,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let accum = Arc::new(Mutex::new(Accum::default()));
    let body_accum = accum.clone();

    let shared = Arc::new(Shared {
        state,
        finalizer: Mutex::new(Some(finalizer)),
        accum,
        prompt_chars,
        started: Instant::now(),
    });
    let tail_shared = shared.clone();

    let body = upstream.flat_map(move |item| {
        let rendered: Vec<String> = match item {
            Ok(chunk) => {
                {
                    let mut guard = body_accum.lock().expect("stream accumulator poisoned");
                    if let StreamChunk::Text(text) = &chunk {
                        guard.text.push_str(text);
                    }
                    if let StreamChunk::Usage(u) = &chunk {
                        guard.usage = Some(*u);
                    }
                    if matches!(chunk, StreamChunk::Done { .. }) {
                        guard.saw_done = true;
                    }
                }
                render_chunk(&request_id, created, &model, &chunk)
                    .and_then(|c| serde_json::to_string(&c).ok())
                    .into_iter()
                    .collect()
            }
            Err(err) => {
                tracing::warn!(error = %err, request_id = %request_id, "stream interrupted mid-relay");
                Vec::new()
            }
        };

        stream::iter(rendered.into_iter().map(|body| Ok(Event::default().data(body))))
    });

    let tail = stream::once(async move {
        tail_shared.finalize().await;
        Ok(Event::default().data("[DONE]"))
    });

    let guarded = GuardedStream { inner: Box::pin(body.chain(tail)), _guard: FinalizeGuard(shared) };

    Sse::new(guarded).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
}

pub fn prompt_chars(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| m.content.len()).sum()
}
