// OpenAI chat completions handler
use super::*;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderName, HeaderValue};
use axum::response::Response;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;

use keyrelay_types::protocol::{ChatCompletionRequest, ChatCompletionResponse};
use keyrelay_types::{GatewayError, StreamingMode};

use crate::proxy::mappers::openai::{
    adaptive_max_tokens, build_upstream_request, create_fake_sse_stream, create_openai_sse_stream, resolve_model,
    transform_completion, CompletionHook, ResolvedModel, SseStream,
};
use crate::proxy::retry::RequestContext;
use crate::proxy::upstream::ReplyBody;

const KEY_HEADER: HeaderName = HeaderName::from_static("x-keyrelay-key");
const ATTEMPTS_HEADER: HeaderName = HeaderName::from_static("x-keyrelay-attempts");

/// How one request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Json,
    FakeStream,
    RealStream,
}

impl Delivery {
    fn choose(stream: bool, mode: StreamingMode, model: &ResolvedModel) -> Self {
        match (stream, mode) {
            (false, _) => Self::Json,
            _ if model.force_fake_stream => Self::FakeStream,
            (true, StreamingMode::Fake) => Self::FakeStream,
            (true, StreamingMode::Real) => Self::RealStream,
        }
    }
}

pub async fn handle_chat_completions(
    State(state): State<AppState>,
    body: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(mut request) = body.map_err(|e| GatewayError::InvalidRequest { message: e.body_text() })?;
    validate(&request)?;

    let (resolved, delivery, heartbeat) = {
        let config = state.config.read().await;
        let resolved = resolve_model(
            &request.model,
            &config.streaming.fake_stream_prefix,
            &config.upstream.model_mapping,
        );
        let delivery = Delivery::choose(request.stream, config.streaming.mode, &resolved);
        let upstream_config = &config.upstream;
        if let Some(target) = adaptive_max_tokens(
            upstream_config.max_tokens_mode,
            &resolved.upstream,
            &upstream_config.model_limits,
        ) {
            debug!(
                "Max tokens {} for {}: {:?} -> {}",
                upstream_config.max_tokens_mode, resolved.upstream, request.max_tokens, target
            );
            request.max_tokens = Some(target);
        }
        (resolved, delivery, Duration::from_millis(config.streaming.heartbeat_interval_ms))
    };

    let upstream_stream = delivery == Delivery::RealStream;
    let upstream_body = build_upstream_request(&request, &resolved, upstream_stream);
    let mut ctx = RequestContext::new(resolved.requested.clone(), upstream_stream);

    info!(
        "[{}] Chat request model={} upstream_model={} messages={} delivery={:?}",
        ctx.trace_id,
        resolved.requested,
        resolved.upstream,
        request.messages.len(),
        delivery
    );

    match delivery {
        Delivery::Json => {
            let (response, served) = complete_and_record(&state, &mut ctx, &upstream_body).await?;
            let mut http = Json(response).into_response();
            annotate(&mut http, &served);
            Ok(http)
        },
        Delivery::FakeStream => {
            let model = resolved.requested.clone();
            let call_state = state.clone();
            let call = async move {
                complete_and_record(&call_state, &mut ctx, &upstream_body)
                    .await
                    .map(|(response, _)| response)
            };
            Ok(sse_response(create_fake_sse_stream(call, model, heartbeat)))
        },
        Delivery::RealStream => {
            let dispatched = match state.orchestrator.execute(&mut ctx, &upstream_body).await {
                Ok(dispatched) => dispatched,
                Err(err) => {
                    state.usage.record_usage(&ctx.model, false, None).await;
                    return Err(err.into());
                },
            };
            let model = resolved.requested.clone();
            let served =
                Served { key: dispatched.credential.masked(), attempts: dispatched.attempts };

            let stream = match dispatched.reply.body {
                ReplyBody::Stream(upstream) => {
                    create_openai_sse_stream(upstream, model, usage_hook(&state, &ctx.model))
                },
                ReplyBody::Complete(bytes) => {
                    // Upstream answered with a single body despite stream=true
                    debug!("[{}] Upstream returned a complete body, replaying as SSE", ctx.trace_id);
                    let result = transform_completion(&bytes, &model);
                    let usage = Arc::clone(&state.usage);
                    let usage_model = ctx.model.clone();
                    let call = async move {
                        usage
                            .record_usage(
                                &usage_model,
                                result.is_ok(),
                                result.as_ref().ok().and_then(|r| r.usage.as_ref()),
                            )
                            .await;
                        result
                    };
                    create_fake_sse_stream(call, model, heartbeat)
                },
            };

            let mut http = sse_response(stream);
            annotate(&mut http, &served);
            Ok(http)
        },
    }
}

fn validate(request: &ChatCompletionRequest) -> Result<(), GatewayError> {
    if request.model.trim().is_empty() {
        return Err(GatewayError::InvalidRequest { message: "model is required".to_string() });
    }
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest {
            message: "messages must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Which key answered and after how many calls.
struct Served {
    key: String,
    attempts: u32,
}

/// Run the retry loop, map the reply and record daily usage for the outcome.
async fn complete_and_record(
    state: &AppState,
    ctx: &mut RequestContext,
    body: &Value,
) -> Result<(ChatCompletionResponse, Served), GatewayError> {
    let outcome = complete(state, ctx, body).await;
    let usage = outcome.as_ref().ok().and_then(|(response, _)| response.usage.as_ref());
    state.usage.record_usage(&ctx.model, outcome.is_ok(), usage).await;
    outcome
}

async fn complete(
    state: &AppState,
    ctx: &mut RequestContext,
    body: &Value,
) -> Result<(ChatCompletionResponse, Served), GatewayError> {
    let dispatched = state.orchestrator.execute(ctx, body).await?;
    let served = Served { key: dispatched.credential.masked(), attempts: dispatched.attempts };
    let bytes = dispatched
        .reply
        .into_bytes()
        .await
        .map_err(|e| GatewayError::UpstreamFatal { status: None, message: e.to_string() })?;
    let response = transform_completion(&bytes, &ctx.model)?;
    info!(
        "[{}] Completed model={} key={} attempts={}",
        ctx.trace_id, ctx.model, served.key, served.attempts
    );
    Ok((response, served))
}

fn usage_hook(state: &AppState, model: &str) -> CompletionHook {
    let usage = Arc::clone(&state.usage);
    let model = model.to_string();
    Box::new(move |success, tokens| {
        async move {
            usage.record_usage(&model, success, tokens.as_ref()).await;
        }
        .boxed()
    })
}

fn sse_response(stream: SseStream) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

fn annotate(response: &mut Response, served: &Served) {
    insert_header(response, KEY_HEADER, &served.key);
    insert_header(response, ATTEMPTS_HEADER, &served.attempts.to_string());
}

fn insert_header(response: &mut Response, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}
