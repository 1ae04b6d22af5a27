//! HTTP request handlers.

use axum::{
    body::{Body, Bytes},
    extract::{Extension, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::orchestrator::{GatewayFailure, GatewaySuccess};
use super::server::{AppState, RequestId};
use crate::error::Error;
use crate::mapper::{anthropic_to_openai, StreamReframer};
use crate::registry::ResponseFormat;
use crate::storage::logging::{spawn_log_write, RequestLog};

/// Request header carrying the caller's organization id (authentication
/// itself happens upstream of this core).
pub const ORG_HEADER: &str = "x-switchboard-org";

/// Response header: correlation ID (UUID v4).
pub const REQUEST_ID_HEADER: &str = "x-switchboard-request-id";
/// Response header: provider that served the request.
pub const PROVIDER_HEADER: &str = "x-switchboard-provider";
/// Response header: logical model that was served.
pub const MODEL_HEADER: &str = "x-switchboard-model";
/// Response header: credential strategy used ("byok" or "ptb").
pub const AUTH_HEADER: &str = "x-switchboard-auth";
/// Response header: present with value "true" on streaming responses.
pub const STREAMING_HEADER: &str = "x-switchboard-streaming";

/// Attach gateway metadata headers to a response.
fn attach_gateway_headers(
    response: &mut Response,
    request_id: &str,
    routed: Option<(&str, &str, &str)>,
    is_streaming: bool,
) {
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static(REQUEST_ID_HEADER),
        HeaderValue::from_str(request_id).unwrap(),
    );
    if is_streaming {
        headers.insert(
            HeaderName::from_static(STREAMING_HEADER),
            HeaderValue::from_static("true"),
        );
    }
    if let Some((provider, model, auth)) = routed {
        for (name, value) in [
            (HeaderName::from_static(PROVIDER_HEADER), provider),
            (HeaderName::from_static(MODEL_HEADER), model),
            (HeaderName::from_static(AUTH_HEADER), auth),
        ] {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
    }
}

/// Handle POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    raw_body: Bytes,
) -> Response {
    let start = std::time::Instant::now();
    let correlation_id = request_id.0.to_string();

    // Validation gates: structured body and a string model field run
    // before the registry or any provider is touched.
    let body: serde_json::Value = match serde_json::from_slice(&raw_body) {
        Ok(body) => body,
        Err(error) => {
            let mut response =
                Error::BadRequest(format!("Request body is not valid JSON: {error}"))
                    .into_response();
            attach_gateway_headers(&mut response, &correlation_id, None, false);
            return response;
        }
    };

    let Some(org_id) = headers.get(ORG_HEADER).and_then(|v| v.to_str().ok()) else {
        let mut response =
            Error::BadRequest(format!("Missing {ORG_HEADER} header")).into_response();
        attach_gateway_headers(&mut response, &correlation_id, None, false);
        return response;
    };
    let org_id = org_id.to_string();

    let model = body
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();
    let is_streaming = body.get("stream").and_then(|s| s.as_bool()).unwrap_or(false);

    tracing::info!(
        model = %model,
        org_id = %org_id,
        stream = is_streaming,
        "Received chat completion request"
    );

    let result = state.gateway.run(&org_id, &correlation_id, body).await;
    let latency_ms = start.elapsed().as_millis() as i64;

    if let Some(pool) = &state.db {
        spawn_log_write(pool, build_log(&correlation_id, &model, is_streaming, latency_ms, &result));
    }

    match result {
        Ok(success) => {
            let routed = (
                success.provider.clone(),
                success.model.clone(),
                success.auth.as_str().to_string(),
            );
            let mut response = if is_streaming {
                streaming_response(success)
            } else {
                non_streaming_response(success).await
            };
            attach_gateway_headers(
                &mut response,
                &correlation_id,
                Some((&routed.0, &routed.1, &routed.2)),
                is_streaming,
            );
            response
        }
        Err(failure) => {
            let mut response = failure.into_response();
            attach_gateway_headers(&mut response, &correlation_id, None, is_streaming);
            response
        }
    }
}

fn build_log(
    correlation_id: &str,
    model: &str,
    streaming: bool,
    latency_ms: i64,
    result: &Result<GatewaySuccess, GatewayFailure>,
) -> RequestLog {
    match result {
        Ok(success) => RequestLog {
            correlation_id: correlation_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            model: model.to_string(),
            provider: Some(success.provider.clone()),
            auth_mode: Some(success.auth.as_str().to_string()),
            streaming,
            attempts: success.attempts_tried as i64,
            latency_ms,
            success: true,
            error_status: None,
            error_message: None,
        },
        Err(failure) => RequestLog {
            correlation_id: correlation_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            model: model.to_string(),
            provider: None,
            auth_mode: None,
            streaming,
            attempts: failure.details.len() as i64,
            latency_ms,
            success: false,
            error_status: Some(failure.status_code),
            error_message: Some(failure.message.clone()),
        },
    }
}

/// Forward a non-streaming provider response, translating Anthropic
/// bodies back into the caller's format.
async fn non_streaming_response(success: GatewaySuccess) -> Response {
    let body: serde_json::Value = match success.response.json().await {
        Ok(body) => body,
        Err(error) => {
            tracing::error!(error = %error, "Failed to read provider response");
            return Error::Internal(format!("Failed to read provider response: {error}"))
                .into_response();
        }
    };

    let mapped = match success.response_format {
        ResponseFormat::OpenAi => body,
        ResponseFormat::Anthropic => match anthropic_to_openai(&body) {
            Ok(mapped) => mapped,
            Err(error) => {
                tracing::error!(error = %error, "Failed to map provider response");
                return Error::Internal(format!("Failed to map provider response: {error}"))
                    .into_response();
            }
        },
    };

    (StatusCode::OK, Json(mapped)).into_response()
}

/// Pipe a streaming provider response through to the caller.
///
/// OpenAI-format upstreams pass through byte-for-byte. Anthropic-format
/// upstreams are re-framed incrementally; event boundaries may land
/// anywhere in the byte stream, so frames are only emitted once complete.
fn streaming_response(success: GatewaySuccess) -> Response {
    let body = match success.response_format {
        ResponseFormat::OpenAi => {
            let stream = success
                .response
                .bytes_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other));
            Body::from_stream(stream)
        }
        ResponseFormat::Anthropic => {
            let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(32);
            tokio::spawn(async move {
                let mut reframer = StreamReframer::new();
                let mut upstream = success.response.bytes_stream();
                while let Some(chunk) = upstream.next().await {
                    match chunk {
                        Ok(bytes) => {
                            for frame in reframer.feed(&bytes) {
                                if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(error) => {
                            tracing::error!(error = %error, "Error streaming from provider");
                            break;
                        }
                    }
                }
                for frame in reframer.flush() {
                    if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                        return;
                    }
                }
            });
            Body::from_stream(ReceiverStream::new(rx))
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap()
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "switchboard"
    }))
}
