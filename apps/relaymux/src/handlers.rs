//! HTTP front door: the three
//! dialect-specific endpoints, each a thin shim translating an axum request
//! into a `DialectRequest` and a `PipelineManager::dispatch` call into an
//! axum response. All dialect/compatibility/coalescing logic lives in
//! `relaymux-transform`/`relaymux-provider-core`; nothing here knows a wire
//! shape's fields.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::stream;
use relaymux_common::{PipelineError, RequestId};
use relaymux_protocol::anthropic::AnthropicRequest;
use relaymux_protocol::chat::ChatCompletionRequest;
use relaymux_protocol::responses::ResponsesRequest;
use relaymux_provider_core::{PipelineManager, PipelineResponse};
use relaymux_transform::switch::{DialectRequest, DialectResponse};
use serde_json::json;

/// Every route category this deployment recognizes requests to, keyed to a
/// `LogicalRoute`. A client selects one via the `x-relaymux-route` header;
/// its absence falls back to `default`. The three dialect endpoints are a
/// core concern, but category selection is this binary's own choice — the
/// core only knows routes by name.
const ROUTE_HEADER: &str = "x-relaymux-route";
const DEFAULT_ROUTE: &str = "default";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) manager: Arc<PipelineManager>,
}

fn route_category(headers: &HeaderMap) -> String {
    headers
        .get(ROUTE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_ROUTE)
        .to_string()
}

pub(crate) async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequest>,
) -> Response {
    dispatch(state, headers, DialectRequest::Chat(body)).await
}

pub(crate) async fn responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ResponsesRequest>,
) -> Response {
    dispatch(state, headers, DialectRequest::Responses(body)).await
}

pub(crate) async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AnthropicRequest>,
) -> Response {
    dispatch(state, headers, DialectRequest::AnthropicMessages(body)).await
}

async fn dispatch(state: AppState, headers: HeaderMap, request: DialectRequest) -> Response {
    let request_id = RequestId::new();
    let category = route_category(&headers);

    match state.manager.dispatch(&category, request, request_id).await {
        Ok(PipelineResponse::Buffered(dialect_response)) => {
            buffered_response(request_id, dialect_response)
        }
        Ok(PipelineResponse::PassthroughBuffered(value)) => {
            let mut response = Json(value).into_response();
            response
                .headers_mut()
                .insert("x-request-id", request_id_header(request_id));
            response
        }
        Ok(PipelineResponse::Stream(rx)) => stream_response(request_id, rx),
        Err(err) => error_response(request_id, err),
    }
}

fn buffered_response(request_id: RequestId, dialect_response: DialectResponse) -> Response {
    let body = match dialect_response {
        DialectResponse::Chat(r) => json!(r),
        DialectResponse::Responses(r) => json!(r),
        DialectResponse::AnthropicMessages(r) => json!(r),
    };
    let mut response = Json(body).into_response();
    response
        .headers_mut()
        .insert("x-request-id", request_id_header(request_id));
    response
}

/// Builds the SSE response: `text/event-stream`, no caching, a kept-alive
/// connection, and the request id echoed back so a client can correlate
/// logs. The coalescer (`relaymux_provider_core::coalescer`) has already
/// framed every `event: ...\ndata: ...\n\n` byte; this only needs
/// to relay them without buffering.
fn stream_response(request_id: RequestId, rx: tokio::sync::mpsc::Receiver<bytes::Bytes>) -> Response {
    let body = Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, std::io::Error>(chunk), rx))
    }));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-request-id", request_id_header(request_id))
        .body(body)
        .expect("static header values are always valid")
}

fn request_id_header(request_id: RequestId) -> HeaderValue {
    HeaderValue::from_str(&request_id.to_string()).expect("a uuid is always a valid header value")
}

/// Maps `PipelineError` onto its HTTP status taxonomy; `kind()` is carried
/// verbatim so a client can branch on it without parsing `message`.
fn error_response(request_id: RequestId, err: PipelineError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "error": {
            "kind": err.kind(),
            "message": err.to_string(),
        }
    });
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert("x-request-id", request_id_header(request_id));
    response
}
