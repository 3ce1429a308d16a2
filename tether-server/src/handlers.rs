//! Management API and dynamic dispatch

use crate::error::{ServerError, ServerResult};
use crate::request_id::RequestId;
use crate::AppState;
use axum::{
    body::{self, Body},
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::net::SocketAddr;
use tether_logging::{LogQuery, RequestLog, RequestLogStats};
use tether_runtime::{EvalResult, HandlerInfo, JobSource, NativeRequest, NativeResponse};
use tether_storage::ExecutionRecord;
use tracing::{debug, warn};

const DEFAULT_EXECUTION_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `POST /api/execute`
pub async fn execute(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(request): Json<ExecuteRequest>,
) -> ServerResult<Json<EvalResult>> {
    if request.code.trim().is_empty() {
        return Err(ServerError::BadRequest("code must not be empty".to_string()));
    }

    debug!(request_id = %request_id, "Executing {} bytes of code", request.code.len());
    let result = state
        .engine
        .execute(request.code, JobSource::Api, request.session_id)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionsQuery {
    pub session_id: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /api/executions`
pub async fn executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionsQuery>,
) -> ServerResult<Json<Vec<ExecutionRecord>>> {
    let Some(repository) = state.engine.executions() else {
        return Ok(Json(Vec::new()));
    };

    let limit = query.limit.unwrap_or(DEFAULT_EXECUTION_LIMIT);
    let records = match query.session_id.as_deref() {
        Some(session_id) => {
            let mut records = repository.find_by_session(session_id).await?;
            let skip = records.len().saturating_sub(limit);
            records.drain(..skip);
            records
        }
        None => repository.recent(limit).await?,
    };
    Ok(Json(records))
}

/// `GET /api/requests`, newest first
pub async fn requests(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Json<Vec<RequestLog>> {
    Json(state.engine.request_logger().list(&query))
}

/// `GET /api/requests/stats`
pub async fn request_stats(State(state): State<AppState>) -> Json<RequestLogStats> {
    Json(state.engine.request_logger().stats())
}

/// `GET /api/requests/{id}`: by log id, or by the `X-Request-ID` the request carried
pub async fn request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<RequestLog>> {
    let logger = state.engine.request_logger();
    logger
        .get(&id)
        .or_else(|| logger.find_by_correlation(&id))
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("request {id}")))
}

#[derive(Debug, Serialize)]
pub struct RoutesResponse {
    pub routes: Vec<HandlerInfo>,
    pub files: Vec<HandlerInfo>,
}

/// `GET /api/routes`
pub async fn routes(State(state): State<AppState>) -> Json<RoutesResponse> {
    let registry = state.engine.registry();
    Json(RoutesResponse {
        routes: registry.routes(),
        files: registry.file_handlers(),
    })
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<JsonValue> {
    let stats = state.engine.stats();
    Json(json!({
        "status": "ok",
        "queueDepth": state.engine.queue_depth(),
        "routes": state.engine.registry().len(),
        "dispatcher": stats,
    }))
}

/// Anything not served by the management API goes to script handlers
pub async fn dispatch(State(state): State<AppState>, request: Request) -> ServerResult<Response> {
    let (parts, body) = request.into_parts();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let body = body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| ServerError::PayloadTooLarge(state.max_body_bytes))?;

    let uri = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);
    let mut native = NativeRequest::new(parts.method.clone(), &uri);
    native.headers = parts.headers;
    native.body = body;
    native.remote_addr = remote_addr;

    match state.engine.handle_http(native).await? {
        Some(response) => Ok(into_response(response)),
        None => Err(ServerError::NotFound(format!(
            "no handler for {} {}",
            parts.method,
            parts.uri.path()
        ))),
    }
}

fn into_response(native: NativeResponse) -> Response {
    let status = StatusCode::from_u16(native.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Body::from(native.body)).into_response();

    let headers = response.headers_mut();
    for (name, value) in native.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!("Dropping invalid response header {:?}", name),
        }
    }
    response
}
