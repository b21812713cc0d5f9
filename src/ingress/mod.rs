//! Synchronous ingress.
//!
//! Direct invocations of the local function, outside any sequence:
//! - `POST` to any path: invoke and return the function output
//! - `POST /meta/message`: mesh messages from HTTP peers
//! - `GET /meta/health`: node identity
//! - `GET /meta/metrics`: invocation and step counters
//!
//! Stdin mode (`stdin` submodule) offers the same one-shot invocation for
//! a single line of input.

mod stdin;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::invoker::{FunctionInvoker, Invocation};
use crate::mesh::{Mesh, MeshError, Message, MESSAGE_PATH};
use crate::metrics::{MetricsSnapshot, NodeMetrics};
use crate::request::{CoordinatedRequest, CoordinatedResponse};
use crate::sequence::RunErr;

pub use stdin::exec_from_reader;

/// Health endpoint path.
pub const HEALTH_PATH: &str = "/meta/health";

/// Metrics endpoint path.
pub const METRICS_PATH: &str = "/meta/metrics";

/// Body returned for failures whose detail is only logged.
const UNKNOWN_ERROR: &str = "unknown error";

/// Ingress errors, mapped to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    /// The function reported a failure; surfaced with status 418.
    #[error("{0}")]
    Runtime(RunErr),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("failed to decode function response: {0}")]
    InvalidResponse(String),

    #[error("mesh is not enabled on this node")]
    MeshUnavailable,

    #[error("failed to deliver mesh message: {0}")]
    Mesh(#[from] MeshError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        match self {
            IngressError::Runtime(err) => (StatusCode::IM_A_TEAPOT, err.message).into_response(),
            IngressError::MeshUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response()
            }
            other => {
                error!(error = %other, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, UNKNOWN_ERROR).into_response()
            }
        }
    }
}

/// Shared state for axum handlers.
pub struct IngressState {
    /// FQFN of the hosted function.
    pub fqfn: String,
    /// Process UUID.
    pub proc_uuid: String,
    pub invoker: Arc<dyn FunctionInvoker>,
    /// Mesh receiving `/meta/message` deliveries; `None` disables the endpoint.
    pub mesh: Option<Arc<dyn Mesh>>,
    /// Counters shared with the node's coordinator.
    pub metrics: Arc<NodeMetrics>,
}

type AppState = Arc<IngressState>;

/// Build the axum router (separated for testing).
pub fn router(state: IngressState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(METRICS_PATH, get(metrics))
        .route(MESSAGE_PATH, post(receive_message))
        .fallback(invoke)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Turn an invocation into the function's response or an ingress error.
pub fn decode_invocation(invocation: Invocation) -> Result<CoordinatedResponse, IngressError> {
    match invocation {
        Invocation::Success(bytes) => CoordinatedResponse::from_json(&bytes)
            .map_err(|e| IngressError::InvalidResponse(e.to_string())),
        Invocation::RuntimeFailure(err) => Err(IngressError::Runtime(err)),
        Invocation::ExecutionFailure(msg) => Err(IngressError::Execution(msg)),
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    fqfn: String,
    uuid: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        fqfn: state.fqfn.clone(),
        uuid: state.proc_uuid.clone(),
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn receive_message(
    State(state): State<AppState>,
    Json(msg): Json<Message>,
) -> Result<StatusCode, IngressError> {
    let mesh = state.mesh.as_ref().ok_or(IngressError::MeshUnavailable)?;
    debug!(uuid = %msg.uuid, msg_type = %msg.msg_type, "Received mesh message");
    mesh.receive(msg).await?;
    Ok(StatusCode::ACCEPTED)
}

#[tracing::instrument(name = "ingress.invoke", skip_all, fields(path = %uri.path()))]
async fn invoke(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, IngressError> {
    if method != Method::POST {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    let req = CoordinatedRequest {
        id: uuid::Uuid::new_v4().to_string(),
        method: method.to_string(),
        url: uri.path().to_string(),
        body: body.to_vec(),
        headers: header_map(&headers),
        params,
        ..Default::default()
    };

    info!(request_id = %req.id, fqfn = %state.fqfn, "Invoking function");

    let invocation = state.invoker.invoke(&req).await;
    state.metrics.record_invocation(&invocation);
    let resp = decode_invocation(invocation)?;
    Ok(build_response(resp))
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn build_response(resp: CoordinatedResponse) -> Response {
    let mut response = Response::new(Body::from(resp.output));
    for (name, value) in resp.resp_headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(header = %name, "Dropping invalid response header"),
        }
    }
    response
}
