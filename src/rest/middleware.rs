//! Authentication gate and request identifiers.
//!
//! Protected routes sit behind [`require_auth`], so a request with a missing
//! or wrong credential is answered with 401 before its body is read.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::rest::error::ApiError;
use crate::rest::state::ApiState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Identifier attached to every protected request and its workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort remote origin: first `X-Forwarded-For` hop, else the peer address
fn origin(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

pub async fn require_auth(State(state): State<ApiState>, mut request: Request, next: Next) -> Response {
    let header = state.config.auth.header.as_str();
    let presented = request
        .headers()
        .get(header)
        .and_then(|v| v.to_str().ok());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let origin = origin(request.headers(), peer);
    let endpoint = request.uri().path().to_string();

    let decision = state
        .auth
        .authorize(presented, &endpoint, origin.as_deref());
    if !decision.is_authorized() {
        return ApiError::unauthorized(header).into_response();
    }

    let request_id = RequestId::new();
    tracing::info!(
        target: "audit",
        endpoint = %endpoint,
        request_id = request_id.as_str(),
        "request accepted"
    );
    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    tracing::info!(
        target: "audit",
        endpoint = %endpoint,
        request_id = request_id.as_str(),
        status = response.status().as_u16(),
        "request finished"
    );
    response
}
