use crate::gateway::{GatewayRequest, GatewayResponse};
use crate::orchestrator::Core;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Router that hands every request it receives to the gateway.
///
/// Meant to be merged last so that explicit routes (admin API) take precedence.
pub fn create_gateway_router(core: Arc<Core>) -> Router {
    Router::new().fallback(gateway_fallback).with_state(core)
}

async fn gateway_fallback(State(core): State<Arc<Core>>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let limit = core.config().server.max_body_bytes;

    let body = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %parts.uri.path(), limit, error = %e, "Request body rejected");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(ErrorResponse {
                    error: "payload too large".to_string(),
                }),
            )
                .into_response();
        }
    };

    let request = to_gateway_request(parts.method, &parts.uri, parts.headers, body);
    core.handle_request(request).await.into_response()
}

/// Convert transport parts into a pipeline request.
pub fn to_gateway_request(
    method: Method,
    uri: &Uri,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayRequest {
    let mut request = GatewayRequest::new(method, uri.path());
    request.query = uri.query().map(str::to_string);
    request.headers = headers;
    request.body = body;
    request
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        response.headers_mut().extend(self.headers);
        response
    }
}
