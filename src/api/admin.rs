use crate::error::CoreError;
use crate::orchestrator::Core;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// State for the admin API.
#[derive(Clone)]
pub struct AdminAppState {
    pub core: Arc<Core>,
    /// Required bearer token for every /api/admin route. None = unrestricted (dev mode).
    pub admin_token: Option<String>,
}

/// History filter: `?type=module.activated&module=crm`
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub module: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

enum AdminError {
    Unauthorized,
    BadRequest(String),
    Core(CoreError),
}

impl From<CoreError> for AdminError {
    fn from(e: CoreError) -> Self {
        AdminError::Core(e)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AdminError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AdminError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AdminError::Core(e) => (e.status_code(), e.to_string()),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

pub fn create_admin_router(state: AdminAppState) -> Router {
    Router::new()
        .route("/api/admin/modules", get(list_modules))
        .route(
            "/api/admin/modules/:id",
            get(get_module).delete(unregister_module),
        )
        .route("/api/admin/modules/:id/activate", post(activate_module))
        .route("/api/admin/modules/:id/deactivate", post(deactivate_module))
        .route("/api/admin/events", get(get_events).delete(clear_events))
        .route(
            "/api/admin/config/system",
            get(get_system_config).put(put_system_config),
        )
        .route("/api/admin/components", get(list_components))
        .with_state(Arc::new(state))
}

/// GET /api/admin/modules — all modules in registration order.
async fn list_modules(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
) -> Result<Response, AdminError> {
    authorize(&headers, &state)?;
    Ok(Json(state.core.list_modules()).into_response())
}

async fn get_module(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AdminError> {
    authorize(&headers, &state)?;
    let module = state
        .core
        .get_module(&id)
        .ok_or_else(|| CoreError::NotFound(format!("module '{}'", id)))?;
    Ok(Json(module).into_response())
}

async fn activate_module(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AdminError> {
    authorize(&headers, &state)?;
    let module = state.core.activate_module(&id)?;
    Ok(Json(module).into_response())
}

async fn deactivate_module(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AdminError> {
    authorize(&headers, &state)?;
    let module = state.core.deactivate_module(&id)?;
    Ok(Json(module).into_response())
}

async fn unregister_module(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AdminError> {
    authorize(&headers, &state)?;
    state.core.unregister_module(&id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// GET /api/admin/events?type=&module= — retained history, oldest first.
async fn get_events(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
    Query(filter): Query<EventFilter>,
) -> Result<Response, AdminError> {
    authorize(&headers, &state)?;
    let events = state
        .core
        .get_events(filter.event_type.as_deref(), filter.module.as_deref());
    Ok(Json(events).into_response())
}

/// DELETE /api/admin/events?type=&module= — no filter clears everything.
async fn clear_events(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
    Query(filter): Query<EventFilter>,
) -> Result<Response, AdminError> {
    authorize(&headers, &state)?;
    let removed = state
        .core
        .clear_events(filter.event_type.as_deref(), filter.module.as_deref());
    info!(
        removed,
        event_type = ?filter.event_type,
        module = ?filter.module,
        "Event history cleared"
    );
    Ok(Json(json!({ "removed": removed })).into_response())
}

async fn get_system_config(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
) -> Result<Response, AdminError> {
    authorize(&headers, &state)?;
    Ok(Json(state.core.get_system_config()).into_response())
}

/// PUT /api/admin/config/system — partial update; each key in the body is written.
async fn put_system_config(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
    Json(update): Json<Value>,
) -> Result<Response, AdminError> {
    authorize(&headers, &state)?;
    let Value::Object(entries) = update else {
        return Err(AdminError::BadRequest(
            "body must be a JSON object".to_string(),
        ));
    };

    for (key, value) in entries {
        state.core.update_system_config(&key, value);
    }
    Ok(Json(state.core.get_system_config()).into_response())
}

/// GET /api/admin/components — UI components of active modules.
async fn list_components(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
) -> Result<Response, AdminError> {
    authorize(&headers, &state)?;
    Ok(Json(state.core.components()).into_response())
}

fn authorize(headers: &HeaderMap, state: &AdminAppState) -> Result<(), AdminError> {
    if validate_admin_token(headers, &state.admin_token) {
        Ok(())
    } else {
        Err(AdminError::Unauthorized)
    }
}

/// Returns true if the bearer token in `Authorization` matches the expected admin token.
/// Returns true (no restriction) when `expected` is None.
fn validate_admin_token(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected_token) = expected else {
        return true;
    };

    match crate::auth::extract_bearer_token(headers) {
        Ok(token) => token == *expected_token,
        Err(_) => false,
    }
}
