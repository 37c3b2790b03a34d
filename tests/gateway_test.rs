// Integration tests for module routes served over HTTP through the gateway fallback

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use modcore::api::create_app;
use modcore::auth::{Caller, TokenIdentityResolver};
use modcore::config::CoreConfig;
use modcore::gateway::{middleware_fn, GatewayResponse, HandlerSet, MiddlewareOutcome};
use modcore::module::{ModuleCategory, ModuleManifest, Route};
use modcore::Core;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn crm_manifest() -> ModuleManifest {
    ModuleManifest::new("crm", "CRM", "1.0.0", ModuleCategory::Crm)
        .with_route(Route::new("GET", "/contacts/:id", "getContact").with_rate_limit(2))
        .with_route(
            Route::new("POST", "/contacts", "createContact")
                .with_permissions(&["contacts.write"])
                .with_middleware(&["require-name"]),
        )
        .with_route(Route::new("GET", "/failing", "failing"))
}

fn crm_handlers() -> HandlerSet {
    HandlerSet::new()
        .with_fn("getContact", |_req, route| async move {
            Ok(GatewayResponse::ok(json!({ "id": route.param("id") })))
        })
        .with_fn("createContact", |req, _route| async move {
            Ok(GatewayResponse::new(
                StatusCode::CREATED,
                json!({ "created": req.parsed_body, "by": req.caller.map(|c| c.id) }),
            ))
        })
        .with_fn("failing", |_req, _route| async move {
            Err(anyhow::anyhow!("connection refused: db-internal:5432"))
        })
}

fn create_test_app(max_body_bytes: usize) -> (Arc<Core>, Router) {
    let mut config = CoreConfig::default();
    config.server.max_body_bytes = max_body_bytes;

    let identity = Arc::new(TokenIdentityResolver::new());
    identity.insert("tok-writer", Caller::new("writer", &["contacts.write"]));
    identity.insert("tok-reader", Caller::new("reader", &["contacts.read"]));

    let core = Core::builder(config).identity(identity).build().unwrap();
    core.register_middleware(
        "require-name",
        middleware_fn(|req| {
            if req.parsed_body.get("name").is_some() {
                Ok(MiddlewareOutcome::Continue)
            } else {
                Ok(MiddlewareOutcome::reject("name is required"))
            }
        }),
    );
    core.register_module(crm_manifest(), crm_handlers()).unwrap();
    core.activate_module("crm").unwrap();

    let app = create_app(core.clone());
    (core, app)
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get_contact(client: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri("/api/modules/crm/contacts/42")
        .header("x-client-id", client)
        .body(Body::empty())
        .unwrap()
}

fn post_contact(token: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/modules/crm/contacts")
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Path params reach the handler; the response is the handler's JSON.
#[tokio::test]
async fn test_module_route_dispatch() {
    let (_core, app) = create_test_app(1024);

    let response = app.oneshot(get_contact("u1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"id": "42"}));
}

/// rateLimit=2: third request from u1 in the window is 429 with Retry-After.
#[tokio::test]
async fn test_rate_limit_third_request_rejected() {
    let (_core, app) = create_test_app(1024);

    for _ in 0..2 {
        let response = app.clone().oneshot(get_contact("u1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.clone().oneshot(get_contact("u1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(body_json(response).await, json!({"error": "Too many requests"}));

    // Other clients are unaffected
    let response = app.oneshot(get_contact("u2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Unknown paths are a JSON 404, not axum's empty default.
#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let (_core, app) = create_test_app(1024);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/modules/crm/unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await, json!({"error": "Not found"}));
}

/// Permission-guarded route: missing caller or wrong permission is 403.
#[tokio::test]
async fn test_permission_guard() {
    let (_core, app) = create_test_app(1024);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/modules/crm/contacts")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"name":"Ada"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(post_contact("tok-reader", r#"{"name":"Ada"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(post_contact("tok-writer", r#"{"name":"Ada"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        body_json(response).await,
        json!({"created": {"name": "Ada"}, "by": "writer"})
    );
}

/// Middleware rejects with its own message; malformed JSON never reaches it.
#[tokio::test]
async fn test_validation_and_middleware() {
    let (_core, app) = create_test_app(1024);

    let response = app
        .clone()
        .oneshot(post_contact("tok-writer", r#"{"email":"a@b.c"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({"error": "name is required"}));

    let response = app
        .oneshot(post_contact("tok-writer", r#"{"name": "#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({"error": "Invalid request"}));
}

/// Handler errors are a generic 500 and recorded as gateway.error.
#[tokio::test]
async fn test_handler_error_not_leaked() {
    let (core, app) = create_test_app(1024);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/modules/crm/failing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body, json!({"error": "Internal server error"}));

    let errors = core.get_events(Some("gateway.error"), Some("crm"));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].data["path"], "/api/modules/crm/failing");
}

/// Bodies over max_body_bytes are rejected before the pipeline runs.
#[tokio::test]
async fn test_body_over_limit_is_413() {
    let (_core, app) = create_test_app(16);

    let response = app
        .oneshot(post_contact(
            "tok-writer",
            r#"{"name":"a very long contact name indeed"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

/// After unregistering, the module's routes are gone.
#[tokio::test]
async fn test_unregistered_module_routes_removed() {
    let (core, app) = create_test_app(1024);
    core.unregister_module("crm").unwrap();

    let response = app.oneshot(get_contact("u1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// A request for the pattern text itself is matched as a pattern, not as a key.
#[tokio::test]
async fn test_literal_pattern_path_binds_params() {
    let (_core, app) = create_test_app(1024);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/modules/crm/contacts/:id")
                .header("x-client-id", "u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"id": ":id"}));
}
