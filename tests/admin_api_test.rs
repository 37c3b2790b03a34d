// Integration tests for the /api/admin surface

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use modcore::api::{create_admin_router, AdminAppState};
use modcore::config::CoreConfig;
use modcore::gateway::HandlerSet;
use modcore::module::{Dependency, ModuleCategory, ModuleManifest};
use modcore::Core;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_app(admin_token: Option<&str>) -> (Arc<Core>, Router) {
    let core = Core::new(CoreConfig::default()).unwrap();
    core.register_module(
        ModuleManifest::new("crm", "CRM", "1.0.0", ModuleCategory::Crm)
            .with_component("ContactList", "/components/contact-list", "page"),
        HandlerSet::new(),
    )
    .unwrap();
    core.register_module(
        ModuleManifest::new("analytics", "Analytics", "1.0.0", ModuleCategory::Analytics)
            .with_dependency(Dependency::required("crm", "^1.0.0")),
        HandlerSet::new(),
    )
    .unwrap();

    let state = AdminAppState {
        core: core.clone(),
        admin_token: admin_token.map(|t| t.to_string()),
    };
    (core, create_admin_router(state))
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// No token configured: admin routes are open.
#[tokio::test]
async fn test_list_modules_unrestricted() {
    let (_core, app) = create_test_app(None);

    let response = app.oneshot(request("GET", "/api/admin/modules")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let modules = body_json(response).await;
    let ids: Vec<&str> = modules
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["crm", "analytics"]);
    assert_eq!(modules[0]["status"], "installed");
}

/// Token configured: missing or wrong token is 401, correct token passes.
#[tokio::test]
async fn test_admin_token_required() {
    let (_core, app) = create_test_app(Some("secret"));

    let response = app
        .clone()
        .oneshot(request("GET", "/api/admin/modules"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/admin/modules")
                .header("Authorization", bearer("wrong"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/admin/modules")
                .header("Authorization", bearer("secret"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_unknown_module_returns_404() {
    let (_core, app) = create_test_app(None);

    let response = app
        .oneshot(request("GET", "/api/admin/modules/nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_json(response).await["error"]
        .as_str()
        .unwrap()
        .contains("nope"));
}

/// Activate in dependency order, then deactivating the dependency is a 409.
#[tokio::test]
async fn test_activate_and_deactivate_over_http() {
    let (core, app) = create_test_app(None);

    let response = app
        .clone()
        .oneshot(request("POST", "/api/admin/modules/analytics/activate"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    for id in ["crm", "analytics"] {
        let response = app
            .clone()
            .oneshot(request("POST", &format!("/api/admin/modules/{}/activate", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "active");
    }

    let response = app
        .clone()
        .oneshot(request("POST", "/api/admin/modules/crm/deactivate"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(core.get_module("crm").unwrap().is_active());

    let response = app
        .oneshot(request("POST", "/api/admin/modules/analytics/deactivate"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "inactive");
}

/// DELETE unregisters; an active module with active dependents cannot be removed.
#[tokio::test]
async fn test_unregister_module() {
    let (core, app) = create_test_app(None);
    core.activate_module("crm").unwrap();
    core.activate_module("analytics").unwrap();

    let response = app
        .clone()
        .oneshot(request("DELETE", "/api/admin/modules/crm"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(request("DELETE", "/api/admin/modules/analytics"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(core.get_module("analytics").is_none());

    let response = app
        .oneshot(request("DELETE", "/api/admin/modules/analytics"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Event history filtered by type and module; DELETE reports the removed count.
#[tokio::test]
async fn test_event_history_filter_and_clear() {
    let (_core, app) = create_test_app(None);

    let response = app
        .clone()
        .oneshot(request("GET", "/api/admin/events?type=module.registered"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let events = body_json(response).await;
    assert_eq!(events.as_array().unwrap().len(), 2);
    assert_eq!(events[0]["data"]["moduleId"], "crm");

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/api/admin/events?type=module.registered&module=analytics",
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(request("DELETE", "/api/admin/events?module=crm"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({"removed": 1}));

    let response = app
        .oneshot(request("GET", "/api/admin/events?type=module.registered"))
        .await
        .unwrap();
    let remaining = body_json(response).await;
    assert_eq!(remaining.as_array().unwrap().len(), 1);
    assert_eq!(remaining[0]["data"]["moduleId"], "analytics");
}

/// PUT merges keys into system config; non-object bodies are rejected.
#[tokio::test]
async fn test_put_system_config() {
    let (core, app) = create_test_app(None);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/admin/config/system")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"maintenance": true, "theme": "dark"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cfg = body_json(response).await;
    assert_eq!(cfg["maintenance"], true);
    assert_eq!(cfg["theme"], "dark");
    assert_eq!(core.get_system_config()["theme"], json!("dark"));

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/admin/config/system")
                .header("Content-Type", "application/json")
                .body(Body::from("[1, 2]"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Only active modules contribute UI components.
#[tokio::test]
async fn test_components_of_active_modules() {
    let (core, app) = create_test_app(None);

    let response = app
        .clone()
        .oneshot(request("GET", "/api/admin/components"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!([]));

    core.activate_module("crm").unwrap();
    let response = app
        .oneshot(request("GET", "/api/admin/components"))
        .await
        .unwrap();
    assert_eq!(
        body_json(response).await,
        json!([{
            "moduleId": "crm",
            "name": "ContactList",
            "path": "/components/contact-list",
            "type": "page"
        }])
    );
}
