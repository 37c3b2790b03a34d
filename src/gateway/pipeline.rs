use super::handler::{Middleware, MiddlewareOutcome, ModuleResolver};
use super::rate_limit::RateLimiter;
use super::routes::{normalize_path, RouteInfo, RouteMatch, RouteTable};
use super::{GatewayConfig, GatewayRequest, GatewayResponse};
use crate::auth::IdentityResolver;
use crate::error::{CoreError, CoreResult};
use crate::event::{panic_message, EventBus, SYSTEM_SOURCE};
use crate::module::{parse_method, Route};
use axum::http::StatusCode;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Why a request stopped before producing a handler response.
enum Rejection {
    Error(CoreError),
    Middleware {
        name: String,
        status: StatusCode,
        message: String,
    },
}

impl From<CoreError> for Rejection {
    fn from(err: CoreError) -> Self {
        Rejection::Error(err)
    }
}

/// Owns the route table, the middleware registry and the rate-limit buckets,
/// and runs every inbound request through the pipeline.
pub struct Gateway {
    config: GatewayConfig,
    routes: RwLock<RouteTable>,
    middleware: RwLock<HashMap<String, Arc<dyn Middleware>>>,
    limiter: RateLimiter,
    events: Arc<EventBus>,
    identity: Arc<dyn IdentityResolver>,
    resolver: RwLock<Option<Weak<dyn ModuleResolver>>>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        events: Arc<EventBus>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        let limiter = RateLimiter::new(Duration::from_secs(config.rate_limit_window_seconds));
        Self {
            config,
            routes: RwLock::new(RouteTable::default()),
            middleware: RwLock::new(HashMap::new()),
            limiter,
            events,
            identity,
            resolver: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Attach the registry used to resolve modules and handlers at dispatch.
    ///
    /// Held weakly: the registry owns the gateway, not the other way round.
    pub fn attach_resolver(&self, resolver: Weak<dyn ModuleResolver>) {
        *self.resolver.write() = Some(resolver);
    }

    /// Full mounted path for a module-relative route path.
    pub fn full_path(&self, module_id: &str, path: &str) -> String {
        normalize_path(&format!(
            "{}/{}{}",
            self.config.route_prefix.trim_end_matches('/'),
            module_id,
            path
        ))
    }

    /// Mount `route` under the module's prefix. Returns the full path.
    pub fn register_route(&self, module_id: &str, route: &Route) -> CoreResult<String> {
        let method = parse_method(&route.method).map_err(CoreError::Validation)?;
        let full_path = self.full_path(module_id, &route.path);

        self.routes
            .write()
            .insert(module_id, method.clone(), full_path.clone(), route)?;

        info!(
            module_id = %module_id,
            method = %method,
            path = %full_path,
            "Route registered"
        );
        Ok(full_path)
    }

    pub fn unregister_route(&self, module_id: &str, route: &Route) -> bool {
        let Ok(method) = parse_method(&route.method) else {
            return false;
        };
        let full_path = self.full_path(module_id, &route.path);
        let removed = self.routes.write().remove(&method, &full_path).is_some();
        if removed {
            debug!(module_id = %module_id, method = %method, path = %full_path, "Route removed");
        }
        removed
    }

    /// Drop every route owned by `module_id`. Returns how many were removed.
    pub fn unregister_module_routes(&self, module_id: &str) -> usize {
        let removed = self.routes.write().remove_module(module_id);
        if removed > 0 {
            info!(module_id = %module_id, count = removed, "Module routes removed");
        }
        removed
    }

    pub fn routes(&self) -> Vec<Arc<RouteInfo>> {
        self.routes.read().routes()
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    pub fn find_route(&self, method: &axum::http::Method, path: &str) -> Option<RouteMatch> {
        self.routes.read().find(method, path)
    }

    /// Register a named middleware, replacing any previous one with that name.
    pub fn register_middleware(&self, name: &str, middleware: Arc<dyn Middleware>) {
        self.middleware.write().insert(name.to_string(), middleware);
        debug!(name = %name, "Middleware registered");
    }

    pub fn has_middleware(&self, name: &str) -> bool {
        self.middleware.read().contains_key(name)
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Drop expired rate-limit buckets.
    pub fn sweep_rate_limits(&self) -> usize {
        let removed = self.limiter.sweep_expired(Instant::now());
        if removed > 0 {
            debug!(removed, remaining = self.limiter.bucket_count(), "Rate-limit buckets swept");
        }
        removed
    }

    /// Run `request` through the pipeline. Never fails: every outcome is a
    /// status plus a JSON body.
    pub async fn handle(&self, mut request: GatewayRequest) -> GatewayResponse {
        let started = Instant::now();
        let outcome = self.run_pipeline(&mut request).await;

        let response = match outcome {
            Ok(response) => response,
            Err(Rejection::Middleware {
                name,
                status,
                message,
            }) => {
                debug!(
                    middleware = %name,
                    status = status.as_u16(),
                    path = %request.path,
                    "Request rejected by middleware"
                );
                GatewayResponse::error(status, &message)
            }
            Err(Rejection::Error(err)) => self.failure_response(&request, &err),
        };

        debug!(
            method = %request.method,
            path = %request.path,
            status = response.status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request handled"
        );
        response
    }

    async fn run_pipeline(
        &self,
        request: &mut GatewayRequest,
    ) -> Result<GatewayResponse, Rejection> {
        // 1. Resolve route
        let matched = self
            .find_route(&request.method, &request.path)
            .ok_or_else(|| {
                CoreError::NotFound(format!("no route for {} {}", request.method, request.path))
            })?;
        request.params = matched.params.clone();
        let route = &matched.route.route;

        // 2. Validate body
        if request.carries_body() {
            request.parsed_body = request.parse_body()?;
        }

        // 3. Rate limit
        if let Some(limit) = route.rate_limit {
            let client_id = request.client_id(&self.config);
            self.limiter
                .check_and_consume(&client_id, &matched.route.path, limit)
                .map_err(|retry_after| {
                    CoreError::RateLimit {
                        retry_after_secs: retry_after_secs(retry_after),
                    }
                })?;
        }

        // 4. Authorize
        if !route.permissions.is_empty() {
            match self.identity.resolve(request).await {
                Some(caller) if caller.holds_any(&route.permissions) => {
                    request.caller = Some(caller);
                }
                Some(caller) => {
                    return Err(CoreError::Authorization(format!(
                        "caller '{}' holds none of {:?}",
                        caller.id, route.permissions
                    ))
                    .into());
                }
                None => {
                    return Err(CoreError::Authorization(
                        "request carries no resolvable caller".to_string(),
                    )
                    .into());
                }
            }
        }

        // 5. Middleware, in declared order
        for name in &route.middleware {
            self.run_middleware(name, request).await?;
        }

        // 6. Dispatch
        self.dispatch(request, &matched).await.map_err(Rejection::from)
    }

    async fn run_middleware(
        &self,
        name: &str,
        request: &mut GatewayRequest,
    ) -> Result<(), Rejection> {
        let middleware = self.middleware.read().get(name).cloned();
        let Some(middleware) = middleware else {
            return Err(CoreError::Handler(format!("middleware '{}' is not registered", name)).into());
        };

        let failed = match AssertUnwindSafe(middleware.run(request)).catch_unwind().await {
            Ok(Ok(MiddlewareOutcome::Continue)) => return Ok(()),
            Ok(Ok(MiddlewareOutcome::Reject { status, message })) => {
                return Err(Rejection::Middleware {
                    name: name.to_string(),
                    status,
                    message,
                });
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        warn!(middleware = %name, error = %failed, "Middleware failed");
        Err(Rejection::Middleware {
            name: name.to_string(),
            status: StatusCode::BAD_REQUEST,
            message: format!("Middleware {} failed", name),
        })
    }

    async fn dispatch(
        &self,
        request: &GatewayRequest,
        matched: &RouteMatch,
    ) -> CoreResult<GatewayResponse> {
        let resolver = self
            .resolver
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| CoreError::Handler("no module resolver attached".to_string()))?;

        let module_id = matched.module_id();
        if !resolver.contains_module(module_id) {
            return Err(CoreError::NotFound(format!("module '{}'", module_id)));
        }
        let handler_name = &matched.route.route.handler;
        let handler = resolver
            .resolve_handler(module_id, handler_name)
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "handler '{}' in module '{}'",
                    handler_name, module_id
                ))
            })?;

        match AssertUnwindSafe(handler.handle(request, matched))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(CoreError::Handler(format!(
                "{}.{}: {:#}",
                module_id, handler_name, e
            ))),
            Err(panic) => Err(CoreError::Handler(format!(
                "{}.{} panicked: {}",
                module_id,
                handler_name,
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Log the detail, emit telemetry, and return the generic response.
    fn failure_response(&self, request: &GatewayRequest, err: &CoreError) -> GatewayResponse {
        let response = GatewayResponse::from_error(err);
        let module_id = self
            .find_route(&request.method, &request.path)
            .map(|m| m.route.module_id.clone());

        match err {
            CoreError::RateLimit { retry_after_secs } => {
                let client_id = request.client_id(&self.config);
                warn!(
                    client_id = %client_id,
                    path = %request.path,
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                self.events.emit(
                    "gateway.rate_limited",
                    json!({
                        "clientId": client_id,
                        "method": request.method.as_str(),
                        "path": request.path,
                        "retryAfterSecs": retry_after_secs,
                    }),
                    Some(SYSTEM_SOURCE),
                    module_id.as_deref(),
                );
            }
            err if response.status.is_server_error() => {
                error!(
                    method = %request.method,
                    path = %request.path,
                    error = %err,
                    "Request failed"
                );
                self.events.emit(
                    "gateway.error",
                    json!({
                        "method": request.method.as_str(),
                        "path": request.path,
                        "status": response.status.as_u16(),
                        "kind": err.kind(),
                    }),
                    Some(SYSTEM_SOURCE),
                    module_id.as_deref(),
                );
            }
            err => {
                debug!(
                    method = %request.method,
                    path = %request.path,
                    status = response.status.as_u16(),
                    error = %err,
                    "Request rejected"
                );
            }
        }

        response
    }
}

/// Whole seconds until the window resets, rounded up, at least 1.
fn retry_after_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}
