use super::{GatewayRequest, GatewayResponse, RouteMatch};
use async_trait::async_trait;
use axum::http::StatusCode;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Module-owned request handler, resolved by `(module_id, handler_name)`.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(
        &self,
        request: &GatewayRequest,
        route: &RouteMatch,
    ) -> anyhow::Result<GatewayResponse>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F>
where
    F: Fn(GatewayRequest, RouteMatch) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<GatewayResponse>> + Send + 'static,
{
    async fn handle(
        &self,
        request: &GatewayRequest,
        route: &RouteMatch,
    ) -> anyhow::Result<GatewayResponse> {
        (self.f)(request.clone(), route.clone()).await
    }
}

/// Wrap an async closure as a [`RouteHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RouteHandler>
where
    F: Fn(GatewayRequest, RouteMatch) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<GatewayResponse>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Named handlers a module provides, checked against its routes at registration.
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<String, Arc<dyn RouteHandler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, handler: Arc<dyn RouteHandler>) -> Self {
        self.insert(name, handler);
        self
    }

    pub fn with_fn<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(GatewayRequest, RouteMatch) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<GatewayResponse>> + Send + 'static,
    {
        self.with(name, handler_fn(f))
    }

    pub fn insert(&mut self, name: &str, handler: Arc<dyn RouteHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RouteHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet")
            .field("handlers", &self.names())
            .finish()
    }
}

/// Result of one middleware step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareOutcome {
    Continue,
    Reject { status: StatusCode, message: String },
}

impl MiddlewareOutcome {
    /// Reject with the default 400 status.
    pub fn reject(message: &str) -> Self {
        MiddlewareOutcome::Reject {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }
}

/// Named pre-dispatch step. May annotate the request for later steps.
///
/// Returning `Err` counts as the middleware failing and short-circuits with 400.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn run(&self, request: &mut GatewayRequest) -> anyhow::Result<MiddlewareOutcome>;
}

struct FnMiddleware<F> {
    f: F,
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut GatewayRequest) -> anyhow::Result<MiddlewareOutcome> + Send + Sync + 'static,
{
    async fn run(&self, request: &mut GatewayRequest) -> anyhow::Result<MiddlewareOutcome> {
        (self.f)(request)
    }
}

/// Wrap a synchronous closure as a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&mut GatewayRequest) -> anyhow::Result<MiddlewareOutcome> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware { f })
}

/// Registry-side lookups the gateway needs at dispatch time.
pub trait ModuleResolver: Send + Sync {
    fn contains_module(&self, module_id: &str) -> bool;

    fn resolve_handler(&self, module_id: &str, handler: &str) -> Option<Arc<dyn RouteHandler>>;
}
