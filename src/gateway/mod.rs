//! Request gateway: route table plus the per-request pipeline
//! (resolve → validate → rate-limit → authorize → middleware → dispatch).
//!
//! Everything is expressed as [`GatewayRequest`] in, [`GatewayResponse`] out,
//! so the pipeline does not depend on a transport.

use serde::{Deserialize, Serialize};

mod handler;
mod pipeline;
mod rate_limit;
mod request;
mod routes;

pub use handler::{
    handler_fn, middleware_fn, HandlerSet, Middleware, MiddlewareOutcome, ModuleResolver,
    RouteHandler,
};
pub use pipeline::Gateway;
pub use rate_limit::RateLimiter;
pub use request::{GatewayRequest, GatewayResponse};
pub use routes::{RouteInfo, RouteMatch};

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Prefix under which every module's routes are mounted ("{prefix}/{module_id}")
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
    /// Fixed rate-limit window length
    #[serde(default = "default_window_seconds")]
    pub rate_limit_window_seconds: u64,
    /// Caller-supplied client identity header, checked first for rate-limit keying
    #[serde(default = "default_client_id_header")]
    pub client_id_header: String,
    /// Forwarded-for chain header; its first address is the fallback client id
    #[serde(default = "default_forwarded_for_header")]
    pub forwarded_for_header: String,
    /// How often expired rate-limit buckets are swept
    #[serde(default = "default_sweep_interval")]
    pub bucket_sweep_interval_seconds: u64,
}

fn default_route_prefix() -> String {
    "/api/modules".to_string()
}

fn default_window_seconds() -> u64 {
    60
}

fn default_client_id_header() -> String {
    "x-client-id".to_string()
}

fn default_forwarded_for_header() -> String {
    "x-forwarded-for".to_string()
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            route_prefix: default_route_prefix(),
            rate_limit_window_seconds: default_window_seconds(),
            client_id_header: default_client_id_header(),
            forwarded_for_header: default_forwarded_for_header(),
            bucket_sweep_interval_seconds: default_sweep_interval(),
        }
    }
}
