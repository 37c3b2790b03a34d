// HTTP surface: admin API plus the gateway fallback

pub mod admin;
pub mod transport;

pub use admin::{create_admin_router, AdminAppState, EventFilter};
pub use transport::{create_gateway_router, to_gateway_request};

use crate::orchestrator::Core;
use axum::Router;
use std::sync::Arc;

/// Complete application router. Admin routes match first; everything else
/// goes through the gateway pipeline.
pub fn create_app(core: Arc<Core>) -> Router {
    let admin = create_admin_router(AdminAppState {
        core: core.clone(),
        admin_token: core.config().server.admin_token.clone(),
    });
    admin.merge(create_gateway_router(core))
}
