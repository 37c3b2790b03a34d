use axum::http::StatusCode;
use thiserror::Error;

/// Errors surfaced by lifecycle operations, config writes and the request pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Malformed module definition or malformed request body
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or incompatible dependency, or dependency not active
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Module is still required by active dependents
    #[error("dependents error: {0}")]
    Dependents(String),

    /// Unknown module or unmatched route
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller lacks every permission the route accepts
    #[error("forbidden: {0}")]
    Authorization(String),

    /// Fixed window exhausted for this client and route
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    /// Module handler failed
    #[error("handler error: {0}")]
    Handler(String),

    /// Storage collaborator failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Duplicate module id or route
    #[error("conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    /// HTTP-style status used when the error leaves the core.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Dependency(_) | CoreError::Dependents(_) | CoreError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Authorization(_) => StatusCode::FORBIDDEN,
            CoreError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Handler(_) | CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind, used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::Dependency(_) => "dependency",
            CoreError::Dependents(_) => "dependents",
            CoreError::NotFound(_) => "not_found",
            CoreError::Authorization(_) => "authorization",
            CoreError::RateLimit { .. } => "rate_limit",
            CoreError::Handler(_) => "handler",
            CoreError::Storage(_) => "storage",
            CoreError::Conflict(_) => "conflict",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
