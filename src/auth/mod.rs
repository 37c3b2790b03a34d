//! Caller identity.
//!
//! The core does not authenticate anyone. It asks an [`IdentityResolver`] for
//! an already-resolved caller and only checks the returned permission set.

use crate::gateway::GatewayRequest;
use async_trait::async_trait;
use axum::http::HeaderMap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};


/// Resolved caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Caller {
    pub fn new(id: &str, permissions: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// True if the caller holds at least one of `required`.
    pub fn holds_any(&self, required: &[String]) -> bool {
        required.iter().any(|r| self.permissions.contains(r))
    }
}

/// Identity collaborator. `None` means "no permissions".
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, request: &GatewayRequest) -> Option<Caller>;
}

/// Resolver that never identifies anyone; permission-guarded routes are always denied.
pub struct NoIdentity;

#[async_trait]
impl IdentityResolver for NoIdentity {
    async fn resolve(&self, _request: &GatewayRequest) -> Option<Caller> {
        None
    }
}

/// Resolves callers from `Authorization: Bearer <token>` against a fixed token table.
///
/// Tokens are issued elsewhere; this only maps them to callers.
#[derive(Default)]
pub struct TokenIdentityResolver {
    tokens: DashMap<String, Caller>,
}

impl TokenIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: &str, caller: Caller) {
        self.tokens.insert(token.to_string(), caller);
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    pub fn lookup(&self, token: &str) -> Option<Caller> {
        self.tokens.get(token).map(|c| c.clone())
    }
}

#[async_trait]
impl IdentityResolver for TokenIdentityResolver {
    async fn resolve(&self, request: &GatewayRequest) -> Option<Caller> {
        let token = extract_bearer_token(&request.headers).ok()?;
        self.lookup(&token)
    }
}

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Returns the token string if present and valid.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    match token.trim() {
        "" => Err(TokenError::Empty),
        t => Ok(t.to_string()),
    }
}

/// Why a bearer token could not be read from a request.
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum TokenError {
    #[error("Authorization token not provided")]
    Missing,
    /// Not "Bearer <token>", or the header is not valid text
    #[error("Invalid authorization token format")]
    InvalidFormat,
    #[error("Authorization token is empty")]
    Empty,
}
