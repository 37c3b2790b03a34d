use super::GatewayConfig;
use crate::auth::Caller;
use crate::error::CoreError;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Client id used when the request carries no identity at all.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Transport-independent inbound request.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    /// Path without query string
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Raw body as received
    pub body: Bytes,
    /// Body parsed by the validation step (`null` until then, or when empty)
    pub parsed_body: Value,
    /// Values of `:param` segments, filled when the route is resolved
    pub params: HashMap<String, String>,
    /// Filled by the authorization step on permission-guarded routes
    pub caller: Option<Caller>,
}

impl GatewayRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            parsed_body: Value::Null,
            params: HashMap::new(),
            caller: None,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn with_body(mut self, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.body = body.into();
        self
    }

    /// JSON body with matching content type.
    pub fn with_json(self, value: &Value) -> Self {
        self.with_body("application/json", value.to_string())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Media type without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.header(header::CONTENT_TYPE.as_str()).map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Whether the validation step must parse the body for this method.
    pub fn carries_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }

    /// Rate-limit identity: the client id header, else the first forwarded-for
    /// address, else "unknown".
    pub fn client_id(&self, config: &GatewayConfig) -> String {
        if let Some(id) = self
            .header(&config.client_id_header)
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            return id.to_string();
        }

        self.header(&config.forwarded_for_header)
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }

    /// Parse the body according to its declared content type.
    ///
    /// - `application/json`, `*+json`, or no content type: JSON
    /// - `application/x-www-form-urlencoded`: flat string map
    /// - `text/*`: UTF-8 string
    ///
    /// An empty body parses to `null`.
    pub fn parse_body(&self) -> Result<Value, CoreError> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }

        match self.content_type().as_deref() {
            None | Some("application/json") => parse_json(&self.body),
            Some(ct) if ct.ends_with("+json") => parse_json(&self.body),
            Some("application/x-www-form-urlencoded") => {
                let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&self.body)
                    .map_err(|e| CoreError::Validation(format!("malformed form body: {}", e)))?;
                let map: Map<String, Value> = pairs
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                Ok(Value::Object(map))
            }
            Some(ct) if ct.starts_with("text/") => std::str::from_utf8(&self.body)
                .map(|s| Value::String(s.to_string()))
                .map_err(|e| CoreError::Validation(format!("body is not valid UTF-8: {}", e))),
            Some(other) => Err(CoreError::Validation(format!(
                "unsupported content type '{}'",
                other
            ))),
        }
    }
}

fn parse_json(body: &[u8]) -> Result<Value, CoreError> {
    serde_json::from_slice(body)
        .map_err(|e| CoreError::Validation(format!("malformed JSON body: {}", e)))
}

/// Uniform pipeline outcome: a status and a JSON body.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub body: Value,
    pub headers: HeaderMap,
}

impl GatewayResponse {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body,
            headers: HeaderMap::new(),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn error(status: StatusCode, message: &str) -> Self {
        Self::new(status, json!({ "error": message }))
    }

    /// Map a pipeline error to its fixed status and a generic message.
    ///
    /// Internal details stay in the logs.
    pub fn from_error(err: &CoreError) -> Self {
        let message = match err {
            CoreError::Validation(_) => "Invalid request",
            CoreError::NotFound(_) => "Not found",
            CoreError::Authorization(_) => "Insufficient permissions",
            CoreError::RateLimit { .. } => "Too many requests",
            CoreError::Dependency(_) | CoreError::Dependents(_) | CoreError::Conflict(_) => {
                "Conflict"
            }
            CoreError::Handler(_) | CoreError::Storage(_) => "Internal server error",
        };
        let mut response = Self::error(err.status_code(), message);
        if let CoreError::RateLimit { retry_after_secs } = err {
            response
                .headers
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
        response
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
