use crate::error::{CoreError, CoreResult};
use crate::module::Route;
use axum::http::Method;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A route as mounted in the table, with its full path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub module_id: String,
    #[serde(skip)]
    pub method: Method,
    /// "{prefix}/{module_id}{route.path}", normalized
    pub path: String,
    pub route: Route,
    #[serde(skip)]
    segments: Vec<String>,
}

impl RouteInfo {
    fn is_pattern(&self) -> bool {
        self.segments.iter().any(|s| s.starts_with(':'))
    }

    /// Literal segments must match, `:name` segments capture.
    fn capture(&self, segments: &[&str]) -> Option<HashMap<String, String>> {
        if segments.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (pattern, actual) in self.segments.iter().zip(segments) {
            match pattern.strip_prefix(':') {
                Some(name) => {
                    params.insert(name.to_string(), actual.to_string());
                }
                None if pattern == actual => {}
                None => return None,
            }
        }
        Some(params)
    }
}

/// A successful lookup: the route plus its captured path params.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<RouteInfo>,
    pub params: HashMap<String, String>,
}

impl RouteMatch {
    pub fn module_id(&self) -> &str {
        &self.route.module_id
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Trailing slashes are insignificant; "" becomes "/".
pub(crate) fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn table_key(method: &Method, path: &str) -> String {
    format!("{} {}", method, path)
}

/// Route table keyed by (method, full path).
///
/// Lookup tries the exact key first, then scans pattern routes in
/// registration order. The first pattern that matches wins: overlapping
/// patterns (`/items/:id` vs `/items/:slug`) are not ranked by specificity.
#[derive(Default)]
pub(crate) struct RouteTable {
    by_key: HashMap<String, Arc<RouteInfo>>,
    ordered: Vec<Arc<RouteInfo>>,
}

impl RouteTable {
    pub fn insert(
        &mut self,
        module_id: &str,
        method: Method,
        full_path: String,
        route: &Route,
    ) -> CoreResult<Arc<RouteInfo>> {
        let key = table_key(&method, &full_path);
        if let Some(existing) = self.by_key.get(&key) {
            return Err(CoreError::Conflict(format!(
                "route {} already registered by module '{}'",
                key, existing.module_id
            )));
        }

        let info = Arc::new(RouteInfo {
            module_id: module_id.to_string(),
            method,
            segments: split_segments(&full_path)
                .into_iter()
                .map(str::to_string)
                .collect(),
            path: full_path,
            route: route.clone(),
        });
        self.by_key.insert(key, info.clone());
        self.ordered.push(info.clone());
        Ok(info)
    }

    pub fn remove(&mut self, method: &Method, full_path: &str) -> Option<Arc<RouteInfo>> {
        let removed = self.by_key.remove(&table_key(method, full_path))?;
        self.ordered.retain(|r| !Arc::ptr_eq(r, &removed));
        Some(removed)
    }

    pub fn remove_module(&mut self, module_id: &str) -> usize {
        let before = self.ordered.len();
        self.by_key.retain(|_, r| r.module_id != module_id);
        self.ordered.retain(|r| r.module_id != module_id);
        before - self.ordered.len()
    }

    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let path = normalize_path(path);
        // Pattern routes always go through capture so their params are filled
        if let Some(route) = self
            .by_key
            .get(&table_key(method, &path))
            .filter(|r| !r.is_pattern())
        {
            return Some(RouteMatch {
                route: route.clone(),
                params: HashMap::new(),
            });
        }

        let segments = split_segments(&path);
        self.ordered
            .iter()
            .filter(|r| r.method == *method && r.is_pattern())
            .find_map(|r| {
                r.capture(&segments).map(|params| RouteMatch {
                    route: r.clone(),
                    params,
                })
            })
    }

    pub fn routes(&self) -> Vec<Arc<RouteInfo>> {
        self.ordered.clone()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }
}
