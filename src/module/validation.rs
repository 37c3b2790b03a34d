use super::ModuleManifest;
use crate::error::{CoreError, CoreResult};
use crate::gateway::HandlerSet;
use axum::http::Method;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

static VERSION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+\.[0-9]+\.[0-9]+$").expect("version pattern is valid"));

/// Validates a manifest against the handlers the module provides.
///
/// Validation rules:
/// - id, name, version and category are required
/// - version is three-part numeric ("1.2.3")
/// - dependency constraints parse and no module depends on itself
/// - every route has an absolute path, a known HTTP method and a handler
///   present in `handlers`
pub fn validate_manifest(manifest: &ModuleManifest, handlers: &HandlerSet) -> CoreResult<()> {
    if manifest.id.trim().is_empty() {
        return Err(CoreError::Validation("module id is required".to_string()));
    }
    if manifest.name.trim().is_empty() {
        return Err(invalid(manifest, "name is required"));
    }
    if manifest.version.trim().is_empty() {
        return Err(invalid(manifest, "version is required"));
    }
    if manifest.category.is_none() {
        return Err(invalid(manifest, "category is required"));
    }
    if !is_valid_id(&manifest.id) {
        return Err(invalid(
            manifest,
            "id must be lowercase letters, digits, '-' or '_'",
        ));
    }
    if !VERSION_REGEX.is_match(&manifest.version) {
        return Err(invalid(
            manifest,
            &format!("version '{}' must match MAJOR.MINOR.PATCH", manifest.version),
        ));
    }
    // Every registered version must be comparable by dependents
    Version::from_str(&manifest.version).map_err(|e| invalid(manifest, &e))?;

    for dep in &manifest.dependencies {
        if dep.module_id == manifest.id {
            return Err(invalid(manifest, "a module cannot depend on itself"));
        }
        VersionConstraint::from_str(&dep.version_constraint).map_err(|e| {
            invalid(manifest, &format!("dependency '{}': {}", dep.module_id, e))
        })?;
    }

    for route in &manifest.routes {
        if !route.path.starts_with('/') {
            return Err(invalid(
                manifest,
                &format!("route path '{}' must start with '/'", route.path),
            ));
        }
        parse_method(&route.method).map_err(|e| invalid(manifest, &e))?;
        if !handlers.contains(&route.handler) {
            return Err(invalid(
                manifest,
                &format!(
                    "route {} {} names handler '{}' which the module does not provide",
                    route.method, route.path, route.handler
                ),
            ));
        }
    }

    Ok(())
}

fn invalid(manifest: &ModuleManifest, reason: &str) -> CoreError {
    CoreError::Validation(format!("module '{}': {}", manifest.id, reason))
}

/// Ids end up as a URL path segment.
fn is_valid_id(id: &str) -> bool {
    id.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

pub(crate) fn parse_method(method: &str) -> Result<Method, String> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        "HEAD" => Ok(Method::HEAD),
        "OPTIONS" => Ok(Method::OPTIONS),
        other => Err(format!("unsupported HTTP method '{}'", other)),
    }
}

/// Three-part numeric version, compared component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !VERSION_REGEX.is_match(s) {
            return Err(format!("invalid version '{}'", s));
        }
        let mut parts = s.split('.').map(|p| p.parse::<u64>());
        match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch))) => Ok(Self {
                major,
                minor,
                patch,
            }),
            _ => Err(format!("invalid version '{}'", s)),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Dependency version requirement.
///
/// - `*` or empty: any version
/// - `1.2.0` or `>=1.2.0`: at least 1.2.0
/// - `=1.2.0`: exactly 1.2.0
/// - `^1.2.0`: at least 1.2.0, same major
/// - `~1.2.0`: at least 1.2.0, same major and minor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionConstraint {
    Any,
    AtLeast(Version),
    Exact(Version),
    Caret(Version),
    Tilde(Version),
}

impl FromStr for VersionConstraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }
        if let Some(rest) = s.strip_prefix(">=") {
            return rest.parse().map(VersionConstraint::AtLeast);
        }
        if let Some(rest) = s.strip_prefix('=') {
            return rest.parse().map(VersionConstraint::Exact);
        }
        if let Some(rest) = s.strip_prefix('^') {
            return rest.parse().map(VersionConstraint::Caret);
        }
        if let Some(rest) = s.strip_prefix('~') {
            return rest.parse().map(VersionConstraint::Tilde);
        }
        s.parse().map(VersionConstraint::AtLeast)
    }
}

impl VersionConstraint {
    pub fn allows(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::AtLeast(min) => version >= min,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::Caret(min) => version.major == min.major && version >= min,
            VersionConstraint::Tilde(min) => {
                version.major == min.major && version.minor == min.minor && version >= min
            }
        }
    }
}

/// Whether an installed version satisfies a declared constraint.
///
/// Numeric comparison: "1.10.0" satisfies ">=1.9.0".
pub fn is_compatible(installed: &str, constraint: &str) -> bool {
    match VersionConstraint::from_str(constraint) {
        Ok(VersionConstraint::Any) => true,
        Ok(c) => Version::from_str(installed).map_or(false, |v| c.allows(&v)),
        Err(_) => false,
    }
}
