use crate::config::ConfigMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Closed set of module categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleCategory {
    Crm,
    Analytics,
    Integration,
    Communication,
    Marketing,
    Finance,
    Productivity,
    Utility,
}

impl ModuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleCategory::Crm => "crm",
            ModuleCategory::Analytics => "analytics",
            ModuleCategory::Integration => "integration",
            ModuleCategory::Communication => "communication",
            ModuleCategory::Marketing => "marketing",
            ModuleCategory::Finance => "finance",
            ModuleCategory::Productivity => "productivity",
            ModuleCategory::Utility => "utility",
        }
    }
}

impl fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crm" => Ok(ModuleCategory::Crm),
            "analytics" => Ok(ModuleCategory::Analytics),
            "integration" => Ok(ModuleCategory::Integration),
            "communication" => Ok(ModuleCategory::Communication),
            "marketing" => Ok(ModuleCategory::Marketing),
            "finance" => Ok(ModuleCategory::Finance),
            "productivity" => Ok(ModuleCategory::Productivity),
            "utility" => Ok(ModuleCategory::Utility),
            other => Err(format!("unknown module category '{}'", other)),
        }
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Installed,
    Active,
    Inactive,
    Error,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleStatus::Installed => "installed",
            ModuleStatus::Active => "active",
            ModuleStatus::Inactive => "inactive",
            ModuleStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Declared requirement on another module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub module_id: String,
    /// e.g. ">=1.2.0", "^1.0.0", "*"
    #[serde(default = "any_version")]
    pub version_constraint: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn any_version() -> String {
    "*".to_string()
}

fn default_required() -> bool {
    true
}

impl Dependency {
    pub fn required(module_id: &str, version_constraint: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            version_constraint: version_constraint.to_string(),
            required: true,
        }
    }

    pub fn optional(module_id: &str, version_constraint: &str) -> Self {
        Self {
            required: false,
            ..Self::required(module_id, version_constraint)
        }
    }
}

/// Method + path pattern owned by a module.
///
/// `path` is relative to the module's prefix and may contain `:param` segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub path: String,
    pub method: String,
    /// Name resolved against the owning module's handler set
    pub handler: String,
    #[serde(default)]
    pub middleware: Vec<String>,
    /// Any-of permission set; empty means unguarded
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Max requests per client per window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u64>,
}

impl Route {
    pub fn new(method: &str, path: &str, handler: &str) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_ascii_uppercase(),
            handler: handler.to_string(),
            middleware: Vec::new(),
            permissions: Vec::new(),
            rate_limit: None,
        }
    }

    pub fn with_middleware(mut self, names: &[&str]) -> Self {
        self.middleware = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_rate_limit(mut self, max_requests: u64) -> Self {
        self.rate_limit = Some(max_requests);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// UI component declaration, forwarded untouched to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Everything a module declares about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Three-part numeric version ("1.2.3")
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub category: Option<ModuleCategory>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub components: Vec<Component>,
    /// Default module settings, seeded into the module config layer
    #[serde(default)]
    pub settings: ConfigMap,
    /// Opaque migration names, run in order at registration
    #[serde(default)]
    pub migrations: Vec<String>,
    /// Opaque seed names, run after migrations
    #[serde(default)]
    pub seeds: Vec<String>,
}

impl ModuleManifest {
    pub fn new(id: &str, name: &str, version: &str, category: ModuleCategory) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            description: String::new(),
            author: String::new(),
            category: Some(category),
            dependencies: Vec::new(),
            routes: Vec::new(),
            permissions: Vec::new(),
            components: Vec::new(),
            settings: ConfigMap::new(),
            migrations: Vec::new(),
            seeds: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn with_permission(mut self, name: &str, description: &str) -> Self {
        self.permissions.push(Permission {
            name: name.to_string(),
            description: Some(description.to_string()),
        });
        self
    }

    pub fn with_component(mut self, name: &str, path: &str, kind: &str) -> Self {
        self.components.push(Component {
            name: name.to_string(),
            path: path.to_string(),
            kind: kind.to_string(),
        });
        self
    }

    pub fn with_setting(mut self, key: &str, value: Value) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }

    pub fn with_migration(mut self, name: &str) -> Self {
        self.migrations.push(name.to_string());
        self
    }

    pub fn with_seed(mut self, name: &str) -> Self {
        self.seeds.push(name.to_string());
        self
    }

    pub fn depends_on(&self, module_id: &str) -> bool {
        self.dependencies.iter().any(|d| d.module_id == module_id)
    }
}

/// A registered module and its lifecycle state.
///
/// `activated_at` is set exactly while the status is `Active`, and `error` exactly
/// while it is `Error`; only the transition methods below change either.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    #[serde(flatten)]
    manifest: ModuleManifest,
    status: ModuleStatus,
    installed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    activated_at: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Module {
    pub(crate) fn installed(manifest: ModuleManifest, now: DateTime<Utc>) -> Self {
        Self {
            manifest,
            status: ModuleStatus::Installed,
            installed_at: now,
            activated_at: None,
            last_updated: now,
            error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    pub fn status(&self) -> ModuleStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == ModuleStatus::Active
    }

    pub fn installed_at(&self) -> DateTime<Utc> {
        self.installed_at
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.activated_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn mark_active(&mut self, now: DateTime<Utc>) {
        self.status = ModuleStatus::Active;
        self.activated_at = Some(now);
        self.error = None;
        self.last_updated = now;
    }

    pub(crate) fn mark_inactive(&mut self, now: DateTime<Utc>) {
        self.status = ModuleStatus::Inactive;
        self.activated_at = None;
        self.error = None;
        self.last_updated = now;
    }

    pub(crate) fn mark_error(&mut self, message: String, now: DateTime<Utc>) {
        self.status = ModuleStatus::Error;
        self.activated_at = None;
        self.error = Some(message);
        self.last_updated = now;
    }
}
