//! Modules: manifests, lifecycle state, and the registry that owns them.

mod registry;
mod types;
mod validation;

pub use registry::ModuleRegistry;
pub use types::{
    Component, Dependency, Module, ModuleCategory, ModuleManifest, ModuleStatus, Permission, Route,
};
pub(crate) use validation::parse_method;
pub use validation::{is_compatible, validate_manifest, Version, VersionConstraint};
