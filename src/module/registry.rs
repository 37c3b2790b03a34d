use super::validation::{is_compatible, validate_manifest};
use super::{Module, ModuleCategory, ModuleManifest, Route};
use crate::config::ConfigStore;
use crate::error::{CoreError, CoreResult};
use crate::event::{EventBus, SYSTEM_SOURCE};
use crate::gateway::{Gateway, HandlerSet, ModuleResolver, RouteHandler};
use crate::storage::Storage;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

struct ModuleEntry {
    module: Module,
    handlers: HandlerSet,
}

#[derive(Default)]
struct ModuleTable {
    entries: HashMap<String, ModuleEntry>,
    /// Registration order, for stable listings
    order: Vec<String>,
}

impl ModuleTable {
    fn ordered(&self) -> impl Iterator<Item = &Module> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|e| &e.module)
    }

    fn active_dependents(&self, module_id: &str) -> Vec<String> {
        self.ordered()
            .filter(|m| m.is_active() && m.manifest().depends_on(module_id))
            .map(|m| m.id().to_string())
            .collect()
    }
}

/// Owns installed modules and drives their lifecycle.
///
/// Lifecycle events are emitted after the module table lock is released, so
/// event handlers may call back into the registry.
pub struct ModuleRegistry {
    modules: RwLock<ModuleTable>,
    events: Arc<EventBus>,
    gateway: Arc<Gateway>,
    config: Arc<ConfigStore>,
    storage: Arc<dyn Storage>,
}

impl ModuleRegistry {
    pub fn new(
        events: Arc<EventBus>,
        gateway: Arc<Gateway>,
        config: Arc<ConfigStore>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            modules: RwLock::new(ModuleTable::default()),
            events,
            gateway,
            config,
            storage,
        }
    }

    /// Validate and install a module with `status=installed`.
    ///
    /// Runs the module's migrations and seeds, mounts its routes and seeds
    /// its config defaults. Mounted routes are rolled back if a later route
    /// cannot be registered.
    pub fn register(&self, manifest: ModuleManifest, handlers: HandlerSet) -> CoreResult<Module> {
        validate_manifest(&manifest, &handlers)?;

        if self.modules.read().entries.contains_key(&manifest.id) {
            return Err(CoreError::Conflict(format!(
                "module '{}' is already registered",
                manifest.id
            )));
        }

        self.check_dependencies(&manifest)?;
        self.run_scripts(&manifest)?;
        let mounted = self.mount_routes(&manifest)?;
        self.config
            .seed_module_defaults(&manifest.id, &manifest.settings);

        let module_id = manifest.id.clone();
        let module = Module::installed(manifest, Utc::now());
        {
            let mut table = self.modules.write();
            if table.entries.contains_key(&module_id) {
                drop(table);
                self.unmount_routes(&module_id, &mounted);
                return Err(CoreError::Conflict(format!(
                    "module '{}' is already registered",
                    module_id
                )));
            }
            table.entries.insert(
                module_id.clone(),
                ModuleEntry {
                    module: module.clone(),
                    handlers,
                },
            );
            table.order.push(module_id.clone());
        }

        info!(
            module_id = %module_id,
            version = %module.version(),
            routes = mounted.len(),
            "Module registered"
        );
        self.events.emit(
            "module.registered",
            json!({ "moduleId": module_id, "version": module.version() }),
            Some(SYSTEM_SOURCE),
            Some(&module_id),
        );
        Ok(module)
    }

    /// Remove a module, deactivating it first if it is active.
    pub fn unregister(&self, module_id: &str) -> CoreResult<()> {
        let is_active = self
            .modules
            .read()
            .entries
            .get(module_id)
            .map(|e| e.module.is_active())
            .ok_or_else(|| not_found(module_id))?;

        if is_active {
            self.deactivate(module_id)?;
        }

        let removed = {
            let mut table = self.modules.write();
            table.order.retain(|id| id != module_id);
            table.entries.remove(module_id)
        };
        if removed.is_none() {
            return Err(not_found(module_id));
        }

        self.gateway.unregister_module_routes(module_id);

        info!(module_id = %module_id, "Module unregistered");
        self.events.emit(
            "module.unregistered",
            json!({ "moduleId": module_id }),
            Some(SYSTEM_SOURCE),
            Some(module_id),
        );
        Ok(())
    }

    /// Activate a module. Every declared dependency must already be active.
    ///
    /// On failure the module moves to `error` with the message recorded.
    pub fn activate(&self, module_id: &str) -> CoreResult<Module> {
        let now = Utc::now();
        let outcome = {
            let mut guard = self.modules.write();
            let table = &mut *guard;
            let entry = table
                .entries
                .get(module_id)
                .ok_or_else(|| not_found(module_id))?;
            if entry.module.is_active() {
                return Ok(entry.module.clone());
            }

            let inactive: Vec<String> = entry
                .module
                .manifest()
                .dependencies
                .iter()
                .filter(|dep| {
                    !table
                        .entries
                        .get(&dep.module_id)
                        .map_or(false, |e| e.module.is_active())
                })
                .map(|dep| dep.module_id.clone())
                .collect();

            let entry = table
                .entries
                .get_mut(module_id)
                .ok_or_else(|| not_found(module_id))?;
            if inactive.is_empty() {
                entry.module.mark_active(now);
                Ok(entry.module.clone())
            } else {
                let message = format!(
                    "module '{}' cannot activate: dependencies not active: {}",
                    module_id,
                    inactive.join(", ")
                );
                entry.module.mark_error(message.clone(), now);
                Err(message)
            }
        };

        match outcome {
            Ok(module) => {
                info!(module_id = %module_id, "Module activated");
                self.events.emit(
                    "module.activated",
                    json!({ "moduleId": module_id }),
                    Some(SYSTEM_SOURCE),
                    Some(module_id),
                );
                Ok(module)
            }
            Err(message) => {
                warn!(module_id = %module_id, error = %message, "Module activation failed");
                self.events.emit(
                    "module.error",
                    json!({ "moduleId": module_id, "error": message }),
                    Some(SYSTEM_SOURCE),
                    Some(module_id),
                );
                Err(CoreError::Dependency(message))
            }
        }
    }

    /// Deactivate a module. Refused while any other active module depends on it,
    /// in which case its status is left as it was.
    pub fn deactivate(&self, module_id: &str) -> CoreResult<Module> {
        let now = Utc::now();
        let module = {
            let mut guard = self.modules.write();
            let table = &mut *guard;
            let entry = table
                .entries
                .get(module_id)
                .ok_or_else(|| not_found(module_id))?;
            if !entry.module.is_active() {
                return Ok(entry.module.clone());
            }

            let dependents = table.active_dependents(module_id);
            if !dependents.is_empty() {
                let message = format!(
                    "module '{}' is required by active modules: {}",
                    module_id,
                    dependents.join(", ")
                );
                warn!(module_id = %module_id, error = %message, "Module deactivation refused");
                return Err(CoreError::Dependents(message));
            }

            let entry = table
                .entries
                .get_mut(module_id)
                .ok_or_else(|| not_found(module_id))?;
            entry.module.mark_inactive(now);
            entry.module.clone()
        };

        info!(module_id = %module_id, "Module deactivated");
        self.events.emit(
            "module.deactivated",
            json!({ "moduleId": module_id }),
            Some(SYSTEM_SOURCE),
            Some(module_id),
        );
        Ok(module)
    }

    /// Deactivate every active module, dependents before their dependencies.
    ///
    /// Returns the ids in the order they were deactivated.
    pub fn deactivate_all(&self) -> Vec<String> {
        let mut deactivated = Vec::new();
        loop {
            let ready: Vec<String> = {
                let table = self.modules.read();
                table
                    .ordered()
                    .filter(|m| m.is_active() && table.active_dependents(m.id()).is_empty())
                    .map(|m| m.id().to_string())
                    .collect()
            };
            if ready.is_empty() {
                break;
            }

            let mut progressed = false;
            for module_id in ready {
                match self.deactivate(&module_id) {
                    Ok(_) => {
                        deactivated.push(module_id);
                        progressed = true;
                    }
                    Err(e) => {
                        warn!(module_id = %module_id, error = %e, "Failed to deactivate module")
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        deactivated
    }

    pub fn get_module(&self, module_id: &str) -> Option<Module> {
        self.modules
            .read()
            .entries
            .get(module_id)
            .map(|e| e.module.clone())
    }

    /// All modules in registration order.
    pub fn list_modules(&self) -> Vec<Module> {
        self.modules.read().ordered().cloned().collect()
    }

    pub fn get_active_modules(&self) -> Vec<Module> {
        self.modules
            .read()
            .ordered()
            .filter(|m| m.is_active())
            .cloned()
            .collect()
    }

    pub fn get_modules_by_category(&self, category: ModuleCategory) -> Vec<Module> {
        self.modules
            .read()
            .ordered()
            .filter(|m| m.manifest().category == Some(category))
            .cloned()
            .collect()
    }

    /// Ids of every module declaring a dependency on `module_id`, in any state.
    pub fn dependents_of(&self, module_id: &str) -> Vec<String> {
        self.modules
            .read()
            .ordered()
            .filter(|m| m.manifest().depends_on(module_id))
            .map(|m| m.id().to_string())
            .collect()
    }

    pub fn module_count(&self) -> usize {
        self.modules.read().entries.len()
    }

    /// Required dependencies must be installed with a compatible version.
    /// Optional ones only warn.
    fn check_dependencies(&self, manifest: &ModuleManifest) -> CoreResult<()> {
        let table = self.modules.read();
        for dep in &manifest.dependencies {
            let problem = match table.entries.get(&dep.module_id) {
                None => format!("'{}' is not registered", dep.module_id),
                Some(entry) if !is_compatible(entry.module.version(), &dep.version_constraint) => {
                    format!(
                        "'{}' is at {}, which does not satisfy '{}'",
                        dep.module_id,
                        entry.module.version(),
                        dep.version_constraint
                    )
                }
                Some(_) => continue,
            };

            if dep.required {
                return Err(CoreError::Dependency(format!(
                    "module '{}' requires {}",
                    manifest.id, problem
                )));
            }
            warn!(
                module_id = %manifest.id,
                dependency = %dep.module_id,
                "Optional dependency unavailable: {}",
                problem
            );
        }
        Ok(())
    }

    fn run_scripts(&self, manifest: &ModuleManifest) -> CoreResult<()> {
        for name in &manifest.migrations {
            self.storage
                .run_migration(&manifest.id, name)
                .map_err(|e| {
                    CoreError::Storage(format!("migration '{}' for '{}': {:#}", name, manifest.id, e))
                })?;
        }
        for name in &manifest.seeds {
            self.storage.run_seed(&manifest.id, name).map_err(|e| {
                CoreError::Storage(format!("seed '{}' for '{}': {:#}", name, manifest.id, e))
            })?;
        }
        Ok(())
    }

    fn mount_routes(&self, manifest: &ModuleManifest) -> CoreResult<Vec<Route>> {
        let mut mounted = Vec::with_capacity(manifest.routes.len());
        for route in &manifest.routes {
            if let Err(e) = self.gateway.register_route(&manifest.id, route) {
                self.unmount_routes(&manifest.id, &mounted);
                return Err(e);
            }
            mounted.push(route.clone());
        }
        Ok(mounted)
    }

    fn unmount_routes(&self, module_id: &str, routes: &[Route]) {
        for route in routes {
            self.gateway.unregister_route(module_id, route);
        }
    }
}

impl ModuleResolver for ModuleRegistry {
    fn contains_module(&self, module_id: &str) -> bool {
        self.modules.read().entries.contains_key(module_id)
    }

    fn resolve_handler(&self, module_id: &str, handler: &str) -> Option<Arc<dyn RouteHandler>> {
        self.modules
            .read()
            .entries
            .get(module_id)
            .and_then(|e| e.handlers.get(handler))
    }
}

fn not_found(module_id: &str) -> CoreError {
    CoreError::NotFound(format!("module '{}'", module_id))
}
