//! Layered configuration: system, per-module and per-tenant.
//!
//! Every write notifies the watchers registered under the written path
//! ("system", "module.{id}" or "tenant.{id}") synchronously, after the value
//! is applied.

use super::ConfigMap;
use crate::error::{CoreError, CoreResult};
use crate::event::panic_message;
use crate::storage::Storage;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

pub const SYSTEM_PATH: &str = "system";

/// Tenant config key holding per-module on/off toggles.
pub const TENANT_MODULES_KEY: &str = "modules";

/// Tenant config key holding branding settings.
pub const TENANT_BRANDING_KEY: &str = "branding";

/// Notification passed to watchers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange {
    pub path: String,
    pub key: String,
    pub value: Value,
    pub previous: Option<Value>,
}

pub type ConfigWatcher = Arc<dyn Fn(&ConfigChange) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

pub struct ConfigStore {
    system: RwLock<ConfigMap>,
    modules: DashMap<String, ConfigMap>,
    tenants: DashMap<String, ConfigMap>,
    watchers: RwLock<HashMap<String, Vec<(WatchId, ConfigWatcher)>>>,
    storage: Arc<dyn Storage>,
    next_id: AtomicU64,
}

pub fn module_path(module_id: &str) -> String {
    format!("module.{}", module_id)
}

pub fn tenant_path(tenant_id: &str) -> String {
    format!("tenant.{}", tenant_id)
}

impl ConfigStore {
    pub fn new(storage: Arc<dyn Storage>, system: ConfigMap) -> Self {
        Self {
            system: RwLock::new(system),
            modules: DashMap::new(),
            tenants: DashMap::new(),
            watchers: RwLock::new(HashMap::new()),
            storage,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn get_system_config(&self) -> ConfigMap {
        self.system.read().clone()
    }

    pub fn get_system_value(&self, key: &str) -> Option<Value> {
        self.system.read().get(key).cloned()
    }

    /// Overwrite a system key. The system layer lives in memory only.
    pub fn update_system_config(&self, key: &str, value: Value) {
        let previous = self.system.write().insert(key.to_string(), value.clone());
        self.notify(SYSTEM_PATH, key, value, previous);
    }

    /// Module layer for `module_id`; empty if nothing was ever written.
    pub fn get_module_config(&self, module_id: &str) -> ConfigMap {
        self.modules
            .get(module_id)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Overwrite a module key, persisting the whole layer first.
    ///
    /// A storage failure leaves the in-memory layer untouched.
    pub fn update_module_config(&self, module_id: &str, key: &str, value: Value) -> CoreResult<()> {
        let previous = {
            let mut entry = self.modules.entry(module_id.to_string()).or_default();
            let mut next = entry.clone();
            let previous = next.insert(key.to_string(), value.clone());
            self.storage
                .save_module_config(module_id, &next)
                .map_err(|e| CoreError::Storage(e.to_string()))?;
            *entry = next;
            previous
        };
        self.notify(&module_path(module_id), key, value, previous);
        Ok(())
    }

    /// Fill in manifest defaults without overriding stored values. Not persisted.
    pub fn seed_module_defaults(&self, module_id: &str, defaults: &ConfigMap) {
        if defaults.is_empty() {
            return;
        }
        let mut entry = self.modules.entry(module_id.to_string()).or_default();
        for (key, value) in defaults {
            entry.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    pub fn get_tenant_config(&self, tenant_id: &str) -> ConfigMap {
        self.tenants
            .get(tenant_id)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Overwrite a tenant key, persisting the whole layer first.
    pub fn update_tenant_config(&self, tenant_id: &str, key: &str, value: Value) -> CoreResult<()> {
        let previous = {
            let mut entry = self.tenants.entry(tenant_id.to_string()).or_default();
            let mut next = entry.clone();
            let previous = next.insert(key.to_string(), value.clone());
            self.storage
                .save_tenant_config(tenant_id, &next)
                .map_err(|e| CoreError::Storage(e.to_string()))?;
            *entry = next;
            previous
        };
        self.notify(&tenant_path(tenant_id), key, value, previous);
        Ok(())
    }

    /// Branding settings of a tenant (empty when unset).
    pub fn tenant_branding(&self, tenant_id: &str) -> ConfigMap {
        self.tenants
            .get(tenant_id)
            .and_then(|c| c.get(TENANT_BRANDING_KEY).and_then(Value::as_object).cloned())
            .unwrap_or_default()
    }

    /// Per-tenant module toggle; modules are enabled unless switched off explicitly.
    pub fn is_module_enabled_for_tenant(&self, tenant_id: &str, module_id: &str) -> bool {
        self.tenants
            .get(tenant_id)
            .and_then(|c| {
                c.get(TENANT_MODULES_KEY)
                    .and_then(|m| m.get(module_id))
                    .and_then(Value::as_bool)
            })
            .unwrap_or(true)
    }

    /// Register a watcher for a config path.
    pub fn watch<F>(&self, path: &str, watcher: F) -> WatchId
    where
        F: Fn(&ConfigChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.watchers
            .write()
            .entry(path.to_string())
            .or_default()
            .push((id, Arc::new(watcher)));
        id
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        let mut watchers = self.watchers.write();
        let mut removed = false;
        for list in watchers.values_mut() {
            let before = list.len();
            list.retain(|(wid, _)| *wid != id);
            removed |= list.len() != before;
        }
        watchers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Restore module and tenant layers from storage. Returns the number of layers loaded.
    pub fn load_persisted(&self) -> CoreResult<usize> {
        let modules = self
            .storage
            .load_module_configs()
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        let tenants = self
            .storage
            .load_tenant_configs()
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        let count = modules.len() + tenants.len();
        // Persisted values win over manifest defaults seeded earlier
        for (id, config) in modules {
            self.modules.entry(id).or_default().extend(config);
        }
        for (id, config) in tenants {
            self.tenants.entry(id).or_default().extend(config);
        }
        info!(layers = count, "Loaded persisted config");
        Ok(count)
    }

    fn notify(&self, path: &str, key: &str, value: Value, previous: Option<Value>) {
        let watchers: Vec<(WatchId, ConfigWatcher)> = match self.watchers.read().get(path) {
            Some(list) => list.clone(),
            None => return,
        };

        let change = ConfigChange {
            path: path.to_string(),
            key: key.to_string(),
            value,
            previous,
        };
        debug!(path = %path, key = %key, watchers = watchers.len(), "Config changed");

        for (id, watcher) in watchers {
            match panic::catch_unwind(AssertUnwindSafe(|| watcher(&change))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(path = %path, key = %key, watch_id = id.0, error = %e, "Config watcher failed")
                }
                Err(payload) => error!(
                    path = %path,
                    key = %key,
                    watch_id = id.0,
                    panic = %panic_message(payload.as_ref()),
                    "Config watcher panicked"
                ),
            }
        }
    }
}
