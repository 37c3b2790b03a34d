//! Storage collaborator.
//!
//! The core never interprets what it persists or runs: module and tenant
//! config maps are handed over as-is, and migrations/seeds are referenced by
//! opaque name only.

use crate::config::ConfigMap;
use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

mod sqlite;

pub use sqlite::SqliteStorage;

/// Which kind of module script was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Migration,
    Seed,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::Migration => "migration",
            ScriptKind::Seed => "seed",
        }
    }
}

/// A migration or seed that ran for a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptRun {
    pub module_id: String,
    pub kind: ScriptKind,
    pub name: String,
}

/// Persistence and script execution backend.
pub trait Storage: Send + Sync {
    fn save_module_config(&self, module_id: &str, config: &ConfigMap) -> Result<()>;

    fn save_tenant_config(&self, tenant_id: &str, config: &ConfigMap) -> Result<()>;

    fn load_module_configs(&self) -> Result<Vec<(String, ConfigMap)>>;

    fn load_tenant_configs(&self) -> Result<Vec<(String, ConfigMap)>>;

    /// Execute the migration `name` on behalf of `module_id`.
    fn run_migration(&self, module_id: &str, name: &str) -> Result<()>;

    /// Execute the seed `name` on behalf of `module_id`.
    fn run_seed(&self, module_id: &str, name: &str) -> Result<()>;
}

/// In-memory storage. Records script runs instead of executing anything.
#[derive(Default)]
pub struct MemoryStorage {
    module_configs: Mutex<HashMap<String, ConfigMap>>,
    tenant_configs: Mutex<HashMap<String, ConfigMap>>,
    runs: Mutex<Vec<ScriptRun>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts executed so far, in execution order.
    pub fn script_runs(&self) -> Vec<ScriptRun> {
        self.runs.lock().clone()
    }

    fn record(&self, module_id: &str, kind: ScriptKind, name: &str) {
        self.runs.lock().push(ScriptRun {
            module_id: module_id.to_string(),
            kind,
            name: name.to_string(),
        });
    }
}

impl Storage for MemoryStorage {
    fn save_module_config(&self, module_id: &str, config: &ConfigMap) -> Result<()> {
        self.module_configs
            .lock()
            .insert(module_id.to_string(), config.clone());
        Ok(())
    }

    fn save_tenant_config(&self, tenant_id: &str, config: &ConfigMap) -> Result<()> {
        self.tenant_configs
            .lock()
            .insert(tenant_id.to_string(), config.clone());
        Ok(())
    }

    fn load_module_configs(&self) -> Result<Vec<(String, ConfigMap)>> {
        Ok(self
            .module_configs
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn load_tenant_configs(&self) -> Result<Vec<(String, ConfigMap)>> {
        Ok(self
            .tenant_configs
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn run_migration(&self, module_id: &str, name: &str) -> Result<()> {
        self.record(module_id, ScriptKind::Migration, name);
        Ok(())
    }

    fn run_seed(&self, module_id: &str, name: &str) -> Result<()> {
        self.record(module_id, ScriptKind::Seed, name);
        Ok(())
    }
}
