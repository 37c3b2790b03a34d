//! SQLite-backed storage.
//!
//! Config maps are stored as JSON text. Scripts are registered by name with
//! their SQL body; each (module, kind, name) runs at most once.

use super::{ScriptKind, Storage};
use crate::config::ConfigMap;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// # Schema
/// ```sql
/// CREATE TABLE module_config (module_id TEXT PRIMARY KEY, config TEXT NOT NULL, updated_at TEXT NOT NULL);
/// CREATE TABLE tenant_config (tenant_id TEXT PRIMARY KEY, config TEXT NOT NULL, updated_at TEXT NOT NULL);
/// CREATE TABLE script_runs (
///     module_id TEXT NOT NULL,
///     kind TEXT NOT NULL,        -- "migration" | "seed"
///     name TEXT NOT NULL,
///     executed_at TEXT NOT NULL, -- ISO 8601 timestamp
///     UNIQUE(module_id, kind, name)
/// );
/// ```
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    scripts: RwLock<HashMap<String, String>>,
}

impl SqliteStorage {
    /// Creates or opens a storage database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS module_config (
                module_id TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tenant_config (
                tenant_id TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS script_runs (
                module_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                executed_at TEXT NOT NULL,
                UNIQUE(module_id, kind, name)
            );
            "#,
        )
        .context("Failed to create storage schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            scripts: RwLock::new(HashMap::new()),
        })
    }

    /// Make a SQL script available to migrations and seeds under `name`.
    pub fn register_script(&self, name: &str, sql: &str) {
        self.scripts
            .write()
            .insert(name.to_string(), sql.to_string());
    }

    /// Names of scripts already executed for a module, in execution order.
    pub fn executed_scripts(&self, module_id: &str, kind: ScriptKind) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM script_runs WHERE module_id = ?1 AND kind = ?2 ORDER BY rowid",
        )?;
        let names = stmt
            .query_map(params![module_id, kind.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn run_script(&self, module_id: &str, kind: ScriptKind, name: &str) -> Result<()> {
        let sql = self
            .scripts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no {} script registered under '{}'", kind.as_str(), name))?;

        let mut conn = self.conn.lock();
        let already_run: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM script_runs WHERE module_id = ?1 AND kind = ?2 AND name = ?3)",
                params![module_id, kind.as_str(), name],
                |row| row.get(0),
            )
            .context("Failed to query script runs")?;
        if already_run {
            debug!(module_id = %module_id, kind = kind.as_str(), script = %name, "Script already executed, skipping");
            return Ok(());
        }

        let tx = conn.transaction()?;
        tx.execute_batch(&sql)
            .with_context(|| format!("{} '{}' failed for module '{}'", kind.as_str(), name, module_id))?;
        tx.execute(
            "INSERT INTO script_runs (module_id, kind, name, executed_at) VALUES (?1, ?2, ?3, ?4)",
            params![module_id, kind.as_str(), name, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        info!(module_id = %module_id, kind = kind.as_str(), script = %name, "Script executed");
        Ok(())
    }

    fn save_config(&self, table: &str, key_column: &str, key: &str, config: &ConfigMap) -> Result<()> {
        let json = serde_json::to_string(config).context("Failed to serialize config")?;
        let sql = format!(
            "INSERT INTO {table} ({key_column}, config, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT({key_column}) DO UPDATE SET config = excluded.config, updated_at = excluded.updated_at"
        );
        self.conn
            .lock()
            .execute(&sql, params![key, json, Utc::now().to_rfc3339()])
            .with_context(|| format!("Failed to save {table} for '{key}'"))?;
        Ok(())
    }

    fn load_configs(&self, table: &str, key_column: &str) -> Result<Vec<(String, ConfigMap)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {key_column}, config FROM {table}"))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(key, json)| {
                let config: ConfigMap = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt {table} row for '{key}'"))?;
                Ok((key, config))
            })
            .collect()
    }
}

impl Storage for SqliteStorage {
    fn save_module_config(&self, module_id: &str, config: &ConfigMap) -> Result<()> {
        self.save_config("module_config", "module_id", module_id, config)
    }

    fn save_tenant_config(&self, tenant_id: &str, config: &ConfigMap) -> Result<()> {
        self.save_config("tenant_config", "tenant_id", tenant_id, config)
    }

    fn load_module_configs(&self) -> Result<Vec<(String, ConfigMap)>> {
        self.load_configs("module_config", "module_id")
    }

    fn load_tenant_configs(&self) -> Result<Vec<(String, ConfigMap)>> {
        self.load_configs("tenant_config", "tenant_id")
    }

    fn run_migration(&self, module_id: &str, name: &str) -> Result<()> {
        self.run_script(module_id, ScriptKind::Migration, name)
    }

    fn run_seed(&self, module_id: &str, name: &str) -> Result<()> {
        self.run_script(module_id, ScriptKind::Seed, name)
    }
}
