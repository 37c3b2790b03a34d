use super::*;
use crate::error::CoreError;
use crate::storage::{MemoryStorage, Storage};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

struct FailingStorage;

impl Storage for FailingStorage {
    fn save_module_config(&self, _: &str, _: &ConfigMap) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
    fn save_tenant_config(&self, _: &str, _: &ConfigMap) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
    fn load_module_configs(&self) -> anyhow::Result<Vec<(String, ConfigMap)>> {
        Ok(vec![])
    }
    fn load_tenant_configs(&self) -> anyhow::Result<Vec<(String, ConfigMap)>> {
        Ok(vec![])
    }
    fn run_migration(&self, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
    fn run_seed(&self, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

fn store() -> ConfigStore {
    ConfigStore::new(Arc::new(MemoryStorage::new()), ConfigMap::new())
}

#[test]
fn test_default_config() {
    let config = CoreConfig::default();
    assert_eq!(config.server.bind, "0.0.0.0:3000");
    assert_eq!(config.server.admin_token, None);
    assert_eq!(config.server.max_body_bytes, 1_048_576);
    assert_eq!(config.events.max_events, 1000);
    assert_eq!(config.gateway.route_prefix, "/api/modules");
    assert_eq!(config.gateway.rate_limit_window_seconds, 60);
    assert_eq!(config.gateway.client_id_header, "x-client-id");
    assert!(config.storage.sqlite_path.is_none());
}

#[test]
fn test_config_deserialization() {
    let toml = r#"
        [server]
        bind = "127.0.0.1:8080"
        admin_token = "secret"

        [events]
        max_events = 50

        [gateway]
        route_prefix = "/modules"
        rate_limit_window_seconds = 10

        [storage]
        sqlite_path = "/tmp/core.db"

        [system]
        app_name = "Portal"
        maintenance = false
    "#;

    let config: CoreConfig = toml::from_str(toml).unwrap();
    assert_eq!(config.server.bind, "127.0.0.1:8080");
    assert_eq!(config.server.admin_token.as_deref(), Some("secret"));
    assert_eq!(config.events.max_events, 50);
    assert_eq!(config.gateway.route_prefix, "/modules");
    assert_eq!(config.gateway.rate_limit_window_seconds, 10);
    assert_eq!(config.storage.sqlite_path.as_deref(), Some("/tmp/core.db"));
    assert_eq!(config.system["app_name"], json!("Portal"));
    assert_eq!(config.system["maintenance"], json!(false));
}

#[test]
fn test_partial_config() {
    let toml = r#"
        [events]
        max_events = 10
    "#;

    let config: CoreConfig = toml::from_str(toml).unwrap();
    assert_eq!(config.events.max_events, 10);
    assert_eq!(config.server.bind, "0.0.0.0:3000"); // Default
    assert_eq!(config.gateway.client_id_header, "x-client-id"); // Default
}

#[test]
fn test_load_config_missing_file() {
    let err = load_config("/nonexistent/modcore.toml").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/modcore.toml"));
}

#[test]
fn test_system_layer_last_write_wins() {
    let store = store();
    store.update_system_config("locale", json!("en"));
    store.update_system_config("locale", json!("de"));
    assert_eq!(store.get_system_value("locale"), Some(json!("de")));
    assert_eq!(store.get_system_config().len(), 1);
}

#[test]
fn test_module_write_persists_and_notifies() {
    let storage = Arc::new(MemoryStorage::new());
    let store = ConfigStore::new(storage.clone(), ConfigMap::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    store.watch("module.crm", move |change| {
        seen_clone.lock().push(change.clone());
        Ok(())
    });
    let other = Arc::new(Mutex::new(0));
    let other_clone = other.clone();
    store.watch("module.billing", move |_| {
        *other_clone.lock() += 1;
        Ok(())
    });

    store.update_module_config("crm", "pageSize", json!(25)).unwrap();
    store.update_module_config("crm", "pageSize", json!(50)).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].path, "module.crm");
    assert_eq!(seen[1].previous, Some(json!(25)));
    assert_eq!(seen[1].value, json!(50));
    assert_eq!(*other.lock(), 0);

    let persisted = storage.load_module_configs().unwrap();
    assert_eq!(persisted[0].1["pageSize"], json!(50));
}

#[test]
fn test_storage_failure_leaves_layer_unchanged() {
    let store = ConfigStore::new(Arc::new(FailingStorage), ConfigMap::new());
    let notified = Arc::new(Mutex::new(false));
    let notified_clone = notified.clone();
    store.watch("tenant.acme", move |_| {
        *notified_clone.lock() = true;
        Ok(())
    });

    let err = store
        .update_tenant_config("acme", "branding", json!({"color": "red"}))
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
    assert!(store.get_tenant_config("acme").is_empty());
    assert!(!*notified.lock());
}

#[test]
fn test_failing_watcher_does_not_abort_write() {
    let store = store();
    let calls = Arc::new(Mutex::new(0));

    store.watch("system", |_| anyhow::bail!("watcher broke"));
    store.watch("system", |_| panic!("watcher panicked"));
    let calls_clone = calls.clone();
    store.watch("system", move |_| {
        *calls_clone.lock() += 1;
        Ok(())
    });

    store.update_system_config("theme", json!("dark"));

    assert_eq!(store.get_system_value("theme"), Some(json!("dark")));
    assert_eq!(*calls.lock(), 1);
}

#[test]
fn test_unwatch() {
    let store = store();
    let calls = Arc::new(Mutex::new(0));
    let calls_clone = calls.clone();
    let id = store.watch("system", move |_| {
        *calls_clone.lock() += 1;
        Ok(())
    });

    assert!(store.unwatch(id));
    assert!(!store.unwatch(id));
    store.update_system_config("theme", json!("dark"));
    assert_eq!(*calls.lock(), 0);
}

#[test]
fn test_tenant_module_toggles_and_branding() {
    let store = store();
    store
        .update_tenant_config("acme", "modules", json!({"crm": false, "analytics": true}))
        .unwrap();
    store
        .update_tenant_config("acme", "branding", json!({"primaryColor": "#0044ff"}))
        .unwrap();

    assert!(!store.is_module_enabled_for_tenant("acme", "crm"));
    assert!(store.is_module_enabled_for_tenant("acme", "analytics"));
    assert!(store.is_module_enabled_for_tenant("acme", "billing"));
    assert!(store.is_module_enabled_for_tenant("globex", "crm"));
    assert_eq!(store.tenant_branding("acme")["primaryColor"], json!("#0044ff"));
}

#[test]
fn test_seed_defaults_keep_existing_values() {
    let store = store();
    store.update_module_config("crm", "pageSize", json!(50)).unwrap();

    let defaults = json!({"pageSize": 25, "currency": "EUR"})
        .as_object()
        .cloned()
        .unwrap();
    store.seed_module_defaults("crm", &defaults);

    let config = store.get_module_config("crm");
    assert_eq!(config["pageSize"], json!(50));
    assert_eq!(config["currency"], json!("EUR"));
}

#[test]
fn test_load_persisted_overrides_defaults() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .save_module_config("crm", &json!({"pageSize": 100}).as_object().cloned().unwrap())
        .unwrap();
    let store = ConfigStore::new(storage, ConfigMap::new());
    store.seed_module_defaults(
        "crm",
        &json!({"pageSize": 25, "currency": "EUR"}).as_object().cloned().unwrap(),
    );

    assert_eq!(store.load_persisted().unwrap(), 1);
    let config = store.get_module_config("crm");
    assert_eq!(config["pageSize"], json!(100));
    assert_eq!(config["currency"], json!("EUR"));
}
