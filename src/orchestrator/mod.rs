//! Composition root.
//!
//! [`Core`] wires the event bus, config store, gateway and module registry
//! together. It is built once by the application entry point and shared as
//! `Arc<Core>`; nothing here is global.

use crate::auth::{IdentityResolver, NoIdentity};
use crate::config::{ConfigMap, ConfigStore, CoreConfig};
use crate::error::CoreResult;
use crate::event::{Event, EventBus, SubscriptionId, SYSTEM_SOURCE};
use crate::gateway::{
    Gateway, GatewayRequest, GatewayResponse, HandlerSet, Middleware, ModuleResolver,
};
use crate::module::{Component, Module, ModuleCategory, ModuleManifest, ModuleRegistry};
use crate::storage::{MemoryStorage, SqliteStorage, Storage};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};


/// A UI component declared by an active module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleComponent {
    pub module_id: String,
    #[serde(flatten)]
    pub component: Component,
}

/// Builder for [`Core`] with pluggable collaborators.
pub struct CoreBuilder {
    config: CoreConfig,
    storage: Option<Arc<dyn Storage>>,
    identity: Option<Arc<dyn IdentityResolver>>,
}

impl CoreBuilder {
    /// Storage collaborator. Defaults to SQLite when `storage.sqlite_path` is
    /// set, in-memory otherwise.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Identity collaborator. Defaults to [`NoIdentity`].
    pub fn identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn build(self) -> Result<Arc<Core>> {
        let config = self.config;

        let storage: Arc<dyn Storage> = match (self.storage, &config.storage.sqlite_path) {
            (Some(storage), _) => storage,
            (None, Some(path)) => Arc::new(
                SqliteStorage::new(path)
                    .with_context(|| format!("Failed to open storage database '{}'", path))?,
            ),
            (None, None) => Arc::new(MemoryStorage::new()),
        };
        let identity: Arc<dyn IdentityResolver> = match self.identity {
            Some(identity) => identity,
            None => Arc::new(NoIdentity),
        };

        let events = Arc::new(EventBus::with_capacity(config.events.max_events));
        let config_store = Arc::new(ConfigStore::new(storage.clone(), config.system.clone()));
        let gateway = Arc::new(Gateway::new(
            config.gateway.clone(),
            events.clone(),
            identity,
        ));
        let registry = Arc::new(ModuleRegistry::new(
            events.clone(),
            gateway.clone(),
            config_store.clone(),
            storage.clone(),
        ));
        let resolver: Weak<dyn ModuleResolver> = Arc::downgrade(&registry) as Weak<dyn ModuleResolver>;
        gateway.attach_resolver(resolver);

        info!(
            max_events = config.events.max_events,
            route_prefix = %config.gateway.route_prefix,
            sqlite = config.storage.sqlite_path.is_some(),
            "Core initialized"
        );

        Ok(Arc::new(Core {
            config,
            events,
            config_store,
            gateway,
            registry,
            storage,
            sweeper: Mutex::new(None),
        }))
    }
}

/// The module orchestration core.
pub struct Core {
    config: CoreConfig,
    events: Arc<EventBus>,
    config_store: Arc<ConfigStore>,
    gateway: Arc<Gateway>,
    registry: Arc<ModuleRegistry>,
    storage: Arc<dyn Storage>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    pub fn builder(config: CoreConfig) -> CoreBuilder {
        CoreBuilder {
            config,
            storage: None,
            identity: None,
        }
    }

    /// Build with default collaborators.
    pub fn new(config: CoreConfig) -> Result<Arc<Self>> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.config_store
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Restore persisted config and start background maintenance.
    ///
    /// The bucket sweeper needs a Tokio runtime; without one it is skipped.
    pub fn start(&self) -> CoreResult<()> {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            debug!("Core already started");
            return Ok(());
        }

        let restored = self.config_store.load_persisted()?;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let gateway = self.gateway.clone();
                let period =
                    Duration::from_secs(self.config.gateway.bucket_sweep_interval_seconds.max(1));
                *sweeper = Some(runtime.spawn(async move {
                    let mut ticker = tokio::time::interval(period);
                    // First tick completes immediately
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        gateway.sweep_rate_limits();
                    }
                }));
            }
            Err(_) => warn!("No async runtime; rate-limit bucket sweeper not started"),
        }
        drop(sweeper);

        info!(
            modules = self.registry.module_count(),
            restored_configs = restored,
            "Core started"
        );
        self.events.emit(
            "system.started",
            json!({ "modules": self.registry.module_count(), "restoredConfigs": restored }),
            Some(SYSTEM_SOURCE),
            None,
        );
        Ok(())
    }

    /// Deactivate every active module (dependents first) and stop background
    /// maintenance. Returns the deactivated module ids.
    pub fn stop(&self) -> Vec<String> {
        let deactivated = self.registry.deactivate_all();
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }

        info!(deactivated = deactivated.len(), "Core stopped");
        self.events.emit(
            "system.stopped",
            json!({ "deactivated": deactivated }),
            Some(SYSTEM_SOURCE),
            None,
        );
        deactivated
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    // Module lifecycle

    pub fn register_module(&self, manifest: ModuleManifest, handlers: HandlerSet) -> CoreResult<Module> {
        self.registry.register(manifest, handlers)
    }

    pub fn unregister_module(&self, module_id: &str) -> CoreResult<()> {
        self.registry.unregister(module_id)
    }

    pub fn activate_module(&self, module_id: &str) -> CoreResult<Module> {
        self.registry.activate(module_id)
    }

    pub fn deactivate_module(&self, module_id: &str) -> CoreResult<Module> {
        self.registry.deactivate(module_id)
    }

    pub fn get_module(&self, module_id: &str) -> Option<Module> {
        self.registry.get_module(module_id)
    }

    pub fn get_active_modules(&self) -> Vec<Module> {
        self.registry.get_active_modules()
    }

    pub fn get_modules_by_category(&self, category: ModuleCategory) -> Vec<Module> {
        self.registry.get_modules_by_category(category)
    }

    pub fn list_modules(&self) -> Vec<Module> {
        self.registry.list_modules()
    }

    /// Component declarations of every active module, for the UI layer.
    pub fn components(&self) -> Vec<ModuleComponent> {
        self.registry
            .get_active_modules()
            .into_iter()
            .flat_map(|module| {
                let module_id = module.id().to_string();
                module
                    .manifest()
                    .components
                    .clone()
                    .into_iter()
                    .map(move |component| ModuleComponent {
                        module_id: module_id.clone(),
                        component,
                    })
            })
            .collect()
    }

    // Requests

    pub async fn handle_request(&self, request: GatewayRequest) -> GatewayResponse {
        self.gateway.handle(request).await
    }

    pub fn register_middleware(&self, name: &str, middleware: Arc<dyn Middleware>) {
        self.gateway.register_middleware(name, middleware);
    }

    // Events

    pub fn emit(
        &self,
        event_type: &str,
        data: Value,
        source: Option<&str>,
        target: Option<&str>,
    ) -> Event {
        self.events.emit(event_type, data, source, target)
    }

    pub fn on<F>(&self, event_type: &str, handler: F, owner: Option<&str>) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.on(event_type, handler, owner)
    }

    pub fn once<F>(&self, event_type: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.once(event_type, handler)
    }

    pub fn off(&self, event_type: &str, id: SubscriptionId) -> bool {
        self.events.off(event_type, id)
    }

    pub fn get_events(&self, event_type: Option<&str>, module_id: Option<&str>) -> Vec<Event> {
        self.events.get_events(event_type, module_id)
    }

    pub fn clear_events(&self, event_type: Option<&str>, module_id: Option<&str>) -> usize {
        self.events.clear_events(event_type, module_id)
    }

    // Config

    pub fn get_system_config(&self) -> ConfigMap {
        self.config_store.get_system_config()
    }

    pub fn get_module_config(&self, module_id: &str) -> ConfigMap {
        self.config_store.get_module_config(module_id)
    }

    pub fn get_tenant_config(&self, tenant_id: &str) -> ConfigMap {
        self.config_store.get_tenant_config(tenant_id)
    }

    pub fn update_system_config(&self, key: &str, value: Value) {
        self.config_store.update_system_config(key, value)
    }

    pub fn update_module_config(&self, module_id: &str, key: &str, value: Value) -> CoreResult<()> {
        self.config_store.update_module_config(module_id, key, value)
    }

    pub fn update_tenant_config(&self, tenant_id: &str, key: &str, value: Value) -> CoreResult<()> {
        self.config_store.update_tenant_config(tenant_id, key, value)
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}
