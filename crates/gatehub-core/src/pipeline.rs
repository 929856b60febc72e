use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures_util::FutureExt;
use gatehub_events::{
    Bus, TOPIC_FUNCTION_REGISTERED, TOPIC_INVOKE_COMPLETED, TOPIC_INVOKE_DENIED,
    TOPIC_INVOKE_FAILED,
};
use gatehub_protocol::{ApiError, Invocation, Reply};
use gatehub_store::{DocStore, FileStore, LocalStore, LogStore, TtlCache};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::identity::{Identity, IdentityProvider};
use crate::registry::{FunctionSpec, Registry, RegistryError};

/// The process-scoped hub: registry, persistence, and the authorization
/// pipeline in front of every function invocation.
///
/// Build one per process (or per test); nothing here is ambient global
/// state. [`Hub::invoke`] never fails the process — every failure becomes a
/// structured error reply.
pub struct Hub {
    config: HubConfig,
    registry: Arc<Registry>,
    provider: Arc<dyn IdentityProvider>,
    store: LocalStore,
    docs: DocStore,
    files: FileStore,
    cache: TtlCache,
    logs: LogStore,
    bus: Bus,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    /// Open the state directory, load the cache snapshot, and start the
    /// background sweeper. Must run inside a tokio runtime.
    pub fn open(config: HubConfig, provider: Arc<dyn IdentityProvider>) -> Result<Self> {
        let bus = Bus::default();
        let store = LocalStore::open(&config.state_dir)?.with_bus(bus.clone());
        let docs = DocStore::new(store.clone());
        let files = FileStore::open(&config.state_dir)?;
        let logs = LogStore::open(&config.state_dir)?;
        let cache = TtlCache::load(store.clone()).with_bus(bus.clone());
        let sweeper = cache.spawn_sweeper(config.sweep_interval());
        info!(state_dir = %config.state_dir, "hub opened");
        Ok(Self {
            config,
            registry: Arc::new(Registry::new()),
            provider,
            store,
            docs,
            files,
            cache,
            logs,
            bus,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Register a function. Startup-time wiring; duplicates are an error.
    pub fn register(&self, spec: FunctionSpec) -> Result<(), RegistryError> {
        let name = spec.name.clone();
        self.registry.register(spec)?;
        self.bus
            .publish(TOPIC_FUNCTION_REGISTERED, None, &json!({ "function": name }));
        Ok(())
    }

    /// Gate and dispatch one invocation.
    ///
    /// Pipeline order: lookup, identity resolution, capability checks in
    /// declared order, input-schema validation, handler. The first failing
    /// stage short-circuits; handler panics are contained.
    pub async fn invoke(&self, invocation: Invocation) -> Reply {
        let function = invocation.function.clone();
        let corr_id = invocation.corr_id.clone();
        match self.try_invoke(invocation).await {
            Ok(reply) => {
                self.bus.publish(
                    TOPIC_INVOKE_COMPLETED,
                    corr_id.as_deref(),
                    &json!({ "function": function, "status": reply.status }),
                );
                reply
            }
            Err(err) => {
                let topic = match &err {
                    ApiError::Io(_) | ApiError::Internal => TOPIC_INVOKE_FAILED,
                    _ => TOPIC_INVOKE_DENIED,
                };
                self.bus.publish(
                    topic,
                    corr_id.as_deref(),
                    &json!({ "function": function, "kind": err.kind(), "message": err.to_string() }),
                );
                self.logs
                    .append("invocations", &format!("{function}: {} ({})", err, err.kind()));
                err.to_reply()
            }
        }
    }

    async fn try_invoke(&self, invocation: Invocation) -> Result<Reply, ApiError> {
        let name = invocation.function.clone();
        let Some(func) = self.registry.get(&name) else {
            return Err(ApiError::NotFound(format!("function \"{name}\"")));
        };

        // Identity resolution. Every resolver failure reads the same from
        // outside: no identity.
        let identity: Option<Identity> = if func.spec.requires_auth {
            let Some(token) = invocation.credential.as_deref() else {
                return Err(ApiError::Unauthorized);
            };
            match self.provider.verify_credential(token).await {
                Ok(identity) => Some(identity),
                Err(err) => {
                    debug!(function = %name, error = %err, "credential did not resolve");
                    return Err(ApiError::Unauthorized);
                }
            }
        } else {
            None
        };

        // Capability checks, declared order, fail closed.
        if let Some(identity) = &identity {
            for capability in &func.spec.required_capabilities {
                let granted = match self.provider.has_capability(identity, capability).await {
                    Ok(granted) => granted,
                    Err(err) => {
                        warn!(
                            function = %name,
                            capability,
                            error = %err,
                            "capability check failed, treating as absent"
                        );
                        false
                    }
                };
                if !granted {
                    return Err(ApiError::Forbidden {
                        function: name.clone(),
                        capability: capability.clone(),
                    });
                }
            }
        }

        func.validate_input(&invocation.body)
            .map_err(ApiError::InvalidArgument)?;

        let fut = func.spec.handler.call(invocation, identity);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                debug!(function = %name, error = %err, "handler returned an error");
                Err(err)
            }
            Err(panic) => {
                let cause = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(function = %name, cause, "handler panicked");
                Err(ApiError::Internal)
            }
        }
    }

    /// Drain pending cache persists and stop the sweeper. Call before a
    /// clean process exit.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().expect("sweeper lock poisoned").take() {
            handle.abort();
        }
        self.cache.flush().await;
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn docs(&self) -> &DocStore {
        &self.docs
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn logs(&self) -> &LogStore {
        &self.logs
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
