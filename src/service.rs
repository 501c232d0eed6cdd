//! Built compaction services: one planner instance bound to its pools.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_lock::RwLock;

use crate::{
    config::{ServiceConfigStore, ServiceDefinition, SERVICE_PLANNER_KEY, SERVICE_PLANNER_OPTS_PREFIX},
    error::{CompactionError, ConfigurationError, PluginRuntimeError},
    logging::tessera_log,
    plugin::{
        planner::{CompactionPlan, CompactionPlanner, InitParameters, PlanningParameters},
        PluginRegistry,
    },
    pool::{ExecutorManager, ExecutorPool, ExecutorPoolId},
};

/// One instantiation of a compaction service: an initialized planner plus the
/// pools it declared. Replaced wholesale when the service's options change;
/// orchestrators holding the old `Arc` finish their plans under the old
/// configuration while new attempts pick up the rebuilt state.
pub(crate) struct ServiceState {
    name: String,
    epoch: u64,
    planner: Box<dyn CompactionPlanner>,
    pools: HashMap<ExecutorPoolId, Arc<ExecutorPool>>,
}

impl std::fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceState")
            .field("name", &self.name)
            .field("epoch", &self.epoch)
            .field("planner", &self.planner)
            .field("pools", &self.pools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceState {
    fn build(
        name: &str,
        definition: &ServiceDefinition,
        plugins: &PluginRegistry,
    ) -> Result<Self, CompactionError> {
        let planner_id = definition
            .options
            .get(SERVICE_PLANNER_KEY)
            .ok_or_else(|| ConfigurationError::missing(SERVICE_PLANNER_KEY))?;
        let mut planner = plugins.new_planner(planner_id)?;

        let mut planner_opts: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in &definition.options {
            if let Some(stripped) = key.strip_prefix(SERVICE_PLANNER_OPTS_PREFIX) {
                planner_opts.insert(stripped.to_string(), value.clone());
            }
        }

        let mut manager = ExecutorManager::new(name);
        planner
            .init(InitParameters::new(&planner_opts, &mut manager))
            .map_err(CompactionError::Config)?;
        let pools = manager.into_pools();

        tessera_log!(
            log::Level::Info,
            "service_built",
            "service={name} planner={planner_id} epoch={} pools={}",
            definition.epoch,
            pools.len()
        );
        Ok(Self {
            name: name.to_string(),
            epoch: definition.epoch,
            planner,
            pools,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn make_plan(
        &self,
        params: &PlanningParameters<'_>,
    ) -> Result<CompactionPlan, PluginRuntimeError> {
        let plan = self.planner.make_plan(params)?;
        tessera_log!(
            log::Level::Debug,
            "plan_made",
            "service={} kind={} candidates={} jobs={}",
            self.name,
            params.kind(),
            params.candidates().len(),
            plan.jobs().len()
        );
        Ok(plan)
    }

    pub(crate) fn pool(&self, id: &ExecutorPoolId) -> Option<&Arc<ExecutorPool>> {
        self.pools.get(id)
    }
}

/// Cache of built services, keyed by name and invalidated by config epoch.
pub(crate) struct ServiceRegistry {
    config: ServiceConfigStore,
    built: RwLock<HashMap<String, Arc<ServiceState>>>,
    plugins: Arc<PluginRegistry>,
}

impl ServiceRegistry {
    pub(crate) fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self {
            config: ServiceConfigStore::new(),
            built: RwLock::new(HashMap::new()),
            plugins,
        }
    }

    pub(crate) fn config(&self) -> &ServiceConfigStore {
        &self.config
    }

    /// Resolve the current instantiation of a named service, rebuilding it if
    /// its configuration changed since the last attempt.
    pub(crate) async fn resolve(&self, name: &str) -> Result<Arc<ServiceState>, CompactionError> {
        let definition = self
            .config
            .get(name)
            .await
            .ok_or_else(|| ConfigurationError::UnknownService(name.to_string()))?;

        {
            let guard = self.built.read().await;
            if let Some(state) = guard.get(name) {
                if state.epoch() == definition.epoch {
                    return Ok(Arc::clone(state));
                }
            }
        }

        // Build outside the cache lock: planner init may be plugin-supplied
        // and slow, and it spawns pool workers.
        let state = Arc::new(ServiceState::build(name, &definition, &self.plugins)?);

        let mut guard = self.built.write().await;
        match guard.get(name) {
            Some(current) if current.epoch() >= state.epoch() => Ok(Arc::clone(current)),
            _ => {
                guard.insert(name.to_string(), Arc::clone(&state));
                Ok(state)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::plugin::{
        planner::{OPT_EXECUTORS, OPT_FILES_PER_COMPACTION, OPT_PROCESS},
        BATCH_PLANNER,
    };

    use super::*;

    async fn registry_with_service(files_per_compaction: &str) -> ServiceRegistry {
        let registry = ServiceRegistry::new(Arc::new(PluginRegistry::with_builtins()));
        let config = registry.config();
        config.set_option("cs1", SERVICE_PLANNER_KEY, BATCH_PLANNER).await;
        config
            .set_option("cs1", &format!("{SERVICE_PLANNER_OPTS_PREFIX}{OPT_EXECUTORS}"), "2")
            .await;
        config
            .set_option(
                "cs1",
                &format!("{SERVICE_PLANNER_OPTS_PREFIX}{OPT_FILES_PER_COMPACTION}"),
                files_per_compaction,
            )
            .await;
        config
            .set_option("cs1", &format!("{SERVICE_PLANNER_OPTS_PREFIX}{OPT_PROCESS}"), "system")
            .await;
        registry
    }

    #[tokio::test]
    async fn resolution_caches_until_the_epoch_moves() {
        let registry = registry_with_service("11").await;
        let first = registry.resolve("cs1").await.expect("resolve");
        let second = registry.resolve("cs1").await.expect("resolve");
        assert!(Arc::ptr_eq(&first, &second));

        registry
            .config()
            .set_option(
                "cs1",
                &format!("{SERVICE_PLANNER_OPTS_PREFIX}{OPT_FILES_PER_COMPACTION}"),
                "5",
            )
            .await;
        let rebuilt = registry.resolve("cs1").await.expect("resolve");
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert!(rebuilt.epoch() > first.epoch());
    }

    #[tokio::test]
    async fn unknown_service_is_a_configuration_error() {
        let registry = ServiceRegistry::new(Arc::new(PluginRegistry::with_builtins()));
        let err = registry.resolve("nope").await.expect_err("unknown");
        assert!(matches!(
            err,
            CompactionError::Config(ConfigurationError::UnknownService(_))
        ));
    }

    #[tokio::test]
    async fn bad_planner_options_fail_only_that_service() {
        let registry = ServiceRegistry::new(Arc::new(PluginRegistry::with_builtins()));
        let config = registry.config();
        config.set_option("good", SERVICE_PLANNER_KEY, BATCH_PLANNER).await;
        config
            .set_option("good", &format!("{SERVICE_PLANNER_OPTS_PREFIX}{OPT_EXECUTORS}"), "1")
            .await;
        config
            .set_option(
                "good",
                &format!("{SERVICE_PLANNER_OPTS_PREFIX}{OPT_FILES_PER_COMPACTION}"),
                "3",
            )
            .await;
        config
            .set_option("good", &format!("{SERVICE_PLANNER_OPTS_PREFIX}{OPT_PROCESS}"), "user")
            .await;
        config.set_option("bad", SERVICE_PLANNER_KEY, BATCH_PLANNER).await;

        assert!(matches!(
            registry.resolve("bad").await.expect_err("bad init"),
            CompactionError::Config(ConfigurationError::MissingOption(_))
        ));
        assert!(registry.resolve("good").await.is_ok());
    }
}
