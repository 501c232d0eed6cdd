//! Runtime-mutable configuration for compaction services and tables.
//!
//! Service options are epoch-stamped: every mutation bumps the epoch, and
//! built service instances are rebuilt lazily once their epoch goes stale.
//! That is what makes live reconfiguration (and adding a brand-new service at
//! runtime) work without restarting anything.

use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};

use async_lock::RwLock;

use crate::plugin::PluginConfig;

/// Service option naming the planner plugin identifier.
pub const SERVICE_PLANNER_KEY: &str = "planner";
/// Prefix of options forwarded to the planner's `init`.
pub const SERVICE_PLANNER_OPTS_PREFIX: &str = "planner.opts.";

/// Table option naming the default compaction service.
pub const DISPATCH_SERVICE_KEY: &str = "compaction.dispatcher.service";
/// Table option naming the selector plugin.
pub const SELECTOR_KEY: &str = "compaction.selector";
/// Prefix of selector options.
pub const SELECTOR_OPTS_PREFIX: &str = "compaction.selector.opts.";
/// Table option naming the configurer plugin.
pub const CONFIGURER_KEY: &str = "compaction.configurer";
/// Prefix of configurer options.
pub const CONFIGURER_OPTS_PREFIX: &str = "compaction.configurer.opts.";

/// Options of one compaction service at a point in time.
#[derive(Clone, Debug)]
pub(crate) struct ServiceDefinition {
    pub(crate) options: BTreeMap<String, String>,
    pub(crate) epoch: u64,
}

/// Store of per-service option maps, mutable at runtime.
#[derive(Debug, Default)]
pub(crate) struct ServiceConfigStore {
    services: RwLock<HashMap<String, ServiceDefinition>>,
    epochs: AtomicU64,
}

impl ServiceConfigStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Set one option, creating the service definition if needed.
    pub(crate) async fn set_option(&self, service: &str, key: &str, value: &str) {
        let epoch = self.next_epoch();
        let mut guard = self.services.write().await;
        let definition = guard
            .entry(service.to_string())
            .or_insert_with(|| ServiceDefinition {
                options: BTreeMap::new(),
                epoch,
            });
        definition.options.insert(key.to_string(), value.to_string());
        definition.epoch = epoch;
    }

    /// Replace a service definition wholesale.
    pub(crate) async fn define(&self, service: &str, options: BTreeMap<String, String>) {
        let epoch = self.next_epoch();
        self.services
            .write()
            .await
            .insert(service.to_string(), ServiceDefinition { options, epoch });
    }

    /// Snapshot of one service's definition.
    pub(crate) async fn get(&self, service: &str) -> Option<ServiceDefinition> {
        self.services.read().await.get(service).cloned()
    }
}

/// Initial per-table options, set at table creation.
#[derive(Clone, Debug, Default)]
pub struct TableOptions {
    options: BTreeMap<String, String>,
}

impl TableOptions {
    /// No options; every compaction attempt will fail dispatch until a
    /// service is configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a raw option key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Name the default compaction service for all kinds.
    pub fn service(self, service: impl Into<String>) -> Self {
        self.set(DISPATCH_SERVICE_KEY, service)
    }

    /// Map a `compaction_type` hint alias to a service for user compactions.
    pub fn user_service_alias(self, alias: &str, service: impl Into<String>) -> Self {
        self.set(format!("{DISPATCH_SERVICE_KEY}.user.{alias}"), service)
    }

    /// Configure the table's selector plugin.
    pub fn selector(mut self, config: PluginConfig) -> Self {
        self.options
            .insert(SELECTOR_KEY.to_string(), config.id().to_string());
        for (key, value) in config.options() {
            self.options
                .insert(format!("{SELECTOR_OPTS_PREFIX}{key}"), value.clone());
        }
        self
    }

    /// Configure the table's configurer plugin.
    pub fn configurer(mut self, config: PluginConfig) -> Self {
        self.options
            .insert(CONFIGURER_KEY.to_string(), config.id().to_string());
        for (key, value) in config.options() {
            self.options
                .insert(format!("{CONFIGURER_OPTS_PREFIX}{key}"), value.clone());
        }
        self
    }

    pub(crate) fn into_options(self) -> BTreeMap<String, String> {
        self.options
    }
}

/// Live option map of one table.
#[derive(Debug)]
pub(crate) struct TableConfig {
    options: RwLock<BTreeMap<String, String>>,
}

impl TableConfig {
    pub(crate) fn new(options: TableOptions) -> Self {
        Self {
            options: RwLock::new(options.into_options()),
        }
    }

    pub(crate) async fn set_option(&self, key: &str, value: &str) {
        self.options
            .write()
            .await
            .insert(key.to_string(), value.to_string());
    }

    /// Point-in-time copy used for one compaction attempt.
    pub(crate) async fn snapshot(&self) -> BTreeMap<String, String> {
        self.options.read().await.clone()
    }
}

/// Selector configured for a table, if any.
pub(crate) fn table_selector(options: &BTreeMap<String, String>) -> Option<PluginConfig> {
    PluginConfig::from_options(options, SELECTOR_KEY, SELECTOR_OPTS_PREFIX)
}

/// Configurer configured for a table, if any.
pub(crate) fn table_configurer(options: &BTreeMap<String, String>) -> Option<PluginConfig> {
    PluginConfig::from_options(options, CONFIGURER_KEY, CONFIGURER_OPTS_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_mutation_bumps_the_epoch() {
        let store = ServiceConfigStore::new();
        store.set_option("cs1", SERVICE_PLANNER_KEY, "batch").await;
        let first = store.get("cs1").await.expect("definition");
        store
            .set_option("cs1", "planner.opts.filesPerCompaction", "5")
            .await;
        let second = store.get("cs1").await.expect("definition");
        assert!(second.epoch > first.epoch);
        assert_eq!(second.options.len(), 2);
    }

    #[tokio::test]
    async fn unknown_services_are_created_on_first_option() {
        let store = ServiceConfigStore::new();
        assert!(store.get("newcs").await.is_none());
        store.set_option("newcs", SERVICE_PLANNER_KEY, "batch").await;
        assert!(store.get("newcs").await.is_some());
    }

    #[tokio::test]
    async fn table_options_seed_the_live_config() {
        let options = TableOptions::new()
            .service("cs1")
            .user_service_alias("special", "cs4");
        let config = TableConfig::new(options);
        let snapshot = config.snapshot().await;
        assert_eq!(
            snapshot.get(DISPATCH_SERVICE_KEY).map(String::as_str),
            Some("cs1")
        );
        assert_eq!(
            snapshot
                .get("compaction.dispatcher.service.user.special")
                .map(String::as_str),
            Some("cs4")
        );
    }

    #[test]
    fn selector_options_round_trip_through_table_options() {
        let options = TableOptions::new().selector(
            PluginConfig::new("delete-ratio").with_option("threshold", ".4"),
        );
        let map = options.into_options();
        let config = table_selector(&map).expect("selector");
        assert_eq!(config.id(), "delete-ratio");
        assert_eq!(config.options().get("threshold").map(String::as_str), Some(".4"));
    }
}
